/* Method invoker: one validated request/response round trip through a */
/* named firmware entry point. */

use tracing::{debug, warn};

use crate::acpi::{AcpiArg, AcpiMethods, AcpiObject};
use crate::error::{GalaxybookError, Result};
use crate::sawb::{Sawb, GUNM_FAIL, GUNM_POS, RFLG_POS, RFLG_SUCCESS};

pub const ACPI_METHOD_SETTINGS: &str = "CSFI";
pub const ACPI_METHOD_PERFORMANCE_MODE: &str = "CSXI";

/* The firmware entry points the protocol is spoken through. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Settings,
    PerformanceMode,
}

impl EntryPoint {
    pub fn method(self) -> &'static str {
        match self {
            Self::Settings => ACPI_METHOD_SETTINGS,
            Self::PerformanceMode => ACPI_METHOD_PERFORMANCE_MODE,
        }
    }
}

pub struct MethodInvoker {
    acpi: Box<dyn AcpiMethods>,
}

impl MethodInvoker {
    pub fn new(acpi: Box<dyn AcpiMethods>) -> Self {
        Self { acpi }
    }

    /* Direct access to the firmware for calls outside the command protocol */
    /* (device enable, fan methods). */
    pub fn acpi(&mut self) -> &mut dyn AcpiMethods {
        self.acpi.as_mut()
    }

    /* Send `request` to `entry` and return the validated response. */
    /*  */
    /* The response is only handed back once it is a buffer of exactly the */
    /* request's length carrying the success flag and no failure opcode. */
    pub async fn invoke<const N: usize>(
        &mut self,
        entry: EntryPoint,
        request: &Sawb<N>,
        purpose: &str,
    ) -> Result<Sawb<N>> {
        let method = entry.method();
        debug!("{purpose}: {method} <- {:02x?}", request.as_bytes());

        let response = self
            .acpi
            .evaluate(method, &[AcpiArg::Buffer(request.as_bytes().to_vec())])
            .await
            .map_err(|source| {
                warn!("failed {purpose} with ACPI method {method}: {source}");
                GalaxybookError::FirmwareCallFailed {
                    method,
                    purpose: purpose.to_string(),
                    source,
                }
            })?;

        let bytes = match response {
            AcpiObject::Buffer(bytes) => bytes,
            other => {
                return Err(rejected(GalaxybookError::MalformedResponse {
                    method,
                    purpose: purpose.to_string(),
                    reason: format!("response was a {} instead of a buffer", other.type_name()),
                }));
            }
        };
        debug!("{purpose}: {method} -> {:02x?}", bytes);

        if bytes.len() != N {
            return Err(rejected(GalaxybookError::MalformedResponse {
                method,
                purpose: purpose.to_string(),
                reason: format!("response length mismatch ({} bytes, expected {N})", bytes.len()),
            }));
        }
        if bytes.len() < GUNM_POS + 1 {
            return Err(rejected(GalaxybookError::TruncatedResponse {
                method,
                purpose: purpose.to_string(),
                len: bytes.len(),
            }));
        }
        if bytes[RFLG_POS] != RFLG_SUCCESS {
            return Err(rejected(GalaxybookError::DeviceRejected {
                method,
                purpose: purpose.to_string(),
                flag: bytes[RFLG_POS],
            }));
        }
        if bytes[GUNM_POS] == GUNM_FAIL {
            return Err(rejected(GalaxybookError::DeviceReportedFailure {
                method,
                purpose: purpose.to_string(),
            }));
        }

        Sawb::from_bytes(&bytes).ok_or_else(|| GalaxybookError::MalformedResponse {
            method,
            purpose: purpose.to_string(),
            reason: "response could not be decoded".to_string(),
        })
    }
}

fn rejected(err: GalaxybookError) -> GalaxybookError {
    warn!("{err}");
    err
}
