use thiserror::Error;

use crate::acpi::AcpiError;
use crate::config::Feature;
use crate::profile::PlatformProfile;

/* Errors raised by the firmware command protocol and the sub-features built on it. */
#[derive(Error, Debug)]
pub enum GalaxybookError {
    /* The firmware call mechanism itself failed. */
    #[error("failed {purpose} with ACPI method {method}: {source}")]
    FirmwareCallFailed {
        method: &'static str,
        purpose: String,
        #[source]
        source: AcpiError,
    },

    #[error("failed {purpose} with ACPI method {method}; {reason}")]
    MalformedResponse {
        method: &'static str,
        purpose: String,
        reason: String,
    },

    #[error("failed {purpose} with ACPI method {method}; response of {len} bytes was too short")]
    TruncatedResponse {
        method: &'static str,
        purpose: String,
        len: usize,
    },

    #[error("failed {purpose} with ACPI method {method}; device answered 0x{flag:02x} instead of the success code")]
    DeviceRejected {
        method: &'static str,
        purpose: String,
        flag: u8,
    },

    #[error("failed {purpose} with ACPI method {method}; device responded with the failure code")]
    DeviceReportedFailure {
        method: &'static str,
        purpose: String,
    },

    /* The enable handshake did not echo the acknowledgement markers. */
    #[error("sub-feature 0x{sub_feature:02x} did not acknowledge activation")]
    FeatureUnavailable { sub_feature: u16 },

    #[error("performance mode 0x{0:02x} is not mapped to any profile")]
    UnrecognizedMode(u8),

    #[error("platform profile '{0}' is not supported by this device")]
    UnsupportedProfile(PlatformProfile),

    #[error("no performance mode could be mapped to a platform profile")]
    NoSupportedProfiles,

    #[error("invalid fan speed data: {0}")]
    InvalidFanData(String),

    #[error("invalid fan speed level {0}")]
    InvalidFanLevel(u64),

    #[error("{0} is disabled")]
    FeatureDisabled(Feature),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = GalaxybookError> = std::result::Result<T, E>;
