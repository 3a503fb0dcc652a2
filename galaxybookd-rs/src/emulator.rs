/* Emulated firmware: an in-memory `AcpiMethods` backend driven by a JSON
 * description of a laptop. Used by the unit tests and, with the
 * `dev-hooks` feature, by `galaxybookd --emulate <spec.json>`. */

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::acpi::{AcpiArg, AcpiError, AcpiMethods, AcpiObject};
use crate::fan::{FanCandidate, ACPI_FAN_SPEED_VALUE};
use crate::sawb::*;

/* ------------------------------------------------------------------ */
/* JSON DTOs                                                            */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorSpec {
    pub hid: String,
    pub device_path: String,
    /* Supported performance mode codes, most capable first. */
    pub performance_modes: Vec<u8>,
    pub performance_mode: u8,
    pub kbd_backlight: u8,
    pub start_on_lid_open: bool,
    pub usb_charge: bool,
    pub allow_recording: bool,
    /* Raw firmware value: 0 means charge limiting is off. */
    pub charge_threshold: u8,
    /* Sub-feature ids whose enable handshake is not acknowledged. */
    pub reject_enable: Vec<u16>,
    /* Method names that fail with a firmware status. */
    pub failing_methods: Vec<String>,
    pub fans: Vec<FanSpec>,
    /* Embedded-controller speed level, present when any fan has levels. */
    pub fan_level: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FanSpec {
    pub path: String,
    pub label: Option<String>,
    /* `_FST` speed; absent means the method does not exist. */
    pub fst: Option<u64>,
    /* `FANT` level list; absent means the method does not exist. */
    pub levels: Option<Vec<u64>>,
    /* Implements the full ACPI 4.0 fan interface. */
    pub acpi4: bool,
}

/* ------------------------------------------------------------------ */
/* Defaults: a Galaxy Book with three profiles and one EC-driven fan    */
/* ------------------------------------------------------------------ */

impl Default for EmulatorSpec {
    fn default() -> Self {
        Self {
            hid: "SAM0430".to_string(),
            device_path: "\\_SB.PC00.LPCB.SAM0".to_string(),
            performance_modes: vec![0x15, 0x02, 0x0b],
            performance_mode: 0x02,
            kbd_backlight: 0,
            start_on_lid_open: false,
            usb_charge: false,
            allow_recording: true,
            charge_threshold: 0,
            reject_enable: Vec::new(),
            failing_methods: Vec::new(),
            fans: vec![FanSpec {
                path: "\\_SB.PC00.LPCB.FAN0".to_string(),
                label: Some("CPU fan".to_string()),
                fst: Some(0),
                levels: Some(vec![2800, 3200, 3800]),
                acpi4: false,
            }],
            fan_level: 1,
        }
    }
}

impl EmulatorSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Parsing emulator spec")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn fan_candidates(&self) -> Vec<FanCandidate> {
        self.fans
            .iter()
            .enumerate()
            .map(|(i, fan)| FanCandidate {
                label: fan.label.clone().unwrap_or_else(|| format!("PNP0C0B:{i:02x}")),
                path: fan.path.clone(),
            })
            .collect()
    }
}

/* Live emulator state, shared with whoever wants to inspect it. */
#[derive(Debug)]
pub struct FirmwareState {
    pub spec: EmulatorSpec,
    pub device_enabled: bool,
    pub activated: HashSet<u16>,
    pub notifications_active: bool,
    pub calls: Vec<String>,
}

pub struct EmulatedFirmware {
    state: Arc<Mutex<FirmwareState>>,
}

impl EmulatedFirmware {
    pub fn new(spec: EmulatorSpec) -> Self {
        Self {
            state: Arc::new(Mutex::new(FirmwareState {
                spec,
                device_enabled: false,
                activated: HashSet::new(),
                notifications_active: false,
                calls: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> Arc<Mutex<FirmwareState>> {
        Arc::clone(&self.state)
    }
}

fn status(s: &str) -> AcpiError {
    AcpiError::Status(s.to_string())
}

/* Sub-feature whose handshake gates `sasb`, if any. */
fn gate(sasb: u16) -> Option<u16> {
    match sasb {
        SASB_KBD_BACKLIGHT | SASB_POWER_MANAGEMENT | SASB_ALLOW_RECORDING | SASB_NOTIFICATIONS => {
            Some(sasb)
        }
        SASB_PERFORMANCE_MODE => Some(SASB_POWER_MANAGEMENT),
        _ => None,
    }
}

impl FirmwareState {
    fn evaluate(&mut self, pathname: &str, args: &[AcpiArg]) -> Result<AcpiObject, AcpiError> {
        self.calls.push(pathname.to_string());

        let name = pathname.rsplit('.').next().unwrap_or(pathname);
        if self.spec.failing_methods.iter().any(|m| m == name) {
            return Err(status("AE_ERROR"));
        }

        if pathname == ACPI_FAN_SPEED_VALUE {
            return if self.spec.fans.iter().any(|f| f.levels.is_some()) {
                Ok(AcpiObject::Integer(self.spec.fan_level))
            } else {
                Err(status("AE_NOT_FOUND"))
            };
        }
        if pathname.starts_with('\\') {
            return self.fan_method(pathname);
        }

        let buffer = match args.first() {
            Some(AcpiArg::Buffer(bytes)) => Some(bytes.as_slice()),
            _ => None,
        };
        match (name, buffer) {
            ("SDLS", _) => {
                let on = matches!(args.first(), Some(AcpiArg::Integer(v)) if *v != 0);
                self.device_enabled = on;
                if !on {
                    self.activated.clear();
                    self.notifications_active = false;
                }
                Ok(AcpiObject::Integer(0))
            }
            ("CSFI", Some(bytes)) => self.settings(bytes),
            ("CSXI", Some(bytes)) => self.performance_mode(bytes),
            ("CSFI" | "CSXI", None) => Err(status("AE_AML_UNINITIALIZED_ARG")),
            _ => Err(status("AE_NOT_FOUND")),
        }
    }

    fn fan_method(&self, pathname: &str) -> Result<AcpiObject, AcpiError> {
        let (fan_path, method) = pathname.rsplit_once('.').ok_or_else(|| status("AE_NOT_FOUND"))?;
        let fan = self
            .spec
            .fans
            .iter()
            .find(|f| f.path == fan_path)
            .ok_or_else(|| status("AE_NOT_FOUND"))?;

        match method {
            "_FIF" | "_FPS" if fan.acpi4 => Ok(AcpiObject::Package(Vec::new())),
            "_FST" => fan
                .fst
                .map(|speed| {
                    AcpiObject::Package(vec![
                        AcpiObject::Integer(0),
                        AcpiObject::Integer(0),
                        AcpiObject::Integer(speed),
                    ])
                })
                .ok_or_else(|| status("AE_NOT_FOUND")),
            "FANT" => fan
                .levels
                .as_ref()
                .map(|levels| AcpiObject::Package(levels.iter().map(|&v| AcpiObject::Integer(v)).collect()))
                .ok_or_else(|| status("AE_NOT_FOUND")),
            _ => Err(status("AE_NOT_FOUND")),
        }
    }

    fn settings(&mut self, request: &[u8]) -> Result<AcpiObject, AcpiError> {
        let Some(req) = SettingsBuffer::from_bytes(request) else {
            return Err(status("AE_AML_BUFFER_LIMIT"));
        };
        let mut resp = request.to_vec();
        resp[RFLG_POS] = RFLG_SUCCESS;

        if !self.device_enabled {
            resp[RFLG_POS] = 0;
            return Ok(AcpiObject::Buffer(resp));
        }

        let sasb = req.sasb();
        let gunm = req.gunm();
        let guds = req.guds();

        if gunm == GUNM_FEATURE_ENABLE && guds[0] == GUDS_FEATURE_ENABLE {
            if !self.spec.reject_enable.contains(&sasb) {
                self.activated.insert(sasb);
                resp[GUNM_POS] = GUNM_FEATURE_ENABLE_SUCCESS;
                resp[GUNM_POS + 1] = GUDS_FEATURE_ENABLE_SUCCESS;
            }
            return Ok(AcpiObject::Buffer(resp));
        }

        if gate(sasb).is_some_and(|g| !self.activated.contains(&g)) {
            resp[GUNM_POS] = GUNM_FAIL;
            return Ok(AcpiObject::Buffer(resp));
        }

        let g = GUNM_POS + 1;
        match (sasb, gunm) {
            (SASB_KBD_BACKLIGHT, GUNM_GET) => resp[GUNM_POS] = self.spec.kbd_backlight,
            (SASB_KBD_BACKLIGHT, GUNM_SET) => self.spec.kbd_backlight = guds[0],
            (SASB_POWER_MANAGEMENT, GUNM_POWER_MANAGEMENT) => match (guds[0], guds[1]) {
                (GUDS_START_ON_LID_OPEN, GUDS_START_ON_LID_OPEN_GET) => {
                    resp[g + 1] = self.spec.start_on_lid_open as u8
                }
                (GUDS_START_ON_LID_OPEN, GUDS_START_ON_LID_OPEN_SET) => {
                    self.spec.start_on_lid_open = guds[2] != 0
                }
                (GUDS_BATTERY_CHARGE_CONTROL, GUDS_BATTERY_CHARGE_CONTROL_GET) => {
                    resp[g + 1] = self.spec.charge_threshold
                }
                (GUDS_BATTERY_CHARGE_CONTROL, GUDS_BATTERY_CHARGE_CONTROL_SET) => {
                    self.spec.charge_threshold = guds[2]
                }
                _ => resp[GUNM_POS] = GUNM_FAIL,
            },
            (SASB_USB_CHARGE_GET, GUNM_USB_CHARGE_GET) => resp[GUNM_POS] = self.spec.usb_charge as u8,
            (SASB_USB_CHARGE_SET, GUNM_USB_CHARGE_ON) => self.spec.usb_charge = true,
            (SASB_USB_CHARGE_SET, GUNM_USB_CHARGE_OFF) => self.spec.usb_charge = false,
            (SASB_ALLOW_RECORDING, GUNM_GET) => resp[GUNM_POS] = self.spec.allow_recording as u8,
            (SASB_ALLOW_RECORDING, GUNM_SET) => self.spec.allow_recording = guds[0] != 0,
            (SASB_NOTIFICATIONS, GUNM_ACPI_NOTIFY_ENABLE) if guds[0] == GUDS_ACPI_NOTIFY_ENABLE => {
                self.notifications_active = true
            }
            _ => resp[GUNM_POS] = GUNM_FAIL,
        }

        debug!("emulated CSFI 0x{:x}/0x{:x} -> {:02x?}", sasb, gunm, &resp[..9]);
        Ok(AcpiObject::Buffer(resp))
    }

    fn performance_mode(&mut self, request: &[u8]) -> Result<AcpiObject, AcpiError> {
        let Some(req) = PerformanceModeBuffer::from_bytes(request) else {
            return Err(status("AE_AML_BUFFER_LIMIT"));
        };
        let mut resp = request.to_vec();
        let gated = gate(req.sasb()).is_some_and(|g| !self.activated.contains(&g));
        if !self.device_enabled || gated || req.caid() != PERFORMANCE_MODE_GUID {
            return Ok(AcpiObject::Buffer(resp));
        }
        resp[RFLG_POS] = RFLG_SUCCESS;

        let iob = 23;
        match req.subn() {
            SUBN_PERFORMANCE_MODE_LIST => {
                let modes = &self.spec.performance_modes;
                resp[iob] = modes.len() as u8;
                for (i, &code) in modes.iter().take(IOB_LEN - 1).enumerate() {
                    resp[iob + 1 + i] = code;
                }
            }
            SUBN_PERFORMANCE_MODE_GET => resp[iob] = self.spec.performance_mode,
            SUBN_PERFORMANCE_MODE_SET => {
                let code = req.iob_values()[0];
                if self.spec.performance_modes.contains(&code) {
                    self.spec.performance_mode = code;
                } else {
                    resp[RFLG_POS] = 0;
                }
            }
            _ => resp[RFLG_POS] = 0,
        }
        Ok(AcpiObject::Buffer(resp))
    }
}

#[async_trait]
impl AcpiMethods for EmulatedFirmware {
    async fn evaluate(&mut self, pathname: &str, args: &[AcpiArg]) -> Result<AcpiObject, AcpiError> {
        let mut state = self.state.lock().map_err(|_| status("AE_ERROR"))?;
        state.evaluate(pathname, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec_with_defaults() {
        let spec = EmulatorSpec::from_json(
            r#"{"hid": "SAM0429", "performance_modes": [22, 21, 2], "fans": [{"path": "\\_SB.FAN0", "fst": 2400}]}"#,
        )
        .unwrap();
        assert_eq!(spec.hid, "SAM0429");
        assert_eq!(spec.performance_modes, vec![0x16, 0x15, 0x02]);
        assert_eq!(spec.performance_mode, 0x02);
        assert_eq!(spec.fans[0].fst, Some(2400));
        assert!(spec.fans[0].levels.is_none());
        assert_eq!(spec.fan_candidates()[0].label, "PNP0C0B:00");
    }

    #[test]
    fn test_parse_spec_rejects_bad_json() {
        assert!(EmulatorSpec::from_json("{\"fans\": 3}").is_err());
    }

    #[tokio::test]
    async fn test_settings_require_device_enable() {
        let mut fw = EmulatedFirmware::new(EmulatorSpec::default());
        let req = SettingsBuffer::settings(SASB_USB_CHARGE_GET, GUNM_USB_CHARGE_GET, &[]);
        let AcpiObject::Buffer(resp) = fw
            .evaluate("CSFI", &[AcpiArg::Buffer(req.as_bytes().to_vec())])
            .await
            .unwrap()
        else {
            panic!("expected buffer");
        };
        assert_eq!(resp[RFLG_POS], 0);

        fw.evaluate("SDLS", &[AcpiArg::Integer(1)]).await.unwrap();
        let AcpiObject::Buffer(resp) = fw
            .evaluate("CSFI", &[AcpiArg::Buffer(req.as_bytes().to_vec())])
            .await
            .unwrap()
        else {
            panic!("expected buffer");
        };
        assert_eq!(resp[RFLG_POS], RFLG_SUCCESS);
        assert_eq!(fw.state().lock().unwrap().calls, vec!["CSFI", "SDLS", "CSFI"]);
    }

    #[tokio::test]
    async fn test_failing_method_injection() {
        let spec = EmulatorSpec {
            failing_methods: vec!["SDLS".to_string()],
            ..Default::default()
        };
        let mut fw = EmulatedFirmware::new(spec);
        assert!(matches!(
            fw.evaluate("SDLS", &[AcpiArg::Integer(1)]).await,
            Err(AcpiError::Status(_))
        ));
    }

    #[tokio::test]
    async fn test_fan_methods() {
        let mut fw = EmulatedFirmware::new(EmulatorSpec::default());
        assert!(!fw.has_method("\\_SB.PC00.LPCB.FAN0._FIF").await);
        assert!(fw.has_method("\\_SB.PC00.LPCB.FAN0.FANT").await);
        assert_eq!(
            fw.evaluate(ACPI_FAN_SPEED_VALUE, &[]).await.unwrap(),
            AcpiObject::Integer(1)
        );
        assert!(fw.evaluate("\\_SB.PC00.LPCB.FAN9._FST", &[]).await.is_err());
    }
}
