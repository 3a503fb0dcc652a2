/* udev discovery of the firmware control device, its fans and the
 * keyboard whose raw scan codes carry the hotkeys. */

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::fan::{FanCandidate, ACPI_FAN_DEVICE_ID};
use crate::quirks::SUPPORTED_HIDS;

/* Name the kernel gives the built-in AT keyboard */
const AT_KEYBOARD_NAME: &str = "AT Translated Set 2 keyboard";

/* The firmware control device the daemon binds to. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDevice {
    pub hid: String,
    pub sysname: String,
    /* Absolute firmware path, e.g. `\_SB_.PC00.LPCB.SAM0` */
    pub acpi_path: String,
}

/* Hardware ID part of an ACPI sysname such as `SAM0430:00`. */
fn hid_of(sysname: &str) -> &str {
    sysname.split(':').next().unwrap_or(sysname)
}

/* The supported hardware ID an ACPI sysname belongs to, if any. */
pub fn supported_hid(sysname: &str) -> Option<&'static str> {
    let hid = hid_of(sysname);
    SUPPORTED_HIDS
        .iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(hid))
}

fn acpi_devices() -> Result<Vec<udev::Device>> {
    let mut enumerator = udev::Enumerator::new().context("Creating udev enumerator")?;
    enumerator
        .match_subsystem("acpi")
        .context("Filtering udev devices")?;
    Ok(enumerator
        .scan_devices()
        .context("Scanning ACPI devices")?
        .collect())
}

fn attribute(device: &udev::Device, name: &str) -> Option<String> {
    device
        .attribute_value(name)
        .map(|v| v.to_string_lossy().trim().to_string())
        .filter(|v| !v.is_empty())
}

/* Find the first supported control device. */
pub fn find_control_device() -> Result<Option<ControlDevice>> {
    for device in acpi_devices()? {
        let sysname = device.sysname().to_string_lossy().into_owned();
        let Some(hid) = supported_hid(&sysname) else {
            continue;
        };
        let Some(acpi_path) = attribute(&device, "path") else {
            debug!("{} has no firmware path; skipping", sysname);
            continue;
        };
        return Ok(Some(ControlDevice {
            hid: hid.to_string(),
            sysname,
            acpi_path,
        }));
    }
    Ok(None)
}

/* Enumerate fan devices by hardware ID. */
pub fn find_fans() -> Result<Vec<FanCandidate>> {
    let mut fans = Vec::new();
    for device in acpi_devices()? {
        let sysname = device.sysname().to_string_lossy().into_owned();
        if hid_of(&sysname) != ACPI_FAN_DEVICE_ID {
            continue;
        }
        let Some(path) = attribute(&device, "path") else {
            continue;
        };
        let label = attribute(&device, "description").unwrap_or_else(|| sysname.clone());
        fans.push(FanCandidate { label, path });
    }
    Ok(fans)
}

/* Find the event node of the built-in AT keyboard. */
pub fn find_keyboard() -> Result<Option<PathBuf>> {
    let mut enumerator = udev::Enumerator::new().context("Creating udev enumerator")?;
    enumerator
        .match_subsystem("input")
        .context("Filtering udev devices")?;
    enumerator
        .match_property("ID_INPUT_KEYBOARD", "1")
        .context("Filtering udev devices")?;

    for device in enumerator.scan_devices().context("Scanning input devices")? {
        let Some(devnode) = device.devnode() else {
            continue;
        };
        if !device.sysname().to_string_lossy().starts_with("event") {
            continue;
        }
        let name = device
            .parent()
            .and_then(|p| attribute(&p, "name"))
            .unwrap_or_default();
        if name == AT_KEYBOARD_NAME {
            return Ok(Some(devnode.to_path_buf()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_hid() {
        assert_eq!(supported_hid("SAM0430:00"), Some("SAM0430"));
        assert_eq!(supported_hid("sam0427:01"), Some("SAM0427"));
        assert_eq!(supported_hid("SAM0426:00"), None);
        assert_eq!(supported_hid("PNP0C0B:00"), None);
    }

    #[test]
    fn test_hid_of() {
        assert_eq!(hid_of("PNP0C0B:02"), "PNP0C0B");
        assert_eq!(hid_of("LNXSYSTM"), "LNXSYSTM");
    }
}
