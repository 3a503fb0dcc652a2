use zbus::fdo;
use zbus::interface;

use crate::actor::{ActorHandle, DeviceSummary};

/* The org.freedesktop.galaxybook1.Device interface. */
/*  */
/* Every read goes to the firmware; nothing is cached on this side. */
pub struct GalaxybookDevice {
    handle: ActorHandle,
    summary: DeviceSummary,
}

impl GalaxybookDevice {
    pub fn new(handle: ActorHandle, summary: DeviceSummary) -> Self {
        Self { handle, summary }
    }
}

fn to_u8(value: u32, what: &str) -> fdo::Result<u8> {
    u8::try_from(value).map_err(|_| fdo::Error::InvalidArgs(format!("{what} {value} is out of range")))
}

#[interface(name = "org.freedesktop.galaxybook1.Device")]
impl GalaxybookDevice {
    /* Hardware ID of the control device, e.g. SAM0430. */
    #[zbus(property)]
    async fn hid(&self) -> String {
        self.summary.hid.clone()
    }

    /* Names of the sub-features that survived attach. */
    #[zbus(property)]
    async fn features(&self) -> Vec<String> {
        self.summary
            .features
            .iter()
            .map(|f| f.key().to_string())
            .collect()
    }

    #[zbus(property)]
    async fn kbd_backlight(&self) -> fdo::Result<u32> {
        Ok(self.handle.kbd_backlight().await?.into())
    }

    #[zbus(property)]
    async fn set_kbd_backlight(&self, value: u32) -> fdo::Result<()> {
        Ok(self.handle.set_kbd_backlight(to_u8(value, "brightness")?).await?)
    }

    #[zbus(property)]
    async fn max_kbd_backlight(&self) -> u32 {
        self.summary.max_kbd_backlight.into()
    }

    #[zbus(property)]
    async fn start_on_lid_open(&self) -> fdo::Result<bool> {
        Ok(self.handle.start_on_lid_open().await?)
    }

    #[zbus(property)]
    async fn set_start_on_lid_open(&self, value: bool) -> fdo::Result<()> {
        Ok(self.handle.set_start_on_lid_open(value).await?)
    }

    /* Charging over USB while powered off. */
    #[zbus(property)]
    async fn usb_charge(&self) -> fdo::Result<bool> {
        Ok(self.handle.usb_charge().await?)
    }

    #[zbus(property)]
    async fn set_usb_charge(&self, value: bool) -> fdo::Result<()> {
        Ok(self.handle.set_usb_charge(value).await?)
    }

    /* False while the camera and microphone are blocked. */
    #[zbus(property)]
    async fn allow_recording(&self) -> fdo::Result<bool> {
        Ok(self.handle.allow_recording().await?)
    }

    #[zbus(property)]
    async fn set_allow_recording(&self, value: bool) -> fdo::Result<()> {
        Ok(self.handle.set_allow_recording(value).await?)
    }

    /* Percent; 100 means charging is not limited. */
    #[zbus(property)]
    async fn charge_control_end_threshold(&self) -> fdo::Result<u32> {
        Ok(self.handle.charge_threshold().await?.into())
    }

    #[zbus(property)]
    async fn set_charge_control_end_threshold(&self, value: u32) -> fdo::Result<()> {
        Ok(self
            .handle
            .set_charge_threshold(to_u8(value, "threshold")?)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_u8() {
        assert_eq!(to_u8(3, "brightness").unwrap(), 3);
        assert!(matches!(to_u8(256, "threshold"), Err(fdo::Error::InvalidArgs(_))));
    }
}
