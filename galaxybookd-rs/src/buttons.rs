/* Virtual "extra buttons" input device.
 *
 * Firmware notifications (battery state, performance mode key, device
 * placed on or lifted off a table) are re-emitted through uinput as key
 * presses, so the desktop sees them like keys of a real keyboard. */

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, BusType, EventType, InputEvent, InputId, Key};
use tracing::{debug, info};

use crate::hotkey::{KeyReporter, Notification};

pub const DEVICE_NAME: &str = "Samsung Galaxy Book Extra Buttons";

/* Every key a notification can be reported as. */
pub fn notification_keys() -> AttributeSet<Key> {
    let mut keys = AttributeSet::<Key>::new();
    for code in [0x61, 0x6c, 0x6d, 0x70] {
        if let Some(key) = Notification::from_code(code).key() {
            keys.insert(key);
        }
    }
    keys
}

/* A press and release of `key`, each sent as its own report. */
fn key_tap(key: Key) -> [InputEvent; 2] {
    [
        InputEvent::new(EventType::KEY, key.code(), 1),
        InputEvent::new(EventType::KEY, key.code(), 0),
    ]
}

pub struct ExtraButtons {
    device: Mutex<VirtualDevice>,
}

impl ExtraButtons {
    pub fn create() -> Result<Self> {
        let device = VirtualDeviceBuilder::new()
            .context("Opening /dev/uinput")?
            .name(DEVICE_NAME)
            .input_id(InputId::new(BusType::BUS_HOST, 0, 0, 0))
            .with_keys(&notification_keys())
            .context("Registering notification keys")?
            .build()
            .context("Creating the extra buttons device")?;
        info!("Created input device '{}'", DEVICE_NAME);
        Ok(Self {
            device: Mutex::new(device),
        })
    }
}

impl KeyReporter for ExtraButtons {
    fn report(&self, key: Key) -> Result<()> {
        let mut device = self
            .device
            .lock()
            .map_err(|_| anyhow!("extra buttons device lock poisoned"))?;
        for event in key_tap(key) {
            device.emit(&[event]).context("Writing to uinput")?;
        }
        debug!("reported {:?}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_keys() {
        let keys = notification_keys();
        let mut reported: Vec<Key> = keys.iter().collect();
        reported.sort_by_key(|k| k.code());
        assert_eq!(
            reported,
            vec![Key::KEY_F14, Key::KEY_F15, Key::KEY_PROG3, Key::KEY_BATTERY]
        );
    }

    #[test]
    fn test_key_tap() {
        let [press, release] = key_tap(Key::KEY_PROG3);
        assert_eq!(press.event_type(), EventType::KEY);
        assert_eq!(press.code(), Key::KEY_PROG3.code());
        assert_eq!(press.value(), 1);
        assert_eq!(release.value(), 0);
    }
}
