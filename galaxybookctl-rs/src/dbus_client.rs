/* galaxybookctl DBus client: low-level helper for the org.freedesktop.galaxybook1 API, wrapping
 * property access and method calls for the device, its platform profile and its fans. */
//! Low-level DBus proxy client for `org.freedesktop.galaxybook1`.
//!
//! All communication with the daemon goes through this module.

use anyhow::{anyhow, Context, Result};
use zbus::zvariant::{OwnedValue, Value};
use zbus::Connection;

const BUS_NAME: &str = "org.freedesktop.galaxybook1";
const DEVICE_PATH: &str = "/org/freedesktop/galaxybook1";
const DEVICE_IFACE: &str = "org.freedesktop.galaxybook1.Device";
const PROFILE_IFACE: &str = "org.freedesktop.galaxybook1.PlatformProfile";
const FAN_IFACE: &str = "org.freedesktop.galaxybook1.Fan";

/// The daemon never publishes more fan objects than this.
const MAX_FANS: usize = 5;

/// One fan object as published by the daemon.
pub struct FanInfo {
    pub label: String,
    pub source: String,
    pub levels: Vec<u32>,
    pub rpm: Result<u32>,
}

/// A client that talks to the `galaxybookd` daemon over the system DBus.
pub struct GalaxybookClient {
    conn: Connection,
}

impl GalaxybookClient {
    /// Connect to the system bus.
    pub async fn connect() -> Result<Self> {
        let conn = Connection::system()
            .await
            .context("Cannot connect to the system DBus")?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Device
    // -----------------------------------------------------------------------

    pub async fn get_hid(&self) -> Result<String> {
        self.get_string_property(DEVICE_PATH, DEVICE_IFACE, "Hid").await
    }

    pub async fn get_features(&self) -> Result<Vec<String>> {
        self.get_vec_string_property(DEVICE_PATH, DEVICE_IFACE, "Features")
            .await
    }

    pub async fn get_kbd_backlight(&self) -> Result<u32> {
        self.get_u32_property(DEVICE_PATH, DEVICE_IFACE, "KbdBacklight")
            .await
    }

    pub async fn get_max_kbd_backlight(&self) -> Result<u32> {
        self.get_u32_property(DEVICE_PATH, DEVICE_IFACE, "MaxKbdBacklight")
            .await
    }

    pub async fn set_kbd_backlight(&self, value: u32) -> Result<()> {
        self.set_property(DEVICE_PATH, DEVICE_IFACE, "KbdBacklight", Value::from(value))
            .await
    }

    /// Read one of the boolean device switches (`StartOnLidOpen`, `UsbCharge`, `AllowRecording`).
    pub async fn get_switch(&self, prop: &str) -> Result<bool> {
        self.get_bool_property(DEVICE_PATH, DEVICE_IFACE, prop).await
    }

    pub async fn set_switch(&self, prop: &str, value: bool) -> Result<()> {
        self.set_property(DEVICE_PATH, DEVICE_IFACE, prop, Value::from(value))
            .await
    }

    pub async fn get_charge_threshold(&self) -> Result<u32> {
        self.get_u32_property(DEVICE_PATH, DEVICE_IFACE, "ChargeControlEndThreshold")
            .await
    }

    pub async fn set_charge_threshold(&self, value: u32) -> Result<()> {
        self.set_property(
            DEVICE_PATH,
            DEVICE_IFACE,
            "ChargeControlEndThreshold",
            Value::from(value),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Platform profile
    // -----------------------------------------------------------------------

    pub async fn get_profile(&self) -> Result<String> {
        self.get_string_property(DEVICE_PATH, PROFILE_IFACE, "Profile")
            .await
    }

    pub async fn set_profile(&self, name: &str) -> Result<()> {
        self.set_property(DEVICE_PATH, PROFILE_IFACE, "Profile", Value::from(name))
            .await
    }

    pub async fn get_profile_choices(&self) -> Result<Vec<String>> {
        self.get_vec_string_property(DEVICE_PATH, PROFILE_IFACE, "Choices")
            .await
    }

    pub async fn cycle_profile(&self) -> Result<String> {
        let reply = self
            .conn
            .call_method(Some(BUS_NAME), DEVICE_PATH, Some(PROFILE_IFACE), "Cycle", &())
            .await
            .context("Cycle call failed")?;
        let name: String = reply.body().deserialize()?;
        Ok(name)
    }

    // -----------------------------------------------------------------------
    // Fans
    // -----------------------------------------------------------------------

    /// Fan objects are numbered from 0 without gaps; stop at the first missing one.
    pub async fn list_fans(&self) -> Result<Vec<FanInfo>> {
        let mut fans = Vec::new();
        for index in 0..MAX_FANS {
            let path = format!("{}/fan{}", DEVICE_PATH, index);
            let Ok(label) = self.get_string_property(&path, FAN_IFACE, "Label").await else {
                break;
            };
            fans.push(FanInfo {
                label,
                source: self.get_string_property(&path, FAN_IFACE, "Source").await?,
                levels: self.get_vec_u32_property(&path, FAN_IFACE, "Levels").await?,
                rpm: self.get_u32_property(&path, FAN_IFACE, "Rpm").await,
            });
        }
        Ok(fans)
    }

    // -----------------------------------------------------------------------
    // Property helpers
    // -----------------------------------------------------------------------

    async fn get_property(&self, path: &str, iface: &str, prop: &str) -> Result<OwnedValue> {
        let reply = self
            .conn
            .call_method(
                Some(BUS_NAME),
                path,
                Some("org.freedesktop.DBus.Properties"),
                "Get",
                &(iface, prop),
            )
            .await
            .with_context(|| format!("Get {}.{} at {} failed", iface, prop, path))?;
        let val: OwnedValue = reply.body().deserialize()?;
        Ok(val)
    }

    async fn set_property(&self, path: &str, iface: &str, prop: &str, value: Value<'_>) -> Result<()> {
        self.conn
            .call_method(
                Some(BUS_NAME),
                path,
                Some("org.freedesktop.DBus.Properties"),
                "Set",
                &(iface, prop, value),
            )
            .await
            .with_context(|| format!("Set {}.{} at {} failed", iface, prop, path))?;
        Ok(())
    }

    /* Fetch a property and convert it to a plain Rust value. */
    async fn get_typed_property<T>(&self, path: &str, iface: &str, prop: &str) -> Result<T>
    where
        T: TryFrom<OwnedValue>,
    {
        let val = self.get_property(path, iface, prop).await?;
        T::try_from(val).map_err(|_| anyhow!("Type mismatch for {}.{} at {}", iface, prop, path))
    }

    async fn get_string_property(&self, path: &str, iface: &str, prop: &str) -> Result<String> {
        self.get_typed_property(path, iface, prop).await
    }

    async fn get_u32_property(&self, path: &str, iface: &str, prop: &str) -> Result<u32> {
        self.get_typed_property(path, iface, prop).await
    }

    async fn get_bool_property(&self, path: &str, iface: &str, prop: &str) -> Result<bool> {
        self.get_typed_property(path, iface, prop).await
    }

    async fn get_vec_u32_property(&self, path: &str, iface: &str, prop: &str) -> Result<Vec<u32>> {
        let val = self.get_property(path, iface, prop).await?;
        extract_u32_array(val).with_context(|| format!("Type mismatch for {}.{} at {}", iface, prop, path))
    }

    async fn get_vec_string_property(&self, path: &str, iface: &str, prop: &str) -> Result<Vec<String>> {
        let val = self.get_property(path, iface, prop).await?;
        extract_string_array(val)
            .with_context(|| format!("Type mismatch for {}.{} at {}", iface, prop, path))
    }
}

// ---------------------------------------------------------------------------
// Free-standing helpers for extracting arrays from OwnedValue
// ---------------------------------------------------------------------------

/// Extract a `Vec<String>` from an `OwnedValue` that wraps an array of strings.
fn extract_string_array(val: OwnedValue) -> Result<Vec<String>> {
    let inner: Value<'_> = val.into();
    match inner {
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for item in arr.iter() {
                match item {
                    Value::Str(s) => out.push(s.to_string()),
                    _ => return Err(anyhow!("Array contains non-string value")),
                }
            }
            Ok(out)
        }
        _ => Err(anyhow!("Value is not an array of strings")),
    }
}

/// Extract a `Vec<u32>` from an `OwnedValue` that wraps an array of u32.
fn extract_u32_array(val: OwnedValue) -> Result<Vec<u32>> {
    let inner: Value<'_> = val.into();
    match inner {
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for value in arr.iter() {
                if let Value::U32(number) = value {
                    out.push(*number);
                } else {
                    return Err(anyhow!("Array contains non-u32 value"));
                }
            }
            Ok(out)
        }
        _ => Err(anyhow!("Value is not an array of u32")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(value: Value<'_>) -> OwnedValue {
        OwnedValue::try_from(value).unwrap()
    }

    #[test]
    fn test_extract_arrays() {
        let levels = owned(Value::from(vec![0u32, 2810, 4810]));
        assert_eq!(extract_u32_array(levels).unwrap(), vec![0, 2810, 4810]);

        let names = owned(Value::from(vec!["low-power", "balanced"]));
        assert_eq!(extract_string_array(names).unwrap(), vec!["low-power", "balanced"]);

        assert!(extract_u32_array(owned(Value::from(vec!["x"]))).is_err());
        assert!(extract_string_array(owned(Value::from(7u32))).is_err());
    }
}
