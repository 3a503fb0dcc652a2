pub mod device;
pub mod fan;
pub mod profile;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use zbus::connection::Builder;
use zbus::Connection;

use crate::actor::{ActorError, ActorHandle, DeviceChange, DeviceSummary};
use crate::config::Feature;
use crate::error::GalaxybookError;

pub const BUS_NAME: &str = "org.freedesktop.galaxybook1";
pub const DEVICE_PATH: &str = "/org/freedesktop/galaxybook1";

impl From<ActorError> for zbus::fdo::Error {
    fn from(err: ActorError) -> Self {
        let msg = err.to_string();
        match err {
            ActorError::Device(
                GalaxybookError::FeatureDisabled(_) | GalaxybookError::UnsupportedProfile(_),
            ) => zbus::fdo::Error::NotSupported(msg),
            ActorError::Device(GalaxybookError::InvalidArgument(_)) => {
                zbus::fdo::Error::InvalidArgs(msg)
            }
            _ => zbus::fdo::Error::IOError(msg),
        }
    }
}

fn fan_path(index: usize) -> String {
    format!("{}/fan{}", DEVICE_PATH, index)
}

/* Connect to the system bus and publish the device, its platform profile */
/* and its fans. The returned connection keeps the objects alive. */
pub async fn run_server(handle: ActorHandle, summary: &DeviceSummary) -> Result<zbus::Connection> {
    let mut builder = Builder::system()?.name(BUS_NAME)?.serve_at(
        DEVICE_PATH,
        device::GalaxybookDevice::new(handle.clone(), summary.clone()),
    )?;

    if summary.has(Feature::PerformanceMode) {
        builder = builder.serve_at(
            DEVICE_PATH,
            profile::GalaxybookProfile::new(handle.clone(), summary.profile_choices.clone()),
        )?;
    }

    if summary.has(Feature::FanSpeed) {
        for (index, fan) in summary.fans.iter().enumerate() {
            builder = builder.serve_at(
                fan_path(index),
                fan::GalaxybookFan::new(handle.clone(), index, fan.clone()),
            )?;
        }
    }

    let conn = builder.build().await?;
    info!(
        "DBus server ready on {} ({} fan objects)",
        BUS_NAME,
        if summary.has(Feature::FanSpeed) {
            summary.fans.len()
        } else {
            0
        }
    );
    Ok(conn)
}

/* Emit PropertiesChanged for one hotkey-driven change. */
async fn emit_change(conn: &Connection, change: DeviceChange) -> zbus::Result<()> {
    let object_server = conn.object_server();
    match change {
        DeviceChange::KbdBacklight | DeviceChange::AllowRecording => {
            let iface_ref = object_server
                .interface::<_, device::GalaxybookDevice>(DEVICE_PATH)
                .await?;
            let iface = iface_ref.get().await;
            if change == DeviceChange::KbdBacklight {
                iface.kbd_backlight_changed(iface_ref.signal_emitter()).await?;
            } else {
                iface.allow_recording_changed(iface_ref.signal_emitter()).await?;
            }
        }
        DeviceChange::Profile => {
            let iface_ref = object_server
                .interface::<_, profile::GalaxybookProfile>(DEVICE_PATH)
                .await?;
            iface_ref
                .get()
                .await
                .profile_changed(iface_ref.signal_emitter())
                .await?;
        }
    }
    Ok(())
}

/* Forward hotkey changes to bus clients until the actor goes away. */
pub async fn forward_changes(conn: Connection, mut changes: broadcast::Receiver<DeviceChange>) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                debug!("hotkey changed {:?}", change);
                if let Err(e) = emit_change(&conn, change).await {
                    warn!("Failed to signal {:?}: {e}", change);
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Dropped {} change notifications", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::PlatformProfile;

    #[test]
    fn test_error_mapping() {
        let err: zbus::fdo::Error =
            ActorError::Device(GalaxybookError::FeatureDisabled(Feature::UsbCharge)).into();
        assert!(matches!(err, zbus::fdo::Error::NotSupported(_)));

        let err: zbus::fdo::Error =
            ActorError::Device(GalaxybookError::UnsupportedProfile(PlatformProfile::Quiet)).into();
        assert!(matches!(err, zbus::fdo::Error::NotSupported(_)));

        let err: zbus::fdo::Error =
            ActorError::Device(GalaxybookError::InvalidArgument("x".to_string())).into();
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));

        let err: zbus::fdo::Error = ActorError::Gone.into();
        assert!(matches!(err, zbus::fdo::Error::IOError(_)));
    }

    #[test]
    fn test_fan_path() {
        assert_eq!(fan_path(1), "/org/freedesktop/galaxybook1/fan1");
    }
}
