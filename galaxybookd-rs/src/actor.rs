/* Device Actor: owns the attached Galaxy Book instance.
 *
 * The actor task (`tokio::spawn`) owns the `Galaxybook` and with it the
 * method invoker and all tables. DBus interface objects and hotkey
 * workers talk to it through an `mpsc` channel with `oneshot` replies, so
 * every firmware round trip of the instance is serialized. */

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Feature;
use crate::error::{GalaxybookError, Result};
use crate::fan::Fan;
use crate::galaxybook::Galaxybook;
use crate::hotkey::{DeferredAction, HotkeyAction, HotkeyRouter};
use crate::profile::PlatformProfile;

type Reply<T> = oneshot::Sender<Result<T>>;

/* Commands that DBus objects and hotkey workers send to the actor. */
#[derive(Debug)]
pub enum ActorMessage {
    GetKbdBacklight { reply: Reply<u8> },
    SetKbdBacklight { value: u8, reply: Reply<()> },
    GetStartOnLidOpen { reply: Reply<bool> },
    SetStartOnLidOpen { value: bool, reply: Reply<()> },
    GetUsbCharge { reply: Reply<bool> },
    SetUsbCharge { value: bool, reply: Reply<()> },
    GetAllowRecording { reply: Reply<bool> },
    SetAllowRecording { value: bool, reply: Reply<()> },
    GetChargeThreshold { reply: Reply<u8> },
    SetChargeThreshold { value: u8, reply: Reply<()> },
    GetProfile { reply: Reply<PlatformProfile> },
    SetProfile { profile: PlatformProfile, reply: Reply<()> },
    CycleProfile { reply: Reply<PlatformProfile> },
    FanRpm { index: usize, reply: Reply<u64> },
    /* Run the state change bound to a hotkey. */
    Hotkey { action: HotkeyAction, reply: Reply<()> },
    /* Detach the device and stop the actor. */
    Shutdown { reply: oneshot::Sender<()> },
}

/* A property that a hotkey changed behind the backs of DBus clients. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    KbdBacklight,
    AllowRecording,
    Profile,
}

impl From<HotkeyAction> for DeviceChange {
    fn from(action: HotkeyAction) -> Self {
        match action {
            HotkeyAction::KbdBacklight => Self::KbdBacklight,
            HotkeyAction::AllowRecording => Self::AllowRecording,
            HotkeyAction::PerformanceMode => Self::Profile,
        }
    }
}

#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Device(#[from] GalaxybookError),

    #[error("device actor is no longer running")]
    Gone,
}

/* What the instance looked like once attach finished. None of it changes */
/* for the lifetime of the instance. */
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub hid: String,
    pub features: Vec<Feature>,
    pub max_kbd_backlight: u8,
    pub profile_choices: Vec<PlatformProfile>,
    pub fans: Vec<Fan>,
}

impl DeviceSummary {
    fn of(dev: &Galaxybook) -> Self {
        Self {
            hid: dev.hid().to_string(),
            features: dev.features(),
            max_kbd_backlight: dev.max_kbd_backlight(),
            profile_choices: dev.profile_choices().unwrap_or_default(),
            fans: dev.fans().to_vec(),
        }
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/* Handle used by DBus objects and hotkey workers to reach the actor. */
#[derive(Clone)]
pub struct ActorHandle {
    tx: mpsc::Sender<ActorMessage>,
    changes: broadcast::Sender<DeviceChange>,
}

impl ActorHandle {
    /* Receive every change made by a hotkey from now on. */
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> ActorMessage,
    ) -> std::result::Result<T, ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ActorError::Gone)?;
        Ok(reply_rx.await.map_err(|_| ActorError::Gone)??)
    }

    pub async fn kbd_backlight(&self) -> std::result::Result<u8, ActorError> {
        self.request(|reply| ActorMessage::GetKbdBacklight { reply }).await
    }

    pub async fn set_kbd_backlight(&self, value: u8) -> std::result::Result<(), ActorError> {
        self.request(|reply| ActorMessage::SetKbdBacklight { value, reply })
            .await
    }

    pub async fn start_on_lid_open(&self) -> std::result::Result<bool, ActorError> {
        self.request(|reply| ActorMessage::GetStartOnLidOpen { reply })
            .await
    }

    pub async fn set_start_on_lid_open(&self, value: bool) -> std::result::Result<(), ActorError> {
        self.request(|reply| ActorMessage::SetStartOnLidOpen { value, reply })
            .await
    }

    pub async fn usb_charge(&self) -> std::result::Result<bool, ActorError> {
        self.request(|reply| ActorMessage::GetUsbCharge { reply }).await
    }

    pub async fn set_usb_charge(&self, value: bool) -> std::result::Result<(), ActorError> {
        self.request(|reply| ActorMessage::SetUsbCharge { value, reply })
            .await
    }

    pub async fn allow_recording(&self) -> std::result::Result<bool, ActorError> {
        self.request(|reply| ActorMessage::GetAllowRecording { reply })
            .await
    }

    pub async fn set_allow_recording(&self, value: bool) -> std::result::Result<(), ActorError> {
        self.request(|reply| ActorMessage::SetAllowRecording { value, reply })
            .await
    }

    pub async fn charge_threshold(&self) -> std::result::Result<u8, ActorError> {
        self.request(|reply| ActorMessage::GetChargeThreshold { reply })
            .await
    }

    pub async fn set_charge_threshold(&self, value: u8) -> std::result::Result<(), ActorError> {
        self.request(|reply| ActorMessage::SetChargeThreshold { value, reply })
            .await
    }

    pub async fn profile(&self) -> std::result::Result<PlatformProfile, ActorError> {
        self.request(|reply| ActorMessage::GetProfile { reply }).await
    }

    pub async fn set_profile(&self, profile: PlatformProfile) -> std::result::Result<(), ActorError> {
        self.request(|reply| ActorMessage::SetProfile { profile, reply })
            .await
    }

    pub async fn cycle_profile(&self) -> std::result::Result<PlatformProfile, ActorError> {
        self.request(|reply| ActorMessage::CycleProfile { reply }).await
    }

    pub async fn fan_rpm(&self, index: usize) -> std::result::Result<u64, ActorError> {
        self.request(|reply| ActorMessage::FanRpm { index, reply }).await
    }

    pub async fn run_hotkey(&self, action: HotkeyAction) -> std::result::Result<(), ActorError> {
        self.request(|reply| ActorMessage::Hotkey { action, reply }).await
    }

    /* Detach the device and wait for the actor to finish. */
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ActorMessage::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

struct DeviceActor {
    dev: Galaxybook,
    rx: mpsc::Receiver<ActorMessage>,
    changes: broadcast::Sender<DeviceChange>,
}

impl DeviceActor {
    /* Main actor loop: process messages until shutdown or channel close. */
    async fn run(mut self) {
        info!("Device actor started for {}", self.dev.hid());

        while let Some(msg) = self.rx.recv().await {
            let dev = &mut self.dev;
            match msg {
                ActorMessage::GetKbdBacklight { reply } => {
                    let _ = reply.send(dev.get_kbd_backlight().await);
                }
                ActorMessage::SetKbdBacklight { value, reply } => {
                    let _ = reply.send(dev.set_kbd_backlight(value).await);
                }
                ActorMessage::GetStartOnLidOpen { reply } => {
                    let _ = reply.send(dev.get_start_on_lid_open().await);
                }
                ActorMessage::SetStartOnLidOpen { value, reply } => {
                    let _ = reply.send(dev.set_start_on_lid_open(value).await);
                }
                ActorMessage::GetUsbCharge { reply } => {
                    let _ = reply.send(dev.get_usb_charge().await);
                }
                ActorMessage::SetUsbCharge { value, reply } => {
                    let _ = reply.send(dev.set_usb_charge(value).await);
                }
                ActorMessage::GetAllowRecording { reply } => {
                    let _ = reply.send(dev.get_allow_recording().await);
                }
                ActorMessage::SetAllowRecording { value, reply } => {
                    let _ = reply.send(dev.set_allow_recording(value).await);
                }
                ActorMessage::GetChargeThreshold { reply } => {
                    let _ = reply.send(dev.get_charge_control_end_threshold().await);
                }
                ActorMessage::SetChargeThreshold { value, reply } => {
                    let _ = reply.send(dev.set_charge_control_end_threshold(value).await);
                }
                ActorMessage::GetProfile { reply } => {
                    let _ = reply.send(dev.profile().await);
                }
                ActorMessage::SetProfile { profile, reply } => {
                    let _ = reply.send(dev.set_profile(profile).await);
                }
                ActorMessage::CycleProfile { reply } => {
                    let _ = reply.send(dev.cycle_profile().await);
                }
                ActorMessage::FanRpm { index, reply } => {
                    let _ = reply.send(dev.fan_rpm(index).await);
                }
                ActorMessage::Hotkey { action, reply } => {
                    let result = dev.run_hotkey(action).await;
                    if result.is_ok() {
                        /* nobody listening is fine */
                        let _ = self.changes.send(DeviceChange::from(action));
                    }
                    let _ = reply.send(result);
                }
                ActorMessage::Shutdown { reply } => {
                    info!("Device actor shutting down for {}", dev.hid());
                    self.dev.detach().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        debug!("Device actor channel closed; detaching");
        self.dev.detach().await;
    }
}

/* Spawn the actor for an attached instance. */
pub fn spawn_device_actor(dev: Galaxybook) -> (ActorHandle, DeviceSummary) {
    let summary = DeviceSummary::of(&dev);
    let (tx, rx) = mpsc::channel(16);
    let (changes, _) = broadcast::channel(16);

    let actor = DeviceActor {
        dev,
        rx,
        changes: changes.clone(),
    };
    tokio::spawn(async move {
        actor.run().await;
    });

    (ActorHandle { tx, changes }, summary)
}

/* Build the hotkey router for an instance: one deferred worker per */
/* action whose sub-feature and event source are both enabled. */
pub fn hotkey_router(handle: &ActorHandle, summary: &DeviceSummary) -> HotkeyRouter {
    let mut router = HotkeyRouter::new();

    let wanted = [
        (HotkeyAction::KbdBacklight, Feature::KbdBacklight, Feature::Hotkeys),
        (HotkeyAction::AllowRecording, Feature::AllowRecording, Feature::Hotkeys),
        (HotkeyAction::PerformanceMode, Feature::PerformanceMode, Feature::Notifications),
    ];

    for (action, feature, source) in wanted {
        if !summary.has(feature) || !summary.has(source) {
            continue;
        }
        let handle = handle.clone();
        router.register(DeferredAction::spawn(action, move || {
            let handle = handle.clone();
            async move {
                if let Err(err) = handle.run_hotkey(action).await {
                    warn!("{} hotkey failed: {}", action.name(), err);
                }
            }
        }));
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::emulator::{EmulatedFirmware, EmulatorSpec, FirmwareState};
    use crate::galaxybook::AttachParams;
    use crate::quirks::builtin_quirks;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn spawn(spec: EmulatorSpec) -> (ActorHandle, DeviceSummary, Arc<Mutex<FirmwareState>>) {
        let fans = spec.fan_candidates();
        let hid = spec.hid.clone();
        let fw = EmulatedFirmware::new(spec);
        let state = fw.state();
        let dev = Galaxybook::attach(
            Box::new(fw),
            AttachParams {
                hid: &hid,
                fans: &fans,
                config: &Config::default(),
                quirks: &builtin_quirks(),
            },
        )
        .await
        .unwrap();
        let (handle, summary) = spawn_device_actor(dev);
        (handle, summary, state)
    }

    #[tokio::test]
    async fn test_requests_reach_the_device() {
        let (handle, summary, state) = spawn(EmulatorSpec::default()).await;
        assert_eq!(summary.hid, "SAM0430");
        assert_eq!(summary.max_kbd_backlight, 3);
        assert_eq!(summary.fans.len(), 1);

        handle.set_kbd_backlight(3).await.unwrap();
        assert_eq!(handle.kbd_backlight().await.unwrap(), 3);
        handle.set_profile(PlatformProfile::Performance).await.unwrap();
        assert_eq!(handle.profile().await.unwrap(), PlatformProfile::Performance);
        assert_eq!(handle.fan_rpm(0).await.unwrap(), 2810);
        assert_eq!(state.lock().unwrap().spec.performance_mode, 0x15);
    }

    #[tokio::test]
    async fn test_device_errors_pass_through() {
        let (handle, _, _) = spawn(EmulatorSpec::default()).await;
        assert!(matches!(
            handle.set_profile(PlatformProfile::Quiet).await,
            Err(ActorError::Device(GalaxybookError::UnsupportedProfile(PlatformProfile::Quiet)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_detaches_and_stops() {
        let (handle, _, state) = spawn(EmulatorSpec::default()).await;
        handle.shutdown().await;
        assert!(!state.lock().unwrap().device_enabled);
        assert!(matches!(handle.usb_charge().await, Err(ActorError::Gone)));
    }

    #[tokio::test]
    async fn test_router_only_registers_enabled_actions() {
        let spec = EmulatorSpec {
            reject_enable: vec![crate::sawb::SASB_KBD_BACKLIGHT],
            ..Default::default()
        };
        let (handle, summary, _) = spawn(spec).await;
        let router = hotkey_router(&handle, &summary);
        assert!(!router.handles(HotkeyAction::KbdBacklight));
        assert!(router.handles(HotkeyAction::AllowRecording));
        assert!(router.handles(HotkeyAction::PerformanceMode));
    }

    #[tokio::test]
    async fn test_profile_read_recovers_unknown_mode() {
        let (handle, _, state) = spawn(EmulatorSpec::default()).await;
        state.lock().unwrap().spec.performance_mode = 0x42;
        assert_eq!(handle.profile().await.unwrap(), PlatformProfile::Balanced);
        assert_eq!(state.lock().unwrap().spec.performance_mode, 0x02);
    }

    #[tokio::test]
    async fn test_hotkeys_publish_changes() {
        let (handle, summary, _) = spawn(EmulatorSpec::default()).await;
        let mut changes = handle.subscribe();
        let router = hotkey_router(&handle, &summary);

        router.notification(0x70);
        let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, DeviceChange::Profile);

        /* plain property writes are reported by the bus itself */
        handle.set_kbd_backlight(1).await.unwrap();
        handle.run_hotkey(HotkeyAction::KbdBacklight).await.unwrap();
        assert_eq!(changes.recv().await.unwrap(), DeviceChange::KbdBacklight);
        assert_eq!(handle.kbd_backlight().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_notification_hotkey_cycles_profile() {
        let (handle, summary, state) = spawn(EmulatorSpec::default()).await;
        let router = hotkey_router(&handle, &summary);

        router.notification(0x70);
        for _ in 0..50 {
            if state.lock().unwrap().spec.performance_mode == 0x15 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.profile().await.unwrap(), PlatformProfile::Performance);
    }
}
