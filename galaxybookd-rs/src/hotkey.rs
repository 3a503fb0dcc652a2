/* Hotkey router.
 *
 * Two sources feed hotkeys: raw keyboard scan codes and firmware
 * notifications. Neither source may wait on the firmware, so each action
 * is handed to its own deferred worker. A worker runs at most one instance
 * of its action at a time, and triggers that arrive while the action is
 * pending or running collapse into a single follow-up run.
 *
 * Known notifications are also reported as key presses to a
 * `KeyReporter`, when one is installed. */

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use evdev::Key;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/* Scan-code escape that introduces a two-byte sequence */
pub const KEY_PREFIX_EXTENDED: u8 = 0xe0;

pub const KEY_KBD_BACKLIGHT_KEYDOWN: u8 = 0x2c;
pub const KEY_KBD_BACKLIGHT_KEYUP: u8 = 0xac;
pub const KEY_ALLOW_RECORDING_KEYDOWN: u8 = 0x1f;
pub const KEY_ALLOW_RECORDING_KEYUP: u8 = 0x9f;

pub const ACPI_NOTIFY_BATTERY_STATE_CHANGED: u32 = 0x61;
pub const ACPI_NOTIFY_DEVICE_ON_TABLE: u32 = 0x6c;
pub const ACPI_NOTIFY_DEVICE_OFF_TABLE: u32 = 0x6d;
pub const ACPI_NOTIFY_HOTKEY_PERFORMANCE_MODE: u32 = 0x70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotkeyAction {
    /* Step the keyboard backlight, wrapping to off after the maximum */
    KbdBacklight,
    /* Toggle the camera/microphone block */
    AllowRecording,
    /* Advance to the next platform profile */
    PerformanceMode,
}

impl HotkeyAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::KbdBacklight => "kbd_backlight",
            Self::AllowRecording => "allow_recording",
            Self::PerformanceMode => "performance_mode",
        }
    }
}

/* Tracks the extended-sequence state of the scan-code stream. */
#[derive(Debug, Default)]
pub struct ScancodeFilter {
    extended: bool,
}

impl ScancodeFilter {
    /* Feed one raw byte. Returns the action bound to a completed key release. */
    pub fn feed(&mut self, data: u8) -> Option<HotkeyAction> {
        if data == KEY_PREFIX_EXTENDED {
            self.extended = true;
            return None;
        }
        if !self.extended {
            return None;
        }
        self.extended = false;

        match data {
            KEY_KBD_BACKLIGHT_KEYDOWN => {
                debug!("hotkey: kbd_backlight keydown");
                None
            }
            KEY_KBD_BACKLIGHT_KEYUP => {
                debug!("hotkey: kbd_backlight keyup");
                Some(HotkeyAction::KbdBacklight)
            }
            KEY_ALLOW_RECORDING_KEYDOWN => {
                debug!("hotkey: allow_recording keydown");
                None
            }
            KEY_ALLOW_RECORDING_KEYUP => {
                debug!("hotkey: allow_recording keyup");
                Some(HotkeyAction::AllowRecording)
            }
            _ => None,
        }
    }
}

/* A firmware notification event. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    BatteryStateChanged,
    DeviceOnTable,
    DeviceOffTable,
    PerformanceModeHotkey,
    Unknown(u32),
}

impl Notification {
    pub fn from_code(code: u32) -> Self {
        match code {
            ACPI_NOTIFY_BATTERY_STATE_CHANGED => Self::BatteryStateChanged,
            ACPI_NOTIFY_DEVICE_ON_TABLE => Self::DeviceOnTable,
            ACPI_NOTIFY_DEVICE_OFF_TABLE => Self::DeviceOffTable,
            ACPI_NOTIFY_HOTKEY_PERFORMANCE_MODE => Self::PerformanceModeHotkey,
            other => Self::Unknown(other),
        }
    }

    pub fn action(self) -> Option<HotkeyAction> {
        match self {
            Self::PerformanceModeHotkey => Some(HotkeyAction::PerformanceMode),
            _ => None,
        }
    }

    /* The key this notification is reported as. */
    pub fn key(self) -> Option<Key> {
        match self {
            Self::BatteryStateChanged => Some(Key::KEY_BATTERY),
            Self::PerformanceModeHotkey => Some(Key::KEY_PROG3),
            Self::DeviceOnTable => Some(Key::KEY_F14),
            Self::DeviceOffTable => Some(Key::KEY_F15),
            Self::Unknown(_) => None,
        }
    }
}

/* Sink for notification key presses. */
pub trait KeyReporter: Send + Sync {
    fn report(&self, key: Key) -> anyhow::Result<()>;
}

/* One fixed worker per hotkey action. */
pub struct DeferredAction {
    action: HotkeyAction,
    pending: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DeferredAction {
    pub fn spawn<F, Fut>(action: HotkeyAction, mut work: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let pending = Arc::new(Notify::new());
        let waiter = Arc::clone(&pending);
        let task = tokio::spawn(async move {
            loop {
                waiter.notified().await;
                debug!("running {} hotkey work", action.name());
                work().await;
            }
        });

        Self {
            action,
            pending,
            task,
        }
    }

    /* Schedule a run. Never blocks; coalesces with a run already pending. */
    pub fn trigger(&self) {
        self.pending.notify_one();
    }

    pub fn action(&self) -> HotkeyAction {
        self.action
    }
}

impl Drop for DeferredAction {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/* Routes events from both sources to the registered workers. Shared by */
/* the source tasks through an `Arc`. */
#[derive(Default)]
pub struct HotkeyRouter {
    workers: HashMap<HotkeyAction, DeferredAction>,
    keys: Option<Box<dyn KeyReporter>>,
}

impl HotkeyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: DeferredAction) {
        self.workers.insert(worker.action(), worker);
    }

    pub fn handles(&self, action: HotkeyAction) -> bool {
        self.workers.contains_key(&action)
    }

    pub fn set_key_reporter(&mut self, keys: Box<dyn KeyReporter>) {
        self.keys = Some(keys);
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty() && self.keys.is_none()
    }

    /* Trigger `action` if a worker is registered for it. */
    pub fn dispatch(&self, action: HotkeyAction) -> bool {
        match self.workers.get(&action) {
            Some(worker) => {
                worker.trigger();
                true
            }
            None => {
                debug!("no worker for {} hotkey", action.name());
                false
            }
        }
    }

    /* Handle one raw scan-code byte. */
    pub fn scancode(&self, filter: &mut ScancodeFilter, data: u8) {
        if let Some(action) = filter.feed(data) {
            self.dispatch(action);
        }
    }

    /* Handle one firmware notification code. */
    pub fn notification(&self, code: u32) {
        debug!("notification event: 0x{:x}", code);
        let event = Notification::from_code(code);
        if let Some(action) = event.action() {
            self.dispatch(action);
        }

        let Some(key) = event.key() else {
            warn!("unknown notification event: 0x{:x}", code);
            return;
        };
        match &self.keys {
            Some(keys) => {
                if let Err(e) = keys.report(key) {
                    warn!("Failed to report {:?} as {:?}: {e:#}", event, key);
                }
            }
            None => info!("notification event: {:?}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn recording_worker(action: HotkeyAction) -> (DeferredAction, mpsc::UnboundedReceiver<HotkeyAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = DeferredAction::spawn(action, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(action);
            }
        });
        (worker, rx)
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<HotkeyAction>) {
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[test]
    fn test_extended_release_triggers_once() {
        let mut filter = ScancodeFilter::default();
        assert_eq!(filter.feed(0xe0), None);
        assert_eq!(filter.feed(0xac), Some(HotkeyAction::KbdBacklight));
        assert_eq!(filter.feed(0xac), None);
    }

    #[test]
    fn test_bare_release_is_ignored() {
        let mut filter = ScancodeFilter::default();
        assert_eq!(filter.feed(0xac), None);
        assert_eq!(filter.feed(0x9f), None);
    }

    #[test]
    fn test_press_consumes_the_escape() {
        let mut filter = ScancodeFilter::default();
        assert_eq!(filter.feed(0xe0), None);
        assert_eq!(filter.feed(0x1f), None);
        assert_eq!(filter.feed(0x9f), None);
        assert_eq!(filter.feed(0xe0), None);
        assert_eq!(filter.feed(0x9f), Some(HotkeyAction::AllowRecording));
    }

    #[test]
    fn test_notification_codes() {
        assert_eq!(Notification::from_code(0x70).action(), Some(HotkeyAction::PerformanceMode));
        assert_eq!(Notification::from_code(0x61), Notification::BatteryStateChanged);
        assert_eq!(Notification::from_code(0x6c), Notification::DeviceOnTable);
        assert_eq!(Notification::from_code(0x6d).action(), None);
        assert_eq!(Notification::from_code(0x99), Notification::Unknown(0x99));
    }

    #[tokio::test]
    async fn test_escape_sequence_schedules_one_backlight_step() {
        let (worker, mut rx) = recording_worker(HotkeyAction::KbdBacklight);
        let mut router = HotkeyRouter::new();
        router.register(worker);

        let mut filter = ScancodeFilter::default();
        router.scancode(&mut filter, 0xac);
        router.scancode(&mut filter, 0xe0);
        router.scancode(&mut filter, 0xac);

        assert_eq!(rx.recv().await, Some(HotkeyAction::KbdBacklight));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_pending_triggers_coalesce() {
        let (worker, mut rx) = recording_worker(HotkeyAction::PerformanceMode);
        worker.trigger();
        worker.trigger();
        worker.trigger();

        assert_eq!(rx.recv().await, Some(HotkeyAction::PerformanceMode));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_trigger_while_running_reruns_once() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::unbounded_channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(release_rx));
        let worker = DeferredAction::spawn(HotkeyAction::AllowRecording, move || {
            let started_tx = started_tx.clone();
            let release_rx = Arc::clone(&release_rx);
            async move {
                let _ = started_tx.send(());
                release_rx.lock().await.recv().await;
            }
        });

        worker.trigger();
        started_rx.recv().await.unwrap();
        worker.trigger();
        worker.trigger();
        release_tx.send(()).unwrap();

        started_rx.recv().await.unwrap();
        release_tx.send(()).unwrap();
        assert!(timeout(Duration::from_millis(50), started_rx.recv()).await.is_err());
    }

    #[derive(Default)]
    struct RecordedKeys(std::sync::Mutex<Vec<Key>>);

    impl KeyReporter for Arc<RecordedKeys> {
        fn report(&self, key: Key) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(key);
            Ok(())
        }
    }

    #[test]
    fn test_notification_keymap() {
        assert_eq!(Notification::from_code(0x61).key(), Some(Key::KEY_BATTERY));
        assert_eq!(Notification::from_code(0x70).key(), Some(Key::KEY_PROG3));
        assert_eq!(Notification::from_code(0x6c).key(), Some(Key::KEY_F14));
        assert_eq!(Notification::from_code(0x6d).key(), Some(Key::KEY_F15));
        assert_eq!(Notification::from_code(0x99).key(), None);
    }

    #[tokio::test]
    async fn test_notifications_are_reported_as_keys() {
        let (profile, mut profile_rx) = recording_worker(HotkeyAction::PerformanceMode);
        let keys = Arc::new(RecordedKeys::default());
        let mut router = HotkeyRouter::new();
        assert!(router.is_empty());
        router.set_key_reporter(Box::new(Arc::clone(&keys)));
        assert!(!router.is_empty());
        router.register(profile);

        router.notification(0x6c);
        router.notification(0x99);
        router.notification(0x70);
        router.notification(0x61);

        assert_eq!(profile_rx.recv().await, Some(HotkeyAction::PerformanceMode));
        assert_eq!(
            *keys.0.lock().unwrap(),
            vec![Key::KEY_F14, Key::KEY_PROG3, Key::KEY_BATTERY]
        );
    }

    #[tokio::test]
    async fn test_actions_are_routed_independently() {
        let (backlight, mut backlight_rx) = recording_worker(HotkeyAction::KbdBacklight);
        let (profile, mut profile_rx) = recording_worker(HotkeyAction::PerformanceMode);
        let mut router = HotkeyRouter::new();
        router.register(backlight);
        router.register(profile);

        router.notification(0x70);
        router.notification(0x61);
        assert!(!router.dispatch(HotkeyAction::AllowRecording));

        assert_eq!(profile_rx.recv().await, Some(HotkeyAction::PerformanceMode));
        assert_quiet(&mut backlight_rx).await;
    }
}
