/* Event sources for the hotkey router.
 *
 * Scan codes are taken from the AT keyboard's event node, where the
 * keyboard driver mirrors every raw byte as an `EV_MSC`/`MSC_RAW` event.
 * Firmware notifications arrive as text lines on the acpid socket. */

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use evdev::{Device, EventType, InputEvent, MiscType};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::UnixStream;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::hotkey::{HotkeyRouter, ScancodeFilter};

/* The raw byte carried by an input event, if it is an `MSC_RAW` event. */
fn raw_scancode(event: &InputEvent) -> Option<u8> {
    if event.event_type() == EventType::MISC && event.code() == MiscType::MSC_RAW.0 {
        u8::try_from(event.value()).ok()
    } else {
        None
    }
}

/* Feed every raw scan code in `events` to the router until the stream ends. */
pub async fn route_scancodes<S>(mut events: S, router: &HotkeyRouter) -> Result<()>
where
    S: Stream<Item = io::Result<InputEvent>> + Unpin,
{
    let mut filter = ScancodeFilter::default();
    while let Some(event) = events.next().await {
        let event = event.context("Reading keyboard events")?;
        if let Some(data) = raw_scancode(&event) {
            router.scancode(&mut filter, data);
        }
    }
    Ok(())
}

pub async fn run_scancode_source(devnode: &Path, router: Arc<HotkeyRouter>) -> Result<()> {
    let device = Device::open(devnode).with_context(|| format!("Opening {}", devnode.display()))?;
    let events = device
        .into_event_stream()
        .with_context(|| format!("Polling {}", devnode.display()))?;
    info!("Listening for hotkey scan codes on {}", devnode.display());
    route_scancodes(events, &router).await
}

/* Extract the event code from an acpid event line addressed to `hid`. */
/*  */
/* Lines look like `<class> <bus id> <event> <data>`, e.g. */
/* `samsung/galaxybook SAM0430:00 00000070 00000000`. */
pub fn parse_acpid_event(line: &str, hid: &str) -> Option<u32> {
    let mut fields = line.split_whitespace();
    let _class = fields.next()?;
    let bus_id = fields.next()?;
    let event = fields.next()?;

    let device = bus_id.split(':').next()?;
    if !device.eq_ignore_ascii_case(hid) {
        return None;
    }
    let event = event.trim_start_matches("0x");
    u32::from_str_radix(event, 16).ok()
}

/* Feed notification codes for `hid` read from `reader` to the router until EOF. */
pub async fn route_notifications<R: AsyncBufRead + Unpin>(
    reader: R,
    hid: &str,
    router: &HotkeyRouter,
) -> Result<()> {
    let mut lines = LinesStream::new(tokio::io::AsyncBufReadExt::lines(reader));
    while let Some(line) = lines.next().await {
        let line = line.context("Reading acpid events")?;
        match parse_acpid_event(&line, hid) {
            Some(code) => router.notification(code),
            None => debug!("ignoring acpid event: {}", line),
        }
    }
    Ok(())
}

pub async fn run_notification_source(socket: &Path, hid: String, router: Arc<HotkeyRouter>) -> Result<()> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("Connecting to {}", socket.display()))?;
    info!("Listening for firmware notifications on {}", socket.display());
    route_notifications(BufReader::new(stream), &hid, &router).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{DeferredAction, HotkeyAction};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn raw(value: i32) -> InputEvent {
        InputEvent::new(EventType::MISC, MiscType::MSC_RAW.0, value)
    }

    fn router_for(action: HotkeyAction) -> (HotkeyRouter, mpsc::UnboundedReceiver<HotkeyAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut router = HotkeyRouter::new();
        router.register(DeferredAction::spawn(action, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(action);
            }
        }));
        (router, rx)
    }

    #[test]
    fn test_parse_acpid_event() {
        assert_eq!(
            parse_acpid_event("samsung/galaxybook SAM0430:00 00000070 00000000", "SAM0430"),
            Some(0x70)
        );
        assert_eq!(parse_acpid_event("button/lid LID close", "SAM0430"), None);
        assert_eq!(
            parse_acpid_event("ac_adapter ACPI0003:00 00000080 00000001", "SAM0430"),
            None
        );
        assert_eq!(parse_acpid_event("samsung SAM0430:00", "SAM0430"), None);
    }

    #[test]
    fn test_raw_scancode_only_from_msc_raw() {
        assert_eq!(raw_scancode(&raw(0xe0)), Some(0xe0));
        let scan = InputEvent::new(EventType::MISC, MiscType::MSC_SCAN.0, 0xe0);
        assert_eq!(raw_scancode(&scan), None);
        let key = InputEvent::new(EventType::KEY, 0x2c, 1);
        assert_eq!(raw_scancode(&key), None);
        assert_eq!(raw_scancode(&raw(0x1ff)), None);
    }

    #[tokio::test]
    async fn test_route_scancodes() {
        let (router, mut rx) = router_for(HotkeyAction::AllowRecording);
        let events = tokio_stream::iter(vec![
            Ok(raw(0xe0)),
            Ok(InputEvent::new(EventType::KEY, 0xf0, 0)),
            Ok(raw(0x9f)),
        ]);

        route_scancodes(events, &router).await.unwrap();
        assert_eq!(rx.recv().await, Some(HotkeyAction::AllowRecording));
    }

    #[tokio::test]
    async fn test_route_scancodes_stops_on_read_error() {
        let (router, _rx) = router_for(HotkeyAction::KbdBacklight);
        let events = tokio_stream::iter(vec![
            Ok(raw(0xe0)),
            Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        ]);
        assert!(route_scancodes(events, &router).await.is_err());
    }

    #[tokio::test]
    async fn test_route_notifications() {
        let (router, mut rx) = router_for(HotkeyAction::PerformanceMode);
        let text = "button/lid LID open\nsamsung SAM0430:00 00000061 00000000\n\
                    samsung SAM0430:00 00000070 00000000\n";

        route_notifications(text.as_bytes(), "SAM0430", &router).await.unwrap();
        assert_eq!(rx.recv().await, Some(HotkeyAction::PerformanceMode));
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }
}
