/* galaxybookd: userspace daemon for the Samsung Galaxy Book firmware
 * extras. Finds the control device, attaches to it, publishes it on the
 * system bus and routes hotkeys until SIGINT or SIGTERM. */
mod acpi;
mod actor;
mod buttons;
mod config;
mod dbus;
#[cfg(any(test, feature = "dev-hooks"))]
mod emulator;
mod error;
mod fan;
mod feature;
mod galaxybook;
mod hotkey;
mod input;
mod invoker;
mod platform;
mod profile;
mod quirks;
mod sawb;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::acpi::{AcpiCallIo, AcpiMethods};
use crate::actor::{ActorHandle, DeviceSummary};
use crate::config::{Config, Feature, DEFAULT_CONFIG_PATH};
use crate::fan::FanCandidate;
use crate::galaxybook::{AttachParams, Galaxybook};
use crate::hotkey::HotkeyRouter;

#[derive(Parser)]
#[command(name = "galaxybookd", version, about)]
struct Args {
    /// Configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,

    /// Run against emulated firmware described by a JSON file.
    #[cfg(feature = "dev-hooks")]
    #[arg(long, value_name = "SPEC_JSON")]
    emulate: Option<PathBuf>,
}

/* The device to attach to and the firmware backend that reaches it. */
struct Target {
    hid: String,
    acpi: Box<dyn AcpiMethods>,
    fans: Vec<FanCandidate>,
}

fn hardware_target(config: &Config) -> Result<Target> {
    anyhow::ensure!(
        nix::unistd::Uid::effective().is_root(),
        "galaxybookd must run as root to reach {}",
        config.acpi_call.display()
    );

    let device = platform::find_control_device()?
        .context("No supported Samsung Galaxy Book control device found")?;
    info!(
        "Found {} at {} ({})",
        device.hid, device.acpi_path, device.sysname
    );

    let fans = platform::find_fans().unwrap_or_else(|e| {
        warn!("Fan enumeration failed: {e:#}");
        Vec::new()
    });

    Ok(Target {
        hid: device.hid,
        acpi: Box::new(AcpiCallIo::new(&config.acpi_call, &device.acpi_path)),
        fans,
    })
}

#[cfg(feature = "dev-hooks")]
fn emulated_target(path: &std::path::Path) -> Result<Target> {
    let spec = emulator::EmulatorSpec::load(path)?;
    warn!("Running against emulated firmware from {}", path.display());
    Ok(Target {
        hid: spec.hid.clone(),
        fans: spec.fan_candidates(),
        acpi: Box::new(emulator::EmulatedFirmware::new(spec)),
    })
}

fn select_target(args: &Args, config: &Config) -> Result<Target> {
    #[cfg(feature = "dev-hooks")]
    if let Some(path) = &args.emulate {
        return emulated_target(path);
    }
    let _ = args;
    hardware_target(config)
}

/* Start the scan-code and notification sources feeding `router`. */
fn start_hotkey_sources(
    config: &Config,
    summary: &DeviceSummary,
    router: Arc<HotkeyRouter>,
) -> Vec<JoinHandle<()>> {
    let mut sources = Vec::new();
    if router.is_empty() {
        info!("No hotkey actions available");
        return sources;
    }

    if summary.has(Feature::Hotkeys) {
        let devnode = match &config.keyboard {
            Some(path) => Some(path.clone()),
            None => platform::find_keyboard().unwrap_or_else(|e| {
                warn!("Keyboard lookup failed: {e:#}");
                None
            }),
        };
        match devnode {
            Some(devnode) => {
                let router = Arc::clone(&router);
                sources.push(tokio::spawn(async move {
                    if let Err(e) = input::run_scancode_source(&devnode, router).await {
                        warn!("Scan-code hotkeys stopped: {e:#}");
                    }
                }));
            }
            None => warn!("No AT keyboard found; scan-code hotkeys are unavailable"),
        }
    }

    if summary.has(Feature::Notifications) {
        let socket = config.acpid_socket.clone();
        let hid = summary.hid.clone();
        sources.push(tokio::spawn(async move {
            if let Err(e) = input::run_notification_source(&socket, hid, router).await {
                warn!("Firmware notifications stopped: {e:#}");
            }
        }));
    }

    sources
}

async fn wait_for_shutdown() -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("Installing SIGTERM handler")?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r.context("Waiting for SIGINT")?,
        _ = term.recv() => {}
    }
    Ok(())
}

async fn teardown(handle: ActorHandle, sources: Vec<JoinHandle<()>>) {
    for source in sources {
        source.abort();
    }
    handle.shutdown().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("galaxybookd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)
        .with_context(|| format!("Loading {}", args.config.display()))?;
    let quirks = quirks::load_quirk_database(&config.quirks_dir);

    let target = select_target(&args, &config)?;
    let dev = Galaxybook::attach(
        target.acpi,
        AttachParams {
            hid: &target.hid,
            fans: &target.fans,
            config: &config,
            quirks: &quirks,
        },
    )
    .await
    .with_context(|| format!("Attaching to {}", target.hid))?;

    let (handle, summary) = actor::spawn_device_actor(dev);
    let mut router = actor::hotkey_router(&handle, &summary);
    if summary.has(Feature::Notifications) {
        match buttons::ExtraButtons::create() {
            Ok(keys) => router.set_key_reporter(Box::new(keys)),
            Err(e) => warn!("Notification keys are unavailable: {e:#}"),
        }
    }
    let router = Arc::new(router);
    let changes = handle.subscribe();
    let mut sources = start_hotkey_sources(&config, &summary, Arc::clone(&router));

    let conn = match dbus::run_server(handle.clone(), &summary).await {
        Ok(conn) => conn,
        Err(e) => {
            teardown(handle, sources).await;
            return Err(e.context("Starting DBus server"));
        }
    };
    sources.push(tokio::spawn(dbus::forward_changes(conn.clone(), changes)));

    if let Err(e) = wait_for_shutdown().await {
        warn!("{e:#}");
    }
    info!("Shutting down");

    drop(conn);
    teardown(handle, sources).await;
    drop(router);
    Ok(())
}
