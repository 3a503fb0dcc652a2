/* galaxybookctl CLI: clap-driven client that talks to galaxybookd over DBus to inspect the
 * laptop, switch keyboard backlight, power and privacy settings, and drive platform profiles. */
mod dbus_client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dbus_client::GalaxybookClient;

/// galaxybookctl: control Samsung Galaxy Book extras via the galaxybookd DBus daemon.
#[derive(Parser)]
#[command(name = "galaxybookctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the device and the state of every available feature.
    Info,

    /// Get or set the keyboard backlight level.
    #[command(name = "kbd-backlight")]
    KbdBacklight {
        /// New level, 0 to the maximum (omit to read current).
        level: Option<u32>,
    },

    /// Get or set whether the laptop starts when the lid is opened (on/off).
    #[command(name = "lid-open")]
    LidOpen {
        /// New value: "on" or "off" (omit to read current).
        value: Option<String>,
    },

    /// Get or set USB charging while powered off (on/off).
    #[command(name = "usb-charge")]
    UsbCharge {
        /// New value: "on" or "off" (omit to read current).
        value: Option<String>,
    },

    /// Get or set whether camera and microphone are allowed (on/off).
    Recording {
        /// New value: "on" or "off" (omit to read current).
        value: Option<String>,
    },

    /// Get or set the battery charge end threshold in percent.
    #[command(name = "charge-threshold")]
    ChargeThreshold {
        /// New threshold, 1 to 100; 100 disables the limit (omit to read current).
        percent: Option<u32>,
    },

    /// Platform profile commands.
    #[command(subcommand)]
    Profile(ProfileCmd),

    /// List fans and their current speed.
    Fans,
}

#[derive(Subcommand)]
enum ProfileCmd {
    /// Show the active platform profile.
    Get,
    /// Switch to a platform profile by name.
    Set {
        /// Profile name, e.g. "balanced" or "low-power".
        name: String,
    },
    /// Switch to the next supported profile.
    Cycle,
    /// List supported profiles.
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = GalaxybookClient::connect()
        .await
        .context("Failed to connect to galaxybookd on org.freedesktop.galaxybook1")?;

    match cli.command {
        Commands::Info => cmd_info(&client).await,
        Commands::KbdBacklight { level } => cmd_kbd_backlight(&client, level).await,
        Commands::LidOpen { value } => {
            cmd_switch(&client, "StartOnLidOpen", "Start on lid open", value).await
        }
        Commands::UsbCharge { value } => {
            cmd_switch(&client, "UsbCharge", "USB charging", value).await
        }
        Commands::Recording { value } => {
            cmd_switch(&client, "AllowRecording", "Recording", value).await
        }
        Commands::ChargeThreshold { percent } => cmd_charge_threshold(&client, percent).await,
        Commands::Profile(sub) => match sub {
            ProfileCmd::Get => cmd_profile_get(&client).await,
            ProfileCmd::Set { name } => cmd_profile_set(&client, &name).await,
            ProfileCmd::Cycle => cmd_profile_cycle(&client).await,
            ProfileCmd::List => cmd_profile_list(&client).await,
        },
        Commands::Fans => cmd_fans(&client).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse an on/off style argument.
fn parse_switch(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Ok(true),
        "off" | "0" | "false" | "no" => Ok(false),
        _ => anyhow::bail!("Invalid value '{}'. Use: on, off", value),
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_info(client: &GalaxybookClient) -> Result<()> {
    let hid = client.get_hid().await?;
    let features = client.get_features().await?;
    let has = |name: &str| features.iter().any(|f| f == name);

    println!("Device:     {}", hid);
    println!("Features:   {}", features.join(", "));

    if has("kbd_backlight") {
        let level = client.get_kbd_backlight().await?;
        let max = client.get_max_kbd_backlight().await?;
        println!("Backlight:  {}/{}", level, max);
    }
    if has("performance_mode") {
        let profile = client.get_profile().await?;
        println!("Profile:    {}", profile);
    }
    if has("battery_threshold") {
        let threshold = client.get_charge_threshold().await?;
        println!("Charge end: {}%", threshold);
    }
    for (feature, prop, label) in [
        ("start_on_lid_open", "StartOnLidOpen", "Lid open:  "),
        ("usb_charge", "UsbCharge", "USB charge:"),
        ("allow_recording", "AllowRecording", "Recording: "),
    ] {
        if has(feature) {
            let value = client.get_switch(prop).await?;
            println!("{} {}", label, on_off(value));
        }
    }
    if has("fan_speed") {
        println!("Fans:       {}", client.list_fans().await?.len());
    }
    Ok(())
}

async fn cmd_kbd_backlight(client: &GalaxybookClient, level: Option<u32>) -> Result<()> {
    match level {
        Some(level) => {
            let max = client.get_max_kbd_backlight().await?;
            anyhow::ensure!(level <= max, "Backlight level {} out of range (0..={})", level, max);
            client.set_kbd_backlight(level).await?;
            println!("Keyboard backlight set to {}.", level);
        }
        None => {
            println!("{}", client.get_kbd_backlight().await?);
        }
    }
    Ok(())
}

async fn cmd_switch(
    client: &GalaxybookClient,
    prop: &str,
    label: &str,
    value: Option<String>,
) -> Result<()> {
    match value {
        Some(v) => {
            let val = parse_switch(&v)?;
            client.set_switch(prop, val).await?;
            println!("{} set to {}.", label, on_off(val));
        }
        None => {
            println!("{}", on_off(client.get_switch(prop).await?));
        }
    }
    Ok(())
}

async fn cmd_charge_threshold(client: &GalaxybookClient, percent: Option<u32>) -> Result<()> {
    match percent {
        Some(percent) => {
            anyhow::ensure!(
                (1..=100).contains(&percent),
                "Charge threshold {} out of range (1..=100)",
                percent
            );
            client.set_charge_threshold(percent).await?;
            println!("Charge end threshold set to {}%.", percent);
        }
        None => {
            println!("{}", client.get_charge_threshold().await?);
        }
    }
    Ok(())
}

async fn cmd_profile_get(client: &GalaxybookClient) -> Result<()> {
    println!("{}", client.get_profile().await?);
    Ok(())
}

async fn cmd_profile_set(client: &GalaxybookClient, name: &str) -> Result<()> {
    let choices = client.get_profile_choices().await?;
    anyhow::ensure!(
        choices.iter().any(|c| c == name),
        "Unsupported profile '{}'. Choose one of: {}",
        name,
        choices.join(", ")
    );
    client.set_profile(name).await?;
    println!("Platform profile set to {}.", name);
    Ok(())
}

async fn cmd_profile_cycle(client: &GalaxybookClient) -> Result<()> {
    let name = client.cycle_profile().await?;
    println!("Platform profile switched to {}.", name);
    Ok(())
}

async fn cmd_profile_list(client: &GalaxybookClient) -> Result<()> {
    let current = client.get_profile().await.ok();
    for choice in client.get_profile_choices().await? {
        let marker = if current.as_deref() == Some(choice.as_str()) {
            " [active]"
        } else {
            ""
        };
        println!("{}{}", choice, marker);
    }
    Ok(())
}

async fn cmd_fans(client: &GalaxybookClient) -> Result<()> {
    let fans = client.list_fans().await?;
    if fans.is_empty() {
        println!("No fans found.");
        return Ok(());
    }
    for (i, fan) in fans.iter().enumerate() {
        let rpm = match &fan.rpm {
            Ok(rpm) => format!("{} RPM", rpm),
            Err(e) => format!("unreadable ({:#})", e),
        };
        println!("{}: {} [{}] {}", i, fan.label, fan.source, rpm);
        if !fan.levels.is_empty() {
            let levels: Vec<String> = fan.levels.iter().map(u32::to_string).collect();
            println!("   levels: {}", levels.join(", "));
        }
    }
    Ok(())
}
