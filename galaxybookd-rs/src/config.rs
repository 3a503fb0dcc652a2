use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use tracing::{debug, warn};

use crate::acpi::ACPI_CALL_PATH;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/galaxybookd/galaxybookd.conf";
const DEFAULT_QUIRKS_DIR: &str = "/etc/galaxybookd/quirks.d";
const DEFAULT_ACPID_SOCKET: &str = "/var/run/acpid.socket";

/* Per-level correction applied to firmware-reported fan speeds */
pub const DEFAULT_FAN_LEVEL_OFFSET: u64 = 0x0a;
/* Extra speed synthesized for the level above the last reported one */
pub const DEFAULT_FAN_TOP_LEVEL_BONUS: u64 = 1000;

/* Every sub-feature that can be switched off by a quirk or by the administrator. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    KbdBacklight,
    BatteryThreshold,
    PerformanceMode,
    AllowRecording,
    StartOnLidOpen,
    UsbCharge,
    FanSpeed,
    Hotkeys,
    Notifications,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::KbdBacklight,
        Feature::BatteryThreshold,
        Feature::PerformanceMode,
        Feature::AllowRecording,
        Feature::StartOnLidOpen,
        Feature::UsbCharge,
        Feature::FanSpeed,
        Feature::Hotkeys,
        Feature::Notifications,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::KbdBacklight => "kbd_backlight",
            Self::BatteryThreshold => "battery_threshold",
            Self::PerformanceMode => "performance_mode",
            Self::AllowRecording => "allow_recording",
            Self::StartOnLidOpen => "start_on_lid_open",
            Self::UsbCharge => "usb_charge",
            Self::FanSpeed => "fan_speed",
            Self::Hotkeys => "hotkeys",
            Self::Notifications => "notifications",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.key() == key)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/* Fan speed table corrections. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanCorrection {
    pub level_offset: u64,
    pub top_level_bonus: u64,
}

impl Default for FanCorrection {
    fn default() -> Self {
        Self {
            level_offset: DEFAULT_FAN_LEVEL_OFFSET,
            top_level_bonus: DEFAULT_FAN_TOP_LEVEL_BONUS,
        }
    }
}

/* Daemon configuration loaded from `galaxybookd.conf`. */
#[derive(Debug, Clone)]
pub struct Config {
    /* Administrator overrides; a feature absent here is not overridden. */
    pub overrides: HashMap<Feature, bool>,
    pub fan: FanCorrection,
    pub quirks_dir: PathBuf,
    pub acpi_call: PathBuf,
    /* Keyboard event node; discovered through udev when unset. */
    pub keyboard: Option<PathBuf>,
    pub acpid_socket: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            fan: FanCorrection::default(),
            quirks_dir: PathBuf::from(DEFAULT_QUIRKS_DIR),
            acpi_call: PathBuf::from(ACPI_CALL_PATH),
            keyboard: None,
            acpid_socket: PathBuf::from(DEFAULT_ACPID_SOCKET),
        }
    }
}

impl Config {
    /* Load the configuration file. A missing file yields the defaults. */
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path.display(), e))?;
        Ok(Self::from_ini(&ini))
    }

    /* Build a configuration from parsed INI data. Malformed values are */
    /* logged and left at their defaults. */
    pub fn from_ini(ini: &Ini) -> Self {
        let mut config = Self::default();

        for feature in Feature::ALL {
            match ini.getboolcoerce("features", feature.key()) {
                Ok(Some(enabled)) => {
                    config.overrides.insert(feature, enabled);
                }
                Ok(None) => {}
                Err(err) => warn!("Ignoring [Features] {}: {}", feature, err),
            }
        }

        if let Some(v) = read_uint(ini, "fan", "level_offset") {
            config.fan.level_offset = v;
        }
        if let Some(v) = read_uint(ini, "fan", "top_level_bonus") {
            config.fan.top_level_bonus = v;
        }

        if let Some(dir) = ini.get("daemon", "quirks_dir") {
            config.quirks_dir = PathBuf::from(dir);
        }
        if let Some(path) = ini.get("daemon", "acpi_call") {
            config.acpi_call = PathBuf::from(path);
        }
        if let Some(path) = ini.get("daemon", "keyboard") {
            config.keyboard = Some(PathBuf::from(path));
        }
        if let Some(path) = ini.get("daemon", "acpid_socket") {
            config.acpid_socket = PathBuf::from(path);
        }

        config
    }

    pub fn override_for(&self, feature: Feature) -> Option<bool> {
        self.overrides.get(&feature).copied()
    }
}

fn read_uint(ini: &Ini, section: &str, key: &str) -> Option<u64> {
    match ini.getuint(section, key) {
        Ok(v) => v,
        Err(err) => {
            warn!("Ignoring [{}] {}: {}", section, key, err);
            None
        }
    }
}
