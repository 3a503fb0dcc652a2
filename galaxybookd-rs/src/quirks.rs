use std::collections::{HashMap, HashSet};
use std::path::Path;

use configparser::ini::Ini;
use tracing::{debug, info, warn};

use crate::config::{Config, Feature};
use crate::profile::ModeCodes;

/* Firmware hardware IDs of the supported control device. */
pub const SUPPORTED_HIDS: [&str; 4] = ["SAM0427", "SAM0428", "SAM0429", "SAM0430"];

/* Per-model capability record, keyed by hardware ID. */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuirkRecord {
    pub name: Option<String>,
    pub disabled: HashSet<Feature>,
    /* Replacement mode-code table; `None` keeps the default codes. */
    pub mode_codes: Option<ModeCodes>,
}

/* Quirk database: maps a hardware ID to its `QuirkRecord`. */
pub type QuirkDb = HashMap<String, QuirkRecord>;

/* Built-in records. Every supported model currently runs on the defaults. */
pub fn builtin_quirks() -> QuirkDb {
    SUPPORTED_HIDS
        .iter()
        .map(|hid| (hid.to_string(), QuirkRecord::default()))
        .collect()
}

/* Load the built-in records and every `.quirk` file from `dir` on top. */
/*  */
/* A file record replaces the built-in record of each hardware ID listed */
/* in its `Match=` field. */
pub fn load_quirk_database(dir: &Path) -> QuirkDb {
    let mut db = builtin_quirks();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(err) => {
            debug!("No quirk files loaded from {:?}: {}", dir, err);
            return db;
        }
    };

    for dir_entry in entries.flatten() {
        let path = dir_entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("quirk") {
            continue;
        }

        let mut ini = Ini::new();
        let parsed = ini
            .load(&path)
            .map_err(|e| format!("INI parse error: {}", e))
            .and_then(|_| parse_quirk(&ini));
        match parsed {
            Ok((hids, record)) => {
                debug!("Loaded quirk {:?} for {}", path, hids.join(";"));
                for hid in hids {
                    db.insert(hid, record.clone());
                }
            }
            Err(err) => warn!("Failed to parse {:?}: {}", path, err),
        }
    }

    debug!("Quirk database loaded: {} entries", db.len());
    db
}

/* Parse one quirk file into the hardware IDs it matches and its record. */
fn parse_quirk(ini: &Ini) -> Result<(Vec<String>, QuirkRecord), String> {
    let match_str = ini.get("quirk", "match").ok_or("Missing [Quirk] Match")?;
    let hids = parse_matches(&match_str)?;

    let mut record = QuirkRecord {
        name: ini.get("quirk", "name"),
        ..Default::default()
    };

    if let Some(disable) = ini.get("quirk", "disable") {
        for key in disable.split(';').map(str::trim).filter(|k| !k.is_empty()) {
            let feature =
                Feature::from_key(key).ok_or_else(|| format!("Unknown feature '{}' in Disable", key))?;
            record.disabled.insert(feature);
        }
    }

    if let Some(section) = ini.get_map_ref().get("performancemodes") {
        let mut codes = ModeCodes::default();
        for (name, value) in section {
            let value = value.as_deref().unwrap_or_default();
            let code = parse_code(value)
                .ok_or_else(|| format!("Invalid performance mode code '{}' for {}", value, name))?;
            if !codes.set(name, code) {
                return Err(format!("Unknown performance mode '{}'", name));
            }
        }
        record.mode_codes = Some(codes);
    }

    Ok((hids, record))
}

/* Parse a `Match` string like `"SAM0429;SAM0430"`. */
fn parse_matches(s: &str) -> Result<Vec<String>, String> {
    let hids: Vec<String> = s
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();

    if hids.is_empty() {
        return Err("Match is empty".to_string());
    }
    Ok(hids)
}

/* Parse a mode code written as `0x16` or `22`. */
fn parse_code(s: &str) -> Option<u8> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/* The effective sub-feature set of one device instance. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    enabled: HashSet<Feature>,
    pub mode_codes: ModeCodes,
}

impl Capabilities {
    /* Combine the quirk record for `hid` with the administrator overrides. */
    /*  */
    /* An override always wins. A quirk disablement applies where there is */
    /* no override. Everything else starts enabled and may be demoted later. */
    pub fn resolve(hid: &str, db: &QuirkDb, config: &Config) -> Self {
        let record = db.get(hid);
        if let Some(name) = record.and_then(|r| r.name.as_deref()) {
            info!("Using quirks for {} ({})", hid, name);
        }

        let enabled = Feature::ALL
            .into_iter()
            .filter(|&feature| match config.override_for(feature) {
                Some(enabled) => enabled,
                None => !record.is_some_and(|r| r.disabled.contains(&feature)),
            })
            .collect();

        Self {
            enabled,
            mode_codes: record.and_then(|r| r.mode_codes).unwrap_or_default(),
        }
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    /* Turn a sub-feature off for the rest of the session. */
    pub fn disable(&mut self, feature: Feature) {
        self.enabled.remove(&feature);
    }

    /* Enabled features, in declaration order. */
    pub fn enabled_features(&self) -> Vec<Feature> {
        Feature::ALL
            .into_iter()
            .filter(|f| self.is_enabled(*f))
            .collect()
    }
}
