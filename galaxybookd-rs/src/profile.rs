/* Performance-mode discovery and the mapping between device-native mode */
/* codes and platform profiles. */

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::error::{GalaxybookError, Result};
use crate::invoker::{EntryPoint, MethodInvoker};
use crate::sawb::{
    PerformanceModeBuffer, IOB_LEN, SUBN_PERFORMANCE_MODE_GET, SUBN_PERFORMANCE_MODE_LIST,
    SUBN_PERFORMANCE_MODE_SET,
};

/* Device-native performance mode codes */
pub const PERFORMANCE_MODE_ULTRA: u8 = 0x16;
pub const PERFORMANCE_MODE_PERFORMANCE: u8 = 0x15;
pub const PERFORMANCE_MODE_SILENT: u8 = 0x0b;
pub const PERFORMANCE_MODE_QUIET: u8 = 0x0a;
pub const PERFORMANCE_MODE_OPTIMIZED: u8 = 0x02;
pub const PERFORMANCE_MODE_PERFORMANCE_LEGACY: u8 = 0x01;
pub const PERFORMANCE_MODE_OPTIMIZED_LEGACY: u8 = 0x00;

const PROFILE_COUNT: usize = 5;

/* Ordinal platform profiles, lowest power first. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlatformProfile {
    LowPower,
    Quiet,
    Balanced,
    BalancedPerformance,
    Performance,
}

impl PlatformProfile {
    pub const ALL: [PlatformProfile; PROFILE_COUNT] = [
        PlatformProfile::LowPower,
        PlatformProfile::Quiet,
        PlatformProfile::Balanced,
        PlatformProfile::BalancedPerformance,
        PlatformProfile::Performance,
    ];

    pub const DEFAULT: PlatformProfile = PlatformProfile::Balanced;

    pub fn name(self) -> &'static str {
        match self {
            Self::LowPower => "low-power",
            Self::Quiet => "quiet",
            Self::Balanced => "balanced",
            Self::BalancedPerformance => "balanced-performance",
            Self::Performance => "performance",
        }
    }

    fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlatformProfile {
    type Err = GalaxybookError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| GalaxybookError::InvalidArgument(format!("unknown platform profile '{s}'")))
    }
}

/* The device-native code table a model speaks. Quirk records may */
/* substitute individual codes. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeCodes {
    pub ultra: u8,
    pub performance: u8,
    pub silent: u8,
    pub quiet: u8,
    pub optimized: u8,
    pub performance_legacy: u8,
    pub optimized_legacy: u8,
}

impl Default for ModeCodes {
    fn default() -> Self {
        Self {
            ultra: PERFORMANCE_MODE_ULTRA,
            performance: PERFORMANCE_MODE_PERFORMANCE,
            silent: PERFORMANCE_MODE_SILENT,
            quiet: PERFORMANCE_MODE_QUIET,
            optimized: PERFORMANCE_MODE_OPTIMIZED,
            performance_legacy: PERFORMANCE_MODE_PERFORMANCE_LEGACY,
            optimized_legacy: PERFORMANCE_MODE_OPTIMIZED_LEGACY,
        }
    }
}

impl ModeCodes {
    /* Replace the code with the given name. Returns false for unknown names. */
    pub fn set(&mut self, name: &str, code: u8) -> bool {
        let slot = match name {
            "ultra" => &mut self.ultra,
            "performance" => &mut self.performance,
            "silent" => &mut self.silent,
            "quiet" => &mut self.quiet,
            "optimized" => &mut self.optimized,
            "performance_legacy" => &mut self.performance_legacy,
            "optimized_legacy" => &mut self.optimized_legacy,
            _ => return false,
        };
        *slot = code;
        true
    }
}

/* Ordinal profile to device-native code mapping, built once at attach. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceModeTable {
    modes: [Option<u8>; PROFILE_COUNT],
}

impl PerformanceModeTable {
    /* Map a supported-code list (most capable first) onto the profiles. */
    /*  */
    /* Codes are processed least capable first. A canonical code always */
    /* wins its ordinal over a fallback code; the fallback then moves to the */
    /* in-between ordinal (performance to balanced-performance, quiet to */
    /* quiet) or, for legacy codes, is dropped. */
    pub fn assign(supported: &[u8], codes: &ModeCodes) -> Result<Self> {
        let mut table = Self {
            modes: [None; PROFILE_COUNT],
        };

        for &code in supported.iter().rev() {
            match table.place(code, codes) {
                Some(profile) => info!(
                    "will support platform profile '{}' with performance mode 0x{:x}",
                    profile, code
                ),
                None => debug!("unmapped performance mode 0x{:x} will be ignored", code),
            }
        }

        if table.modes.iter().all(Option::is_none) {
            return Err(GalaxybookError::NoSupportedProfiles);
        }
        Ok(table)
    }

    /* Record `code` under the profile it claims and return that profile. */
    fn place(&mut self, code: u8, codes: &ModeCodes) -> Option<PlatformProfile> {
        use PlatformProfile::*;

        let holds = |table: &Self, profile: PlatformProfile, c: u8| table.code(profile) == Some(c);

        let profile = if code == codes.ultra {
            if holds(self, Performance, codes.performance) {
                self.modes[BalancedPerformance.ordinal()] = Some(codes.performance);
            }
            Performance
        } else if code == codes.performance {
            if holds(self, Performance, codes.ultra) {
                BalancedPerformance
            } else {
                Performance
            }
        } else if code == codes.silent {
            if holds(self, LowPower, codes.quiet) {
                self.modes[Quiet.ordinal()] = Some(codes.quiet);
            }
            LowPower
        } else if code == codes.quiet {
            if holds(self, LowPower, codes.silent) {
                Quiet
            } else {
                LowPower
            }
        } else if code == codes.optimized {
            Balanced
        } else if code == codes.performance_legacy {
            if self.is_supported(Performance) {
                return None;
            }
            Performance
        } else if code == codes.optimized_legacy {
            if self.is_supported(Balanced) {
                return None;
            }
            Balanced
        } else {
            return None;
        };

        self.modes[profile.ordinal()] = Some(code);
        Some(profile)
    }

    /* Enumerate the device's supported codes and build the table. */
    pub async fn discover(invoker: &mut MethodInvoker, codes: &ModeCodes) -> Result<Self> {
        let request = PerformanceModeBuffer::performance_mode(SUBN_PERFORMANCE_MODE_LIST, &[]);
        let response = invoker
            .invoke(EntryPoint::PerformanceMode, &request, "listing supported performance modes")
            .await?;

        let iob = response.iob_values();
        let mut count = iob[0] as usize;
        if count > IOB_LEN - 1 {
            warn!("firmware reported {count} performance modes, only {} fit the buffer", IOB_LEN - 1);
            count = IOB_LEN - 1;
        }
        Self::assign(&iob[1..=count], codes)
    }

    pub fn code(&self, profile: PlatformProfile) -> Option<u8> {
        self.modes[profile.ordinal()]
    }

    pub fn is_supported(&self, profile: PlatformProfile) -> bool {
        self.code(profile).is_some()
    }

    pub fn profile_for(&self, code: u8) -> Option<PlatformProfile> {
        PlatformProfile::ALL
            .into_iter()
            .find(|&p| self.code(p) == Some(code))
    }

    pub fn choices(&self) -> Vec<PlatformProfile> {
        PlatformProfile::ALL
            .into_iter()
            .filter(|&p| self.is_supported(p))
            .collect()
    }

    /* The supported profile structurally after `current`, wrapping around. */
    /* An unknown current profile starts the scan from the lowest ordinal. */
    pub fn next_after(&self, current: Option<PlatformProfile>) -> Option<PlatformProfile> {
        let start = current.map_or(0, |p| p.ordinal() + 1);
        PlatformProfile::ALL[start.min(PlatformProfile::ALL.len())..]
            .iter()
            .chain(PlatformProfile::ALL.iter())
            .copied()
            .find(|&p| self.is_supported(p))
    }

    pub async fn current(&self, invoker: &mut MethodInvoker) -> Result<PlatformProfile> {
        let code = read_mode(invoker).await?;
        self.profile_for(code)
            .ok_or(GalaxybookError::UnrecognizedMode(code))
    }

    pub async fn set(&self, invoker: &mut MethodInvoker, profile: PlatformProfile) -> Result<()> {
        let code = self
            .code(profile)
            .ok_or(GalaxybookError::UnsupportedProfile(profile))?;
        write_mode(invoker, code).await?;
        debug!("set platform profile to '{}' (performance mode 0x{:x})", profile, code);
        Ok(())
    }

    /* Advance to the next supported profile and return it. */
    pub async fn cycle(&self, invoker: &mut MethodInvoker) -> Result<PlatformProfile> {
        let current = match self.current(invoker).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                debug!("cycling from unknown profile: {err}");
                None
            }
        };
        let next = self
            .next_after(current)
            .ok_or(GalaxybookError::NoSupportedProfiles)?;
        self.set(invoker, next).await?;
        Ok(next)
    }
}

async fn read_mode(invoker: &mut MethodInvoker) -> Result<u8> {
    let request = PerformanceModeBuffer::performance_mode(SUBN_PERFORMANCE_MODE_GET, &[]);
    let response = invoker
        .invoke(EntryPoint::PerformanceMode, &request, "getting performance_mode")
        .await?;
    Ok(response.iob_values()[0])
}

async fn write_mode(invoker: &mut MethodInvoker, code: u8) -> Result<()> {
    let request = PerformanceModeBuffer::performance_mode(SUBN_PERFORMANCE_MODE_SET, &[code]);
    invoker
        .invoke(EntryPoint::PerformanceMode, &request, "setting performance_mode")
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::scripted::ScriptedAcpi;
    use crate::acpi::{AcpiArg, AcpiObject};
    use crate::sawb::{RFLG_POS, RFLG_SUCCESS};
    use PlatformProfile::*;

    fn assign(list: &[u8]) -> Result<PerformanceModeTable> {
        PerformanceModeTable::assign(list, &ModeCodes::default())
    }

    fn pm_reply(subn: u8, iob: &[u8]) -> std::result::Result<AcpiObject, crate::acpi::AcpiError> {
        let mut bytes = PerformanceModeBuffer::performance_mode(subn, iob).as_bytes().to_vec();
        bytes[RFLG_POS] = RFLG_SUCCESS;
        Ok(AcpiObject::Buffer(bytes))
    }

    #[test]
    fn test_three_tier_model() {
        let table = assign(&[0x15, 0x02, 0x0b]).unwrap();
        assert_eq!(table.code(Performance), Some(0x15));
        assert_eq!(table.code(Balanced), Some(0x02));
        assert_eq!(table.code(LowPower), Some(0x0b));
        assert_eq!(table.code(BalancedPerformance), None);
        assert_eq!(table.code(Quiet), None);
    }

    #[test]
    fn test_ultra_and_performance_never_share_an_ordinal() {
        for list in [[0x16, 0x15, 0x02], [0x15, 0x16, 0x02]] {
            let table = assign(&list).unwrap();
            assert_eq!(table.code(Performance), Some(0x16));
            assert_eq!(table.code(BalancedPerformance), Some(0x15));
        }
    }

    #[test]
    fn test_five_tier_model() {
        let table = assign(&[0x16, 0x15, 0x02, 0x0b, 0x0a]).unwrap();
        assert_eq!(table.code(Performance), Some(0x16));
        assert_eq!(table.code(BalancedPerformance), Some(0x15));
        assert_eq!(table.code(Balanced), Some(0x02));
        assert_eq!(table.code(LowPower), Some(0x0b));
        assert_eq!(table.code(Quiet), Some(0x0a));
    }

    #[test]
    fn test_quiet_falls_back_to_low_power() {
        let table = assign(&[0x02, 0x0a]).unwrap();
        assert_eq!(table.code(LowPower), Some(0x0a));
        assert_eq!(table.code(Quiet), None);
    }

    #[test]
    fn test_legacy_codes_only_fill_gaps() {
        let table = assign(&[0x15, 0x02, 0x01, 0x00]).unwrap();
        assert_eq!(table.code(Performance), Some(0x15));
        assert_eq!(table.code(Balanced), Some(0x02));

        assert_eq!(table.code(BalancedPerformance), None);

        let legacy = assign(&[0x01, 0x00]).unwrap();
        assert_eq!(legacy.code(Performance), Some(0x01));
        assert_eq!(legacy.code(Balanced), Some(0x00));
    }

    #[test]
    fn test_unknown_codes_are_ignored() {
        let table = assign(&[0x42, 0x02]).unwrap();
        assert_eq!(table.choices(), vec![Balanced]);
        assert!(table.profile_for(0x42).is_none());
    }

    #[test]
    fn test_nothing_recognized_means_no_profiles() {
        assert!(matches!(assign(&[0x42, 0x43]), Err(GalaxybookError::NoSupportedProfiles)));
        assert!(matches!(assign(&[]), Err(GalaxybookError::NoSupportedProfiles)));
    }

    #[test]
    fn test_any_canonical_code_maps_something() {
        for code in [0x0b, 0x02, 0x15] {
            assert!(assign(&[0x42, code]).is_ok());
        }
    }

    #[test]
    fn test_quirk_code_table_is_honoured() {
        let mut codes = ModeCodes::default();
        assert!(codes.set("optimized", 0x30));
        assert!(!codes.set("turbo", 0x31));
        let table = PerformanceModeTable::assign(&[0x30], &codes).unwrap();
        assert_eq!(table.code(Balanced), Some(0x30));
    }

    #[test]
    fn test_cycle_order_wraps() {
        let table = assign(&[0x15, 0x02, 0x0b]).unwrap();
        assert_eq!(table.next_after(Some(LowPower)), Some(Balanced));
        assert_eq!(table.next_after(Some(Balanced)), Some(Performance));
        assert_eq!(table.next_after(Some(Performance)), Some(LowPower));
        assert_eq!(table.next_after(None), Some(LowPower));
    }

    #[test]
    fn test_profile_names_parse() {
        for p in PlatformProfile::ALL {
            assert_eq!(p.name().parse::<PlatformProfile>().unwrap(), p);
        }
        assert!("turbo".parse::<PlatformProfile>().is_err());
    }

    #[tokio::test]
    async fn test_discover_reads_count_then_codes() {
        let acpi = ScriptedAcpi::replying(vec![pm_reply(0x01, &[3, 0x15, 0x02, 0x0b])]);
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        let table = PerformanceModeTable::discover(&mut invoker, &ModeCodes::default())
            .await
            .unwrap();
        assert_eq!(table.choices(), vec![LowPower, Balanced, Performance]);
    }

    #[tokio::test]
    async fn test_discover_bounds_the_count() {
        let acpi = ScriptedAcpi::replying(vec![pm_reply(0x01, &[0xff, 0x02])]);
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        let table = PerformanceModeTable::discover(&mut invoker, &ModeCodes::default())
            .await
            .unwrap();
        assert_eq!(table.choices(), vec![Balanced]);
    }

    #[tokio::test]
    async fn test_unmapped_current_code_is_unrecognized() {
        let table = assign(&[0x02]).unwrap();
        let acpi = ScriptedAcpi::replying(vec![pm_reply(0x02, &[0x15])]);
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        assert!(matches!(
            table.current(&mut invoker).await,
            Err(GalaxybookError::UnrecognizedMode(0x15))
        ));
    }

    #[tokio::test]
    async fn test_set_unsupported_profile_fails_without_io() {
        let table = assign(&[0x02]).unwrap();
        let acpi = ScriptedAcpi::replying(vec![]);
        let log = acpi.call_log();
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        assert!(matches!(
            table.set(&mut invoker, Performance).await,
            Err(GalaxybookError::UnsupportedProfile(Performance))
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_writes_next_code() {
        let table = assign(&[0x15, 0x02, 0x0b]).unwrap();
        let acpi = ScriptedAcpi::replying(vec![pm_reply(0x02, &[0x02]), pm_reply(0x03, &[0x15])]);
        let log = acpi.call_log();
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        assert_eq!(table.cycle(&mut invoker).await.unwrap(), Performance);

        let calls = log.lock().unwrap();
        let AcpiArg::Buffer(sent) = &calls[1].1[0] else {
            panic!("expected buffer argument");
        };
        assert_eq!(sent[22], SUBN_PERFORMANCE_MODE_SET);
        assert_eq!(sent[23], 0x15);
    }

    #[tokio::test]
    async fn test_cycle_from_unreadable_mode_starts_at_bottom() {
        let table = assign(&[0x15, 0x02]).unwrap();
        let acpi = ScriptedAcpi::replying(vec![
            Err(crate::acpi::AcpiError::NotCalled),
            pm_reply(0x03, &[0x02]),
        ]);
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        assert_eq!(table.cycle(&mut invoker).await.unwrap(), Balanced);
    }
}
