/* Fan speed reporting.
 *
 * Fans that implement the full ACPI 4.0 fan interface are left to the OS
 * fan driver. The rest report their speed through `_FST`, or, when that
 * is missing or stuck at zero, through a speed level read from the
 * embedded controller (`FANS`) and translated by a table built from the
 * fan's `FANT` level list. */

use tracing::{debug, info, warn};

use crate::acpi::{AcpiError, AcpiMethods, AcpiObject};
use crate::config::FanCorrection;
use crate::error::{GalaxybookError, Result};

pub const ACPI_FAN_DEVICE_ID: &str = "PNP0C0B";
pub const ACPI_FAN_SPEED_LIST: &str = "FANT";
pub const ACPI_FAN_SPEED_VALUE: &str = "\\_SB.PC00.LPCB.H_EC.FANS";
pub const MAX_FAN_COUNT: usize = 5;

/* Level-indexed speed table: level 0 is off, the last level is synthesized. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanSpeedTable {
    speeds: Vec<u64>,
}

impl FanSpeedTable {
    pub fn build(levels: &[u64], correction: &FanCorrection) -> Result<Self> {
        if levels.is_empty() {
            return Err(GalaxybookError::InvalidFanData("empty speed level list".to_string()));
        }

        let mut speeds = Vec::with_capacity(levels.len() + 2);
        speeds.push(0);
        speeds.extend(levels.iter().map(|v| v.saturating_add(correction.level_offset)));
        let top = speeds[speeds.len() - 1].saturating_add(correction.top_level_bonus);
        speeds.push(top);
        Ok(Self { speeds })
    }

    /* Build from the package returned by `FANT`. */
    pub fn from_package(obj: &AcpiObject, correction: &FanCorrection) -> Result<Self> {
        let AcpiObject::Package(elements) = obj else {
            return Err(GalaxybookError::InvalidFanData(format!(
                "speed level list is a {} instead of a package",
                obj.type_name()
            )));
        };

        let levels = elements
            .iter()
            .enumerate()
            .map(|(i, e)| {
                e.as_integer().ok_or_else(|| {
                    GalaxybookError::InvalidFanData(format!(
                        "speed level {} is a {} instead of an integer",
                        i,
                        e.type_name()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::build(&levels, correction)
    }

    pub fn lookup(&self, level: u64) -> Result<u64> {
        if level > i32::MAX as u64 {
            return Err(GalaxybookError::InvalidFanLevel(level));
        }
        usize::try_from(level)
            .ok()
            .and_then(|i| self.speeds.get(i).copied())
            .ok_or(GalaxybookError::InvalidFanLevel(level))
    }

    pub fn speeds(&self) -> &[u64] {
        &self.speeds
    }
}

/* A fan device as found in the firmware namespace. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanCandidate {
    pub label: String,
    /* Absolute firmware path, e.g. `\_SB.PC00.LPCB.FAN0` */
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanSource {
    Fst,
    SpeedTable(FanSpeedTable),
}

impl FanSource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fst => "_FST",
            Self::SpeedTable(_) => "FANS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fan {
    pub label: String,
    pub path: String,
    pub source: FanSource,
}

impl Fan {
    pub async fn rpm(&self, acpi: &mut dyn AcpiMethods) -> Result<u64> {
        let speed = match &self.source {
            FanSource::Fst => read_fst(acpi, &self.path).await?,
            FanSource::SpeedTable(table) => {
                let level = read_level(acpi).await?;
                table.lookup(level)?
            }
        };
        debug!("fan {} ({}) reporting fan speed of {}", self.path, self.label, speed);
        Ok(speed)
    }

    /* Table levels, empty for `_FST` fans. */
    pub fn levels(&self) -> Vec<u64> {
        match &self.source {
            FanSource::Fst => Vec::new(),
            FanSource::SpeedTable(table) => table.speeds().to_vec(),
        }
    }
}

fn method(path: &str, name: &str) -> String {
    format!("{}.{}", path.trim_end_matches('.'), name)
}

fn call_failed(method: &'static str, purpose: &str, source: AcpiError) -> GalaxybookError {
    GalaxybookError::FirmwareCallFailed {
        method,
        purpose: purpose.to_string(),
        source,
    }
}

/* Read the current speed from `_FST`: a package whose third element is the speed. */
async fn read_fst(acpi: &mut dyn AcpiMethods, path: &str) -> Result<u64> {
    let obj = acpi
        .evaluate(&method(path, "_FST"), &[])
        .await
        .map_err(|e| call_failed("_FST", "getting fan state", e))?;
    match obj {
        AcpiObject::Package(elements) if elements.len() == 3 => elements[2]
            .as_integer()
            .ok_or_else(|| GalaxybookError::InvalidFanData("_FST speed is not an integer".to_string())),
        other => Err(GalaxybookError::InvalidFanData(format!(
            "_FST returned a {} of unexpected shape",
            other.type_name()
        ))),
    }
}

/* Read the current speed level from the embedded controller. */
async fn read_level(acpi: &mut dyn AcpiMethods) -> Result<u64> {
    let obj = acpi
        .evaluate(ACPI_FAN_SPEED_VALUE, &[])
        .await
        .map_err(|e| call_failed("FANS", "getting fan speed level", e))?;
    obj.as_integer()
        .ok_or_else(|| GalaxybookError::InvalidFanData(format!("FANS returned a {}", obj.type_name())))
}

/* Set up every usable fan among `candidates`. */
pub async fn discover_fans(
    acpi: &mut dyn AcpiMethods,
    candidates: &[FanCandidate],
    correction: &FanCorrection,
) -> Vec<Fan> {
    let mut fans: Vec<Fan> = Vec::new();

    for candidate in candidates {
        info!("found fan device {} ({})", candidate.path, candidate.label);

        if acpi.has_method(&method(&candidate.path, "_FIF")).await
            && acpi.has_method(&method(&candidate.path, "_FPS")).await
            && acpi.has_method(&method(&candidate.path, "_FST")).await
        {
            info!("fan {} should already be available as an ACPI fan; skipping", candidate.path);
            continue;
        }

        if fans.len() >= MAX_FAN_COUNT {
            warn!("maximum number of {} fans has already been reached", MAX_FAN_COUNT);
            break;
        }

        let uses_table = fans.iter().any(|f| matches!(f.source, FanSource::SpeedTable(_)));
        match probe_fan(acpi, candidate, uses_table, correction).await {
            Ok(fan) => fans.push(fan),
            Err(err) => warn!("unable to initialize fan speeds for fan {}: {}", candidate.path, err),
        }
    }

    fans
}

async fn probe_fan(
    acpi: &mut dyn AcpiMethods,
    candidate: &FanCandidate,
    table_in_use: bool,
    correction: &FanCorrection,
) -> Result<Fan> {
    let use_table = match read_fst(acpi, &candidate.path).await {
        Err(err) => {
            debug!("_FST failed on fan {} ({}); trying FANT and FANS", candidate.path, err);
            true
        }
        Ok(0) => {
            let has_table = acpi.has_method(&method(&candidate.path, ACPI_FAN_SPEED_LIST)).await
                && acpi.has_method(ACPI_FAN_SPEED_VALUE).await;
            if has_table {
                debug!("_FST on fan {} returned 0; trying FANT and FANS", candidate.path);
            }
            has_table
        }
        Ok(_) => false,
    };

    if !use_table {
        info!("initialized fan speed reporting for {} using method _FST", candidate.path);
        return Ok(Fan {
            label: candidate.label.clone(),
            path: candidate.path.clone(),
            source: FanSource::Fst,
        });
    }

    if table_in_use {
        return Err(GalaxybookError::InvalidFanData(
            "more than one fan using FANS is not supported".to_string(),
        ));
    }

    let list = acpi
        .evaluate(&method(&candidate.path, ACPI_FAN_SPEED_LIST), &[])
        .await
        .map_err(|e| call_failed("FANT", "reading fan speed list", e))?;
    let table = FanSpeedTable::from_package(&list, correction)?;
    let level = read_level(acpi).await?;
    table.lookup(level)?;

    info!("initialized fan speed reporting for {} with levels {:?}", candidate.path, table.speeds());
    Ok(Fan {
        label: candidate.label.clone(),
        path: candidate.path.clone(),
        source: FanSource::SpeedTable(table),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::scripted::ScriptedAcpi;

    fn candidate() -> FanCandidate {
        FanCandidate {
            label: "PNP0C0B:00".to_string(),
            path: "\\_SB.PC00.LPCB.FAN0".to_string(),
        }
    }

    fn fst(speed: u64) -> std::result::Result<AcpiObject, AcpiError> {
        Ok(AcpiObject::Package(vec![
            AcpiObject::Integer(0),
            AcpiObject::Integer(1),
            AcpiObject::Integer(speed),
        ]))
    }

    fn not_found() -> std::result::Result<AcpiObject, AcpiError> {
        Err(AcpiError::Status("AE_NOT_FOUND".to_string()))
    }

    #[test]
    fn test_build_scenario() {
        let table = FanSpeedTable::build(&[2800, 3200, 3800], &FanCorrection::default()).unwrap();
        assert_eq!(table.speeds(), &[0, 2810, 3210, 3810, 4810]);
    }

    #[test]
    fn test_lookup_bounds() {
        let levels = [1000, 2000];
        let table = FanSpeedTable::build(&levels, &FanCorrection::default()).unwrap();
        assert_eq!(table.lookup(0).unwrap(), 0);
        for (i, v) in levels.iter().enumerate() {
            assert_eq!(table.lookup(i as u64 + 1).unwrap(), v + 10);
        }
        assert_eq!(table.lookup(3).unwrap(), table.lookup(2).unwrap() + 1000);
        assert!(matches!(table.lookup(4), Err(GalaxybookError::InvalidFanLevel(4))));
        assert!(matches!(table.lookup(u64::MAX), Err(GalaxybookError::InvalidFanLevel(_))));
    }

    #[test]
    fn test_empty_list_is_invalid() {
        assert!(matches!(
            FanSpeedTable::build(&[], &FanCorrection::default()),
            Err(GalaxybookError::InvalidFanData(_))
        ));
    }

    #[test]
    fn test_configured_correction() {
        let correction = FanCorrection {
            level_offset: 0,
            top_level_bonus: 500,
        };
        let table = FanSpeedTable::build(&[2800], &correction).unwrap();
        assert_eq!(table.speeds(), &[0, 2800, 3300]);
    }

    #[test]
    fn test_from_package_rejects_non_integers() {
        let pkg = AcpiObject::Package(vec![AcpiObject::Integer(1), AcpiObject::String("x".into())]);
        assert!(FanSpeedTable::from_package(&pkg, &FanCorrection::default()).is_err());
        assert!(FanSpeedTable::from_package(&AcpiObject::Integer(1), &FanCorrection::default()).is_err());
    }

    #[tokio::test]
    async fn test_fst_fan() {
        /* _FIF missing, then _FST probe */
        let mut acpi = ScriptedAcpi::replying(vec![not_found(), fst(2400)]);
        let fans = discover_fans(&mut acpi, &[candidate()], &FanCorrection::default()).await;
        assert_eq!(fans.len(), 1);
        assert_eq!(fans[0].source, FanSource::Fst);

        acpi.responses.push_back(fst(2600));
        assert_eq!(fans[0].rpm(&mut acpi).await.unwrap(), 2600);
    }

    #[tokio::test]
    async fn test_full_acpi_fan_is_skipped() {
        let mut acpi = ScriptedAcpi::replying(vec![
            Ok(AcpiObject::Package(vec![])),
            Ok(AcpiObject::Package(vec![])),
            fst(2400),
        ]);
        let fans = discover_fans(&mut acpi, &[candidate()], &FanCorrection::default()).await;
        assert!(fans.is_empty());
    }

    #[tokio::test]
    async fn test_zero_fst_falls_back_to_speed_table() {
        let mut acpi = ScriptedAcpi::replying(vec![
            not_found(),
            fst(0),
            Ok(AcpiObject::Package(vec![AcpiObject::Integer(2800)])),
            Ok(AcpiObject::Integer(1)),
            Ok(AcpiObject::Package(vec![
                AcpiObject::Integer(2800),
                AcpiObject::Integer(3200),
            ])),
            Ok(AcpiObject::Integer(0)),
        ]);
        let fans = discover_fans(&mut acpi, &[candidate()], &FanCorrection::default()).await;
        assert_eq!(fans.len(), 1);
        assert_eq!(fans[0].levels(), vec![0, 2810, 3210, 4210]);

        acpi.responses.push_back(Ok(AcpiObject::Integer(2)));
        assert_eq!(fans[0].rpm(&mut acpi).await.unwrap(), 3210);
        acpi.responses.push_back(Ok(AcpiObject::Integer(9)));
        assert!(fans[0].rpm(&mut acpi).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_fst_without_table_keeps_fst() {
        let mut acpi = ScriptedAcpi::replying(vec![not_found(), fst(0), not_found()]);
        let fans = discover_fans(&mut acpi, &[candidate()], &FanCorrection::default()).await;
        assert_eq!(fans[0].source, FanSource::Fst);
    }

    #[tokio::test]
    async fn test_only_one_fan_may_use_fans() {
        let second = FanCandidate {
            label: "PNP0C0B:01".to_string(),
            path: "\\_SB.PC00.LPCB.FAN1".to_string(),
        };
        let mut acpi = ScriptedAcpi::replying(vec![
            /* first fan: _FIF, _FST fails, FANT, FANS */
            not_found(),
            not_found(),
            Ok(AcpiObject::Package(vec![AcpiObject::Integer(2800)])),
            Ok(AcpiObject::Integer(0)),
            /* second fan: _FIF, _FST fails */
            not_found(),
            not_found(),
        ]);
        let fans = discover_fans(&mut acpi, &[candidate(), second], &FanCorrection::default()).await;
        assert_eq!(fans.len(), 1);
        assert_eq!(fans[0].path, "\\_SB.PC00.LPCB.FAN0");
    }

    #[tokio::test]
    async fn test_failed_level_read_rejects_fan() {
        let mut acpi = ScriptedAcpi::replying(vec![
            not_found(),
            not_found(),
            Ok(AcpiObject::Package(vec![AcpiObject::Integer(2800)])),
            not_found(),
        ]);
        let fans = discover_fans(&mut acpi, &[candidate()], &FanCorrection::default()).await;
        assert!(fans.is_empty());
    }
}
