/* Sub-feature activation handshake. */

use tracing::{debug, warn};

use crate::error::{GalaxybookError, Result};
use crate::invoker::{EntryPoint, MethodInvoker};
use crate::sawb::{
    SettingsBuffer, GUDS_FEATURE_ENABLE, GUDS_FEATURE_ENABLE_SUCCESS, GUNM_FEATURE_ENABLE,
    GUNM_FEATURE_ENABLE_SUCCESS,
};

/* Activate `sasb` so that its get/set calls can be trusted. */
/*  */
/* The firmware acknowledges by answering with the success opcode or by */
/* echoing the success marker in the first payload byte; a response carrying */
/* neither leaves the sub-feature unavailable. Repeating the handshake on an */
/* already active sub-feature is harmless. */
pub async fn enable(invoker: &mut MethodInvoker, sasb: u16) -> Result<()> {
    let request = SettingsBuffer::settings(sasb, GUNM_FEATURE_ENABLE, &[GUDS_FEATURE_ENABLE]);
    let purpose = format!("enabling feature 0x{sasb:x}");
    let response = invoker.invoke(EntryPoint::Settings, &request, &purpose).await?;

    if response.gunm() != GUNM_FEATURE_ENABLE_SUCCESS
        && response.guds()[0] != GUDS_FEATURE_ENABLE_SUCCESS
    {
        warn!(
            "failed to enable feature 0x{sasb:x}, got {:02x}/{:02x}",
            response.gunm(),
            response.guds()[0]
        );
        return Err(GalaxybookError::FeatureUnavailable { sub_feature: sasb });
    }

    debug!("enabled feature 0x{sasb:x}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::scripted::ScriptedAcpi;
    use crate::acpi::{AcpiArg, AcpiObject};
    use crate::sawb::{RFLG_POS, RFLG_SUCCESS, SASB_KBD_BACKLIGHT};

    fn ack(gunm: u8, guds0: u8) -> AcpiObject {
        let mut bytes = SettingsBuffer::settings(SASB_KBD_BACKLIGHT, gunm, &[guds0])
            .as_bytes()
            .to_vec();
        bytes[RFLG_POS] = RFLG_SUCCESS;
        AcpiObject::Buffer(bytes)
    }

    #[tokio::test]
    async fn test_handshake_sends_enable_marker() {
        let acpi = ScriptedAcpi::replying(vec![Ok(ack(0xdd, 0xcc))]);
        let log = acpi.call_log();
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        enable(&mut invoker, SASB_KBD_BACKLIGHT).await.unwrap();

        let calls = log.lock().unwrap();
        let AcpiArg::Buffer(sent) = &calls[0].1[0] else {
            panic!("expected buffer argument");
        };
        assert_eq!(&sent[..7], &[0x43, 0x58, 0x78, 0x00, 0x00, 0xbb, 0xaa]);
    }

    #[tokio::test]
    async fn test_either_marker_acknowledges() {
        for (gunm, guds0) in [(0xdd, 0xcc), (0xdd, 0x00), (0xbb, 0xcc)] {
            let acpi = ScriptedAcpi::replying(vec![Ok(ack(gunm, guds0))]);
            let mut invoker = MethodInvoker::new(Box::new(acpi));
            assert!(enable(&mut invoker, SASB_KBD_BACKLIGHT).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_missing_markers_make_feature_unavailable() {
        let acpi = ScriptedAcpi::replying(vec![Ok(ack(0xbb, 0xaa))]);
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        let err = enable(&mut invoker, SASB_KBD_BACKLIGHT).await.unwrap_err();
        assert!(matches!(err, GalaxybookError::FeatureUnavailable { sub_feature: 0x78 }));
    }

    #[tokio::test]
    async fn test_enabling_twice_is_idempotent() {
        let acpi = ScriptedAcpi::replying(vec![Ok(ack(0xdd, 0xcc)), Ok(ack(0xdd, 0xcc))]);
        let log = acpi.call_log();
        let mut invoker = MethodInvoker::new(Box::new(acpi));
        enable(&mut invoker, SASB_KBD_BACKLIGHT).await.unwrap();
        enable(&mut invoker, SASB_KBD_BACKLIGHT).await.unwrap();

        let calls = log.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }
}
