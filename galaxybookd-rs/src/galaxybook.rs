/* Device instance context.
 *
 * `Galaxybook` owns everything one attached device needs: the method
 * invoker, the resolved capabilities, the performance-mode table and the
 * fans. Every sub-feature initializer may fail at attach; a failure only
 * demotes that sub-feature to disabled. */

use tracing::{debug, info, warn};

use crate::acpi::{AcpiArg, AcpiMethods};
use crate::config::{Config, Feature};
use crate::error::{GalaxybookError, Result};
use crate::fan::{discover_fans, Fan, FanCandidate};
use crate::feature;
use crate::hotkey::HotkeyAction;
use crate::invoker::{EntryPoint, MethodInvoker};
use crate::profile::{PerformanceModeTable, PlatformProfile};
use crate::quirks::{Capabilities, QuirkDb};
use crate::sawb::*;

pub const ACPI_METHOD_ENABLE: &str = "SDLS";
const ACPI_METHOD_ENABLE_ON: u64 = 1;
const ACPI_METHOD_ENABLE_OFF: u64 = 0;

pub const KBD_BACKLIGHT_MAX_BRIGHTNESS: u8 = 3;

/* Everything attach needs to know about the hardware. */
pub struct AttachParams<'a> {
    pub hid: &'a str,
    pub fans: &'a [FanCandidate],
    pub config: &'a Config,
    pub quirks: &'a QuirkDb,
}

pub struct Galaxybook {
    hid: String,
    invoker: MethodInvoker,
    caps: Capabilities,
    profiles: Option<PerformanceModeTable>,
    fans: Vec<Fan>,
    kbd_backlight: u8,
}

impl Galaxybook {
    /* Bring the device up. Only a failing device enable aborts the attach. */
    pub async fn attach(acpi: Box<dyn AcpiMethods>, params: AttachParams<'_>) -> Result<Self> {
        let caps = Capabilities::resolve(params.hid, params.quirks, params.config);
        let mut dev = Self {
            hid: params.hid.to_string(),
            invoker: MethodInvoker::new(acpi),
            caps,
            profiles: None,
            fans: Vec::new(),
            kbd_backlight: 0,
        };

        dev.set_device_enabled(true).await?;
        info!("initialized firmware device {}", dev.hid);

        if let Err(err) = feature::enable(&mut dev.invoker, SASB_POWER_MANAGEMENT).await {
            warn!(
                "failed to initialize power management features ({err}); \
                 performance mode and battery threshold will not be available"
            );
            dev.caps.disable(Feature::PerformanceMode);
            dev.caps.disable(Feature::BatteryThreshold);
        }

        if dev.caps.is_enabled(Feature::PerformanceMode) {
            let result = dev.init_performance_mode().await;
            dev.demote_on_error(Feature::PerformanceMode, result);
        }

        if dev.caps.is_enabled(Feature::BatteryThreshold) {
            let result = dev.charge_control_end_threshold().await.map(drop);
            dev.demote_on_error(Feature::BatteryThreshold, result);
        }

        if dev.caps.is_enabled(Feature::StartOnLidOpen) {
            let result = dev.start_on_lid_open().await.map(drop);
            dev.demote_on_error(Feature::StartOnLidOpen, result);
        }

        if dev.caps.is_enabled(Feature::UsbCharge) {
            let result = dev.usb_charge().await.map(drop);
            dev.demote_on_error(Feature::UsbCharge, result);
        }

        if dev.caps.is_enabled(Feature::AllowRecording) {
            let result = dev.init_allow_recording().await;
            dev.demote_on_error(Feature::AllowRecording, result);
        }

        if dev.caps.is_enabled(Feature::KbdBacklight) {
            let result = dev.init_kbd_backlight().await;
            dev.demote_on_error(Feature::KbdBacklight, result);
        }

        if dev.caps.is_enabled(Feature::FanSpeed) {
            let fans = discover_fans(dev.invoker.acpi(), params.fans, &params.config.fan).await;
            if fans.is_empty() {
                warn!("no usable fan found; fan_speed will not be available");
                dev.caps.disable(Feature::FanSpeed);
            }
            dev.fans = fans;
        }

        if !dev.caps.is_enabled(Feature::KbdBacklight) && !dev.caps.is_enabled(Feature::AllowRecording) {
            debug!("no scan-code hotkey has an action; disabling hotkeys");
            dev.caps.disable(Feature::Hotkeys);
        }

        if dev.caps.is_enabled(Feature::Notifications) {
            let result = dev.enable_notifications().await;
            dev.demote_on_error(Feature::Notifications, result);
        }

        info!(
            "{} attached with features: {}",
            dev.hid,
            dev.features()
                .into_iter()
                .map(Feature::key)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(dev)
    }

    /* Switch the device's firmware interface off. */
    pub async fn detach(mut self) {
        if let Err(err) = self.set_device_enabled(false).await {
            warn!("failed to disable firmware device {}: {}", self.hid, err);
        }
        info!("detached {}", self.hid);
    }

    fn demote_on_error(&mut self, feature: Feature, result: Result<()>) {
        if let Err(err) = result {
            warn!("failed to initialize {feature} ({err}); it will not be available");
            self.caps.disable(feature);
        }
    }

    async fn set_device_enabled(&mut self, on: bool) -> Result<()> {
        let value = if on {
            ACPI_METHOD_ENABLE_ON
        } else {
            ACPI_METHOD_ENABLE_OFF
        };
        self.invoker
            .acpi()
            .evaluate(ACPI_METHOD_ENABLE, &[AcpiArg::Integer(value)])
            .await
            .map_err(|source| GalaxybookError::FirmwareCallFailed {
                method: ACPI_METHOD_ENABLE,
                purpose: format!("setting device enable to {value}"),
                source,
            })?;
        Ok(())
    }

    async fn init_performance_mode(&mut self) -> Result<()> {
        let table = PerformanceModeTable::discover(&mut self.invoker, &self.caps.mode_codes).await?;

        match table.current(&mut self.invoker).await {
            Ok(profile) => debug!("current platform profile is '{profile}'"),
            Err(err) => {
                let fallback = fallback_profile(&table)?;
                debug!("initial performance mode is not usable ({err}); setting '{fallback}'");
                table.set(&mut self.invoker, fallback).await?;
            }
        }

        self.profiles = Some(table);
        Ok(())
    }

    async fn init_allow_recording(&mut self) -> Result<()> {
        feature::enable(&mut self.invoker, SASB_ALLOW_RECORDING).await?;
        self.allow_recording().await?;
        Ok(())
    }

    async fn init_kbd_backlight(&mut self) -> Result<()> {
        feature::enable(&mut self.invoker, SASB_KBD_BACKLIGHT).await?;
        self.kbd_backlight().await?;
        Ok(())
    }

    async fn enable_notifications(&mut self) -> Result<()> {
        feature::enable(&mut self.invoker, SASB_NOTIFICATIONS).await?;
        let request = SettingsBuffer::settings(
            SASB_NOTIFICATIONS,
            GUNM_ACPI_NOTIFY_ENABLE,
            &[GUDS_ACPI_NOTIFY_ENABLE],
        );
        self.invoker
            .invoke(EntryPoint::Settings, &request, "activating notifications")
            .await?;
        Ok(())
    }

    fn require(&self, feature: Feature) -> Result<()> {
        if self.caps.is_enabled(feature) {
            Ok(())
        } else {
            Err(GalaxybookError::FeatureDisabled(feature))
        }
    }

    async fn settings(&mut self, sasb: u16, gunm: u8, guds: &[u8], purpose: &str) -> Result<SettingsBuffer> {
        let request = SettingsBuffer::settings(sasb, gunm, guds);
        self.invoker.invoke(EntryPoint::Settings, &request, purpose).await
    }

    pub fn hid(&self) -> &str {
        &self.hid
    }

    pub fn features(&self) -> Vec<Feature> {
        self.caps.enabled_features()
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.caps.is_enabled(feature)
    }

    /* ------------------------------------------------------------------ */
    /* Keyboard backlight                                                   */
    /* ------------------------------------------------------------------ */

    pub fn max_kbd_backlight(&self) -> u8 {
        KBD_BACKLIGHT_MAX_BRIGHTNESS
    }

    pub async fn kbd_backlight(&mut self) -> Result<u8> {
        let resp = self
            .settings(SASB_KBD_BACKLIGHT, GUNM_GET, &[], "getting kbd_backlight brightness")
            .await?;
        self.kbd_backlight = resp.gunm();
        debug!("current kbd_backlight brightness is {}", self.kbd_backlight);
        Ok(self.kbd_backlight)
    }

    pub async fn set_kbd_backlight(&mut self, brightness: u8) -> Result<()> {
        self.require(Feature::KbdBacklight)?;
        if brightness > KBD_BACKLIGHT_MAX_BRIGHTNESS {
            return Err(GalaxybookError::InvalidArgument(format!(
                "brightness {brightness} exceeds maximum {KBD_BACKLIGHT_MAX_BRIGHTNESS}"
            )));
        }
        self.settings(SASB_KBD_BACKLIGHT, GUNM_SET, &[brightness], "setting kbd_backlight brightness")
            .await?;
        self.kbd_backlight = brightness;
        debug!("set kbd_backlight brightness to {brightness}");
        Ok(())
    }

    pub async fn get_kbd_backlight(&mut self) -> Result<u8> {
        self.require(Feature::KbdBacklight)?;
        self.kbd_backlight().await
    }

    /* ------------------------------------------------------------------ */
    /* Power management                                                     */
    /* ------------------------------------------------------------------ */

    async fn start_on_lid_open(&mut self) -> Result<bool> {
        let resp = self
            .settings(
                SASB_POWER_MANAGEMENT,
                GUNM_POWER_MANAGEMENT,
                &[GUDS_START_ON_LID_OPEN, GUDS_START_ON_LID_OPEN_GET],
                "getting start_on_lid_open",
            )
            .await?;
        Ok(resp.guds()[1] != 0)
    }

    pub async fn get_start_on_lid_open(&mut self) -> Result<bool> {
        self.require(Feature::StartOnLidOpen)?;
        self.start_on_lid_open().await
    }

    pub async fn set_start_on_lid_open(&mut self, value: bool) -> Result<()> {
        self.require(Feature::StartOnLidOpen)?;
        self.settings(
            SASB_POWER_MANAGEMENT,
            GUNM_POWER_MANAGEMENT,
            &[GUDS_START_ON_LID_OPEN, GUDS_START_ON_LID_OPEN_SET, value as u8],
            "setting start_on_lid_open",
        )
        .await?;
        Ok(())
    }

    /* Battery charge end threshold in percent; 100 means no limit. */
    async fn charge_control_end_threshold(&mut self) -> Result<u8> {
        let resp = self
            .settings(
                SASB_POWER_MANAGEMENT,
                GUNM_POWER_MANAGEMENT,
                &[GUDS_BATTERY_CHARGE_CONTROL, GUDS_BATTERY_CHARGE_CONTROL_GET],
                "getting battery charge_control_end_threshold",
            )
            .await?;
        let raw = resp.guds()[1];
        debug!(
            "battery charge control is {}; threshold is {}",
            if raw > 0 { "on" } else { "off" },
            raw
        );
        Ok(if raw == 0 { 100 } else { raw })
    }

    pub async fn get_charge_control_end_threshold(&mut self) -> Result<u8> {
        self.require(Feature::BatteryThreshold)?;
        self.charge_control_end_threshold().await
    }

    pub async fn set_charge_control_end_threshold(&mut self, value: u8) -> Result<()> {
        self.require(Feature::BatteryThreshold)?;
        if value > 100 {
            return Err(GalaxybookError::InvalidArgument(format!(
                "charge threshold {value} is above 100"
            )));
        }
        let raw = if value == 100 { 0 } else { value };
        self.settings(
            SASB_POWER_MANAGEMENT,
            GUNM_POWER_MANAGEMENT,
            &[GUDS_BATTERY_CHARGE_CONTROL, GUDS_BATTERY_CHARGE_CONTROL_SET, raw],
            "setting battery charge_control_end_threshold",
        )
        .await?;
        debug!("set battery charge_control_end_threshold to {raw}");
        Ok(())
    }

    /* ------------------------------------------------------------------ */
    /* USB charge and recording block                                       */
    /* ------------------------------------------------------------------ */

    async fn usb_charge(&mut self) -> Result<bool> {
        let resp = self
            .settings(SASB_USB_CHARGE_GET, GUNM_USB_CHARGE_GET, &[], "getting usb_charge")
            .await?;
        Ok(resp.gunm() != 0)
    }

    pub async fn get_usb_charge(&mut self) -> Result<bool> {
        self.require(Feature::UsbCharge)?;
        self.usb_charge().await
    }

    pub async fn set_usb_charge(&mut self, value: bool) -> Result<()> {
        self.require(Feature::UsbCharge)?;
        let gunm = if value {
            GUNM_USB_CHARGE_ON
        } else {
            GUNM_USB_CHARGE_OFF
        };
        self.settings(SASB_USB_CHARGE_SET, gunm, &[], "setting usb_charge").await?;
        Ok(())
    }

    async fn allow_recording(&mut self) -> Result<bool> {
        let resp = self
            .settings(SASB_ALLOW_RECORDING, GUNM_GET, &[], "getting allow_recording")
            .await?;
        Ok(resp.gunm() != 0)
    }

    pub async fn get_allow_recording(&mut self) -> Result<bool> {
        self.require(Feature::AllowRecording)?;
        self.allow_recording().await
    }

    pub async fn set_allow_recording(&mut self, value: bool) -> Result<()> {
        self.require(Feature::AllowRecording)?;
        self.settings(SASB_ALLOW_RECORDING, GUNM_SET, &[value as u8], "setting allow_recording")
            .await?;
        Ok(())
    }

    /* ------------------------------------------------------------------ */
    /* Platform profile                                                     */
    /* ------------------------------------------------------------------ */

    fn profile_table(&self) -> Result<&PerformanceModeTable> {
        self.require(Feature::PerformanceMode)?;
        self.profiles
            .as_ref()
            .ok_or(GalaxybookError::FeatureDisabled(Feature::PerformanceMode))
    }

    pub fn profile_choices(&self) -> Result<Vec<PlatformProfile>> {
        Ok(self.profile_table()?.choices())
    }

    /* A firmware mode outside the table forces the fallback profile. */
    pub async fn profile(&mut self) -> Result<PlatformProfile> {
        let table = self.profile_table()?.clone();
        match table.current(&mut self.invoker).await {
            Err(GalaxybookError::UnrecognizedMode(code)) => {
                let fallback = fallback_profile(&table)?;
                warn!("performance mode 0x{code:x} is not a known profile; setting '{fallback}'");
                table.set(&mut self.invoker, fallback).await?;
                Ok(fallback)
            }
            other => other,
        }
    }

    pub async fn set_profile(&mut self, profile: PlatformProfile) -> Result<()> {
        let table = self.profile_table()?.clone();
        table.set(&mut self.invoker, profile).await
    }

    pub async fn cycle_profile(&mut self) -> Result<PlatformProfile> {
        let table = self.profile_table()?.clone();
        table.cycle(&mut self.invoker).await
    }

    /* ------------------------------------------------------------------ */
    /* Fans                                                                 */
    /* ------------------------------------------------------------------ */

    pub fn fans(&self) -> &[Fan] {
        &self.fans
    }

    pub async fn fan_rpm(&mut self, index: usize) -> Result<u64> {
        self.require(Feature::FanSpeed)?;
        let fan = self
            .fans
            .get(index)
            .cloned()
            .ok_or_else(|| GalaxybookError::InvalidArgument(format!("no fan {index}")))?;
        fan.rpm(self.invoker.acpi()).await
    }

    /* ------------------------------------------------------------------ */
    /* Hotkey actions                                                       */
    /* ------------------------------------------------------------------ */

    /* Carry out the state change bound to a hotkey. */
    pub async fn run_hotkey(&mut self, action: HotkeyAction) -> Result<()> {
        match action {
            HotkeyAction::KbdBacklight => {
                let next = if self.kbd_backlight < KBD_BACKLIGHT_MAX_BRIGHTNESS {
                    self.kbd_backlight + 1
                } else {
                    0
                };
                self.set_kbd_backlight(next).await
            }
            HotkeyAction::AllowRecording => {
                let value = self.get_allow_recording().await?;
                self.set_allow_recording(!value).await
            }
            HotkeyAction::PerformanceMode => {
                let profile = self.cycle_profile().await?;
                info!("performance mode hotkey switched to '{profile}'");
                Ok(())
            }
        }
    }
}

/* Balanced when the device has it, else its first supported profile. */
fn fallback_profile(table: &PerformanceModeTable) -> Result<PlatformProfile> {
    if table.is_supported(PlatformProfile::DEFAULT) {
        return Ok(PlatformProfile::DEFAULT);
    }
    table
        .choices()
        .first()
        .copied()
        .ok_or(GalaxybookError::NoSupportedProfiles)
}
