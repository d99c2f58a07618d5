//! Typed command surface
//!
//! One args struct per firmware command, converted through a single
//! generic call site ([`crate::Rp2daq::call`]) that looks the command
//! descriptor up by name. `Default` impls mirror the `default=`
//! annotations in the firmware source; a test below asserts the mirror
//! against the parsed catalogue so the two cannot drift apart.

use crate::error::Result;
use crate::locator::{self, DeviceIdentity};
use crate::report::Report;

/// A typed firmware command
pub trait DeviceCommand {
    /// Command name in the firmware's `message_table`
    const NAME: &'static str;
    /// Typed form of the matching report
    type Output: FromReport;
    /// Arguments by descriptor field name
    fn args(&self) -> Vec<(&'static str, i128)>;
}

/// Conversion from the generic report record
pub trait FromReport: Sized {
    fn from_report(report: Report) -> Result<Self>;
}

impl FromReport for Report {
    fn from_report(report: Report) -> Result<Self> {
        Ok(report)
    }
}

/// Query the device identity (opcode 0)
#[derive(Debug, Clone, Copy, Default)]
pub struct Identify;

/// Identity string reported by the device
#[derive(Debug, Clone)]
pub struct IdentifyReport {
    /// `rp2daq_<YYMMDD>_<16 hex digits>`
    pub identity: String,
}

impl IdentifyReport {
    /// Firmware version and unique ID parsed out of the identity
    pub fn device(&self) -> Result<DeviceIdentity> {
        locator::parse_identity(self.identity.as_bytes())
    }
}

impl DeviceCommand for Identify {
    const NAME: &'static str = "identify";
    type Output = IdentifyReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        Vec::new()
    }
}

impl FromReport for IdentifyReport {
    fn from_report(report: Report) -> Result<Self> {
        let data = report.into_data().unwrap_or_default();
        let bytes: Vec<u8> = data.iter().map(|&v| v as u8).collect();
        Ok(Self {
            identity: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Drive one GPIO pin to a logic level
#[derive(Debug, Clone, Copy, Default)]
pub struct GpioOut {
    pub gpio: u8,
    pub value: u8,
}

/// Acknowledgement of [`GpioOut`]
#[derive(Debug, Clone, Copy)]
pub struct GpioOutReport;

impl DeviceCommand for GpioOut {
    const NAME: &'static str = "gpio_out";
    type Output = GpioOutReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![("gpio", self.gpio as i128), ("value", self.value as i128)]
    }
}

impl FromReport for GpioOutReport {
    fn from_report(_report: Report) -> Result<Self> {
        Ok(Self)
    }
}

/// Read the immediate level of one GPIO pin
#[derive(Debug, Clone, Copy, Default)]
pub struct GpioIn {
    pub gpio: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct GpioInReport {
    pub gpio: u8,
    pub value: u8,
}

impl DeviceCommand for GpioIn {
    const NAME: &'static str = "gpio_in";
    type Output = GpioInReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![("gpio", self.gpio as i128)]
    }
}

impl FromReport for GpioInReport {
    fn from_report(report: Report) -> Result<Self> {
        Ok(Self {
            gpio: report.require("gpio")? as u8,
            value: report.require("value")? as u8,
        })
    }
}

/// Subscribe to edge events on one GPIO pin.
///
/// The device answers with one report per selected edge; disabling both
/// edges stops the stream.
#[derive(Debug, Clone, Copy)]
pub struct GpioOnChange {
    pub gpio: u8,
    pub on_rising_edge: u8,
    pub on_falling_edge: u8,
}

impl Default for GpioOnChange {
    fn default() -> Self {
        Self {
            gpio: 0,
            on_rising_edge: 1,
            on_falling_edge: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GpioOnChangeReport {
    pub gpio: u8,
    pub value: u8,
    pub events_missed: u8,
    pub time_us: u64,
}

impl DeviceCommand for GpioOnChange {
    const NAME: &'static str = "gpio_on_change";
    type Output = GpioOnChangeReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![
            ("gpio", self.gpio as i128),
            ("on_rising_edge", self.on_rising_edge as i128),
            ("on_falling_edge", self.on_falling_edge as i128),
        ]
    }
}

impl FromReport for GpioOnChangeReport {
    fn from_report(report: Report) -> Result<Self> {
        Ok(Self {
            gpio: report.require("gpio")? as u8,
            value: report.require("value")? as u8,
            events_missed: report.require("events_missed")? as u8,
            time_us: report.require("time_us")? as u64,
        })
    }
}

/// Configure the PWM slice one pin belongs to
#[derive(Debug, Clone, Copy)]
pub struct PwmConfigurePair {
    pub gpio: u8,
    pub wrap_value: u16,
    pub clkdiv: u8,
    pub clkdiv_int_frac: u8,
}

impl Default for PwmConfigurePair {
    fn default() -> Self {
        Self {
            gpio: 0,
            wrap_value: 999,
            clkdiv: 1,
            clkdiv_int_frac: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PwmConfigurePairReport;

impl DeviceCommand for PwmConfigurePair {
    const NAME: &'static str = "pwm_configure_pair";
    type Output = PwmConfigurePairReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![
            ("gpio", self.gpio as i128),
            ("wrap_value", self.wrap_value as i128),
            ("clkdiv", self.clkdiv as i128),
            ("clkdiv_int_frac", self.clkdiv_int_frac as i128),
        ]
    }
}

impl FromReport for PwmConfigurePairReport {
    fn from_report(_report: Report) -> Result<Self> {
        Ok(Self)
    }
}

/// Set the duty value of one configured PWM pin
#[derive(Debug, Clone, Copy, Default)]
pub struct PwmSetValue {
    pub gpio: u8,
    pub value: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct PwmSetValueReport;

impl DeviceCommand for PwmSetValue {
    const NAME: &'static str = "pwm_set_value";
    type Output = PwmSetValueReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![("gpio", self.gpio as i128), ("value", self.value as i128)]
    }
}

impl FromReport for PwmSetValueReport {
    fn from_report(_report: Report) -> Result<Self> {
        Ok(Self)
    }
}

/// Start block-wise acquisition on the internal ADC.
///
/// One report per block; `blocks_to_send` in the reports counts down to
/// zero unless `infinite` is set.
#[derive(Debug, Clone, Copy)]
pub struct InternalAdc {
    pub channel_mask: u8,
    pub blocksize: u16,
    pub blocks_to_send: u16,
    pub infinite: u8,
    pub clkdiv: u16,
}

impl Default for InternalAdc {
    fn default() -> Self {
        Self {
            channel_mask: 1,
            blocksize: 1000,
            blocks_to_send: 1,
            infinite: 0,
            clkdiv: 96,
        }
    }
}

/// One ADC block with its expanded samples
#[derive(Debug, Clone)]
pub struct InternalAdcReport {
    pub channel_mask: u8,
    pub blocks_to_send: u16,
    pub block_delayed_by_usb: u8,
    pub start_time_us: u64,
    pub data: Vec<u16>,
}

impl DeviceCommand for InternalAdc {
    const NAME: &'static str = "internal_adc";
    type Output = InternalAdcReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![
            ("channel_mask", self.channel_mask as i128),
            ("blocksize", self.blocksize as i128),
            ("blocks_to_send", self.blocks_to_send as i128),
            ("infinite", self.infinite as i128),
            ("clkdiv", self.clkdiv as i128),
        ]
    }
}

impl FromReport for InternalAdcReport {
    fn from_report(report: Report) -> Result<Self> {
        Ok(Self {
            channel_mask: report.require("channel_mask")? as u8,
            blocks_to_send: report.require("blocks_to_send")? as u16,
            block_delayed_by_usb: report.require("block_delayed_by_usb")? as u8,
            start_time_us: report.require("start_time_us")? as u64,
            data: report.into_data().unwrap_or_default(),
        })
    }
}

/// Assign pins to a stepper channel
#[derive(Debug, Clone, Copy)]
pub struct StepperInit {
    pub stepper_number: u8,
    pub dir_gpio: u8,
    pub step_gpio: u8,
    pub endswitch_gpio: u8,
    pub disable_gpio: u8,
    pub inertia: u32,
}

impl Default for StepperInit {
    fn default() -> Self {
        Self {
            stepper_number: 0,
            dir_gpio: 0,
            step_gpio: 0,
            endswitch_gpio: 255,
            disable_gpio: 255,
            inertia: 128,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepperInitReport {
    pub stepper_number: u8,
    pub initial_nanopos: u32,
}

impl DeviceCommand for StepperInit {
    const NAME: &'static str = "stepper_init";
    type Output = StepperInitReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![
            ("stepper_number", self.stepper_number as i128),
            ("dir_gpio", self.dir_gpio as i128),
            ("step_gpio", self.step_gpio as i128),
            ("endswitch_gpio", self.endswitch_gpio as i128),
            ("disable_gpio", self.disable_gpio as i128),
            ("inertia", self.inertia as i128),
        ]
    }
}

impl FromReport for StepperInitReport {
    fn from_report(report: Report) -> Result<Self> {
        Ok(Self {
            stepper_number: report.require("stepper_number")? as u8,
            initial_nanopos: report.require("initial_nanopos")? as u32,
        })
    }
}

/// Move one stepper channel towards a nanopos target
#[derive(Debug, Clone, Copy)]
pub struct StepperMove {
    pub stepper_number: u8,
    pub to: u32,
    pub speed: u32,
    pub endswitch_ignore: u8,
    pub reset_zero_pos: u8,
}

impl Default for StepperMove {
    fn default() -> Self {
        Self {
            stepper_number: 0,
            to: 0,
            speed: 128,
            endswitch_ignore: 0,
            reset_zero_pos: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepperMoveReport {
    pub stepper_number: u8,
    pub nanopos: u32,
    pub endswitch_triggered: u8,
    pub move_finished: u8,
}

impl DeviceCommand for StepperMove {
    const NAME: &'static str = "stepper_move";
    type Output = StepperMoveReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![
            ("stepper_number", self.stepper_number as i128),
            ("to", self.to as i128),
            ("speed", self.speed as i128),
            ("endswitch_ignore", self.endswitch_ignore as i128),
            ("reset_zero_pos", self.reset_zero_pos as i128),
        ]
    }
}

impl FromReport for StepperMoveReport {
    fn from_report(report: Report) -> Result<Self> {
        Ok(Self {
            stepper_number: report.require("stepper_number")? as u8,
            nanopos: report.require("nanopos")? as u32,
            endswitch_triggered: report.require("endswitch_triggered")? as u8,
            move_finished: report.require("move_finished")? as u8,
        })
    }
}

/// Snapshot one stepper channel's state
#[derive(Debug, Clone, Copy, Default)]
pub struct StepperStatus {
    pub stepper_number: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct StepperStatusReport {
    pub stepper_number: u8,
    pub active: u8,
    pub endswitch: u8,
    pub nanopos: u32,
}

impl DeviceCommand for StepperStatus {
    const NAME: &'static str = "stepper_status";
    type Output = StepperStatusReport;

    fn args(&self) -> Vec<(&'static str, i128)> {
        vec![("stepper_number", self.stepper_number as i128)]
    }
}

impl FromReport for StepperStatusReport {
    fn from_report(report: Report) -> Result<Self> {
        Ok(Self {
            stepper_number: report.require("stepper_number")? as u8,
            active: report.require("active")? as u8,
            endswitch: report.require("endswitch")? as u8,
            nanopos: report.require("nanopos")? as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp2daq_core::{parser, Catalogue};
    use std::path::Path;

    fn catalogue() -> Catalogue {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../firmware");
        parser::parse_firmware(&dir).unwrap()
    }

    fn assert_mirrors<C: DeviceCommand + Default>(catalogue: &Catalogue) {
        let cmd = catalogue
            .command_by_name(C::NAME)
            .unwrap_or_else(|| panic!("{} missing from catalogue", C::NAME));
        let defaults = C::default().args();

        // typed args cover every descriptor field, in order
        assert_eq!(
            defaults.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            cmd.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            "field order for {}",
            C::NAME
        );

        // Default values agree with every default= annotation
        for (name, value) in defaults {
            let field = cmd.field(name).unwrap();
            if let Some(d) = field.default {
                assert_eq!(value, d, "default for {}.{}", C::NAME, name);
            }
        }
    }

    #[test]
    fn test_typed_surface_mirrors_descriptors() {
        let cat = catalogue();
        assert_mirrors::<Identify>(&cat);
        assert_mirrors::<GpioOut>(&cat);
        assert_mirrors::<GpioIn>(&cat);
        assert_mirrors::<GpioOnChange>(&cat);
        assert_mirrors::<PwmConfigurePair>(&cat);
        assert_mirrors::<PwmSetValue>(&cat);
        assert_mirrors::<InternalAdc>(&cat);
        assert_mirrors::<StepperInit>(&cat);
        assert_mirrors::<StepperMove>(&cat);
        assert_mirrors::<StepperStatus>(&cat);
    }

    #[test]
    fn test_firmware_catalogue_shape() {
        let cat = catalogue();
        assert_eq!(cat.version(), 240715);
        assert_eq!(cat.len(), 10);
        assert_eq!(cat.command_by_name("identify").unwrap().opcode, 0);
        assert!(cat.report(6).unwrap().has_payload);
        assert!(!cat.report(1).unwrap().has_payload);
    }
}
