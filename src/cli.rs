//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rp2daq")]
#[command(author, version, about = "Control a Raspberry Pi Pico running the rp2daq firmware", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Serial endpoint path, or "dummy" for the built-in virtual device.
    /// Discovered by USB IDs when omitted.
    #[arg(long, global = true)]
    pub port: Option<String>,

    /// Only accept the device with this serial number
    /// (case-insensitive, colons allowed)
    #[arg(long, global = true)]
    pub serial: Option<String>,

    /// Firmware source tree to parse the command catalogue from
    #[arg(long, global = true, default_value = "firmware")]
    pub firmware: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List serial endpoints that look like rp2daq devices
    ListPorts,

    /// Round-trip the identify command and print the device identity
    Identify,

    /// Drive a GPIO pin to a logic level
    GpioOut {
        /// Pin number (0-29)
        #[arg(short, long)]
        gpio: u8,

        /// Logic level (0 or 1)
        #[arg(long)]
        value: u8,
    },

    /// Read the immediate level of a GPIO pin
    GpioIn {
        /// Pin number (0-29)
        #[arg(short, long)]
        gpio: u8,
    },

    /// Configure the PWM slice a pin belongs to
    PwmConfig {
        /// Pin number (0-29)
        #[arg(short, long)]
        gpio: u8,

        /// Counter top value
        #[arg(short, long, default_value_t = 999)]
        wrap_value: u16,

        /// Integer clock divider (1-255)
        #[arg(short, long, default_value_t = 1)]
        clkdiv: u8,
    },

    /// Set the duty value of a configured PWM pin
    PwmSet {
        /// Pin number (0-29)
        #[arg(short, long)]
        gpio: u8,

        /// Compare value; 0 switches off
        #[arg(long)]
        value: u16,
    },

    /// Stream sample blocks from the internal ADC
    Adc {
        /// Bit field of inputs: 1,2,4 are pins 26-28, 8 is Vref, 16 the
        /// internal thermometer
        #[arg(short, long, default_value_t = 1)]
        channels: u8,

        /// Samples per block
        #[arg(short, long, default_value_t = 1000)]
        blocksize: u16,

        /// Number of blocks to acquire
        #[arg(short = 'n', long, default_value_t = 10)]
        blocks: u16,

        /// ADC clock divider (48 MHz base, minimum 96)
        #[arg(long, default_value_t = 96)]
        clkdiv: u16,
    },

    /// Move a stepper channel to a nanopos target
    StepperMove {
        /// Stepper channel (0-3)
        #[arg(short, long, default_value_t = 0)]
        stepper: u8,

        /// Target position in nanopos units
        #[arg(short, long)]
        to: u32,

        /// Top speed in nanopos per cycle
        #[arg(long, default_value_t = 128)]
        speed: u32,
    },

    /// Print a stepper channel's position and activity
    StepperStatus {
        /// Stepper channel (0-3)
        #[arg(short, long, default_value_t = 0)]
        stepper: u8,
    },

    /// Render a markdown API reference from the descriptor catalogue
    Docs,
}
