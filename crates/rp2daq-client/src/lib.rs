//! Host runtime for rp2daq devices.
//!
//! [`Rp2daq`] connects to a Raspberry Pi Pico running the rp2daq firmware
//! over its USB CDC serial endpoint and exposes every firmware command as
//! a typed call. Internally it multiplexes the compact binary protocol
//! described by the firmware sources:
//!
//! * [`locator`] finds and identity-checks the device,
//! * [`transport`] owns the endpoint on a reader/writer thread pair so a
//!   busy application never stalls USB reads,
//! * [`pipeline`] reassembles reports from the raw byte stream,
//! * [`dispatcher`] hands each report to the blocked caller or the
//!   registered callback,
//! * [`commands`] is the typed command surface generated from the
//!   descriptor catalogue.
//!
//! A command invoked without a callback blocks until its report arrives;
//! with a callback it returns immediately and the callback runs on a
//! dedicated worker thread for every matching report, including sample
//! streams of hundreds of kilosamples per second.
//!
//! ```no_run
//! use rp2daq_client::{commands::GpioOut, ConnectOptions, Rp2daq};
//!
//! let rp = Rp2daq::connect(ConnectOptions::default())?;
//! rp.call(&GpioOut { gpio: 25, value: 1 })?;
//! # Ok::<(), rp2daq_client::Error>(())
//! ```

pub mod commands;
pub mod device;
pub mod dispatcher;
pub mod dummy;
pub mod error;
pub mod link;
pub mod locator;
pub mod pipeline;
pub mod report;
pub mod transport;

pub use commands::{DeviceCommand, FromReport};
pub use device::{ConnectOptions, Rp2daq};
pub use error::{Error, Result};
pub use report::Report;
