//! Core library for the rp2daq host runtime.
//!
//! The rp2daq firmware describes its own binary message interface in its C
//! sources: a `message_table` assigns opcodes, each command handler opens
//! with a packed argument struct, and each `<name>_report` struct describes
//! the report header the device sends back. This crate turns that source
//! tree into a typed [`descriptor::Catalogue`] and implements the wire
//! codec on top of it: command frame encoding with bounds enforcement,
//! report header decoding, and the 8/12/16-bit sample payload packing.
//!
//! Everything here is pure data transformation; serial I/O and the
//! threaded runtime live in `rp2daq-client`.

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod parser;
pub mod payload;

pub use descriptor::{Catalogue, CommandDescriptor, FieldDescriptor, FieldWidth, ReportDescriptor};
pub use error::{Error, Result};
