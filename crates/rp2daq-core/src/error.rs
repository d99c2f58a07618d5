//! Error types for descriptor parsing and the wire codec

use thiserror::Error;

/// Errors raised while building the catalogue or coding messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The descriptor source is missing a required element
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// A command parameter failed its declared `min` check
    #[error("value {value} for parameter \"{field}\" is below minimum {min}")]
    BelowMinimum { field: String, value: i128, min: i128 },

    /// A command parameter failed its declared `max` check
    #[error("value {value} for parameter \"{field}\" exceeds maximum {max}")]
    AboveMaximum { field: String, value: i128, max: i128 },

    /// A command parameter does not fit its declared integer width
    #[error("value {value} for parameter \"{field}\" does not fit {width}")]
    WidthOverflow {
        field: String,
        value: i128,
        width: &'static str,
    },

    /// A command was invoked with a parameter the descriptor does not list
    #[error("command \"{command}\" has no parameter \"{field}\"")]
    UnknownParameter { command: String, field: String },

    /// A required parameter without a descriptor default was not supplied
    #[error("command \"{command}\" requires parameter \"{field}\"")]
    MissingParameter { command: String, field: String },

    /// No command with this name exists in the catalogue
    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),

    /// A report declared a sample bit width the codec cannot unpack
    #[error("unsupported payload encoding: {bitwidth}-bit samples")]
    UnsupportedEncoding { bitwidth: u8 },

    /// A report header was shorter than its descriptor requires
    #[error("report 0x{opcode:02X} header truncated: got {got} of {expected} bytes")]
    TruncatedHeader { opcode: u8, got: usize, expected: usize },
}

/// Result type alias using the core error
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Shorthand for a descriptor-source failure
    pub fn descriptor(msg: impl Into<String>) -> Self {
        Error::Descriptor(msg.into())
    }
}
