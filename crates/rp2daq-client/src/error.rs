//! Error types for the rp2daq host runtime

use thiserror::Error;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    /// No serial endpoint identified itself as a matching rp2daq device
    #[error("no matching rp2daq device found")]
    DeviceNotFound,

    /// A device answered, but its firmware version does not match the
    /// version of the descriptor source this runtime was built from
    #[error("device firmware version {found} does not match descriptor version {required}")]
    IncompatibleFirmware { found: u32, required: u32 },

    /// A candidate endpoint's identify response was not a valid identity
    #[error("endpoint did not identify as rp2daq: {0}")]
    BadIdentity(String),

    /// An unknown opcode arrived; the byte stream can no longer be framed
    #[error("protocol desynchronised: unknown report opcode 0x{opcode:02X}")]
    ProtocolDesync { opcode: u8 },

    /// The serial endpoint closed underneath the runtime
    #[error("device disconnected")]
    Disconnected,

    /// The runtime was shut down while the call was pending
    #[error("call cancelled: runtime shut down")]
    Cancelled,

    /// A typed report conversion did not find an expected header field
    #[error("report \"{report}\" has no field \"{field}\"")]
    MissingReportField { report: String, field: String },

    /// Descriptor or codec failure (bounds, parsing, encodings)
    #[error(transparent)]
    Core(#[from] rp2daq_core::Error),

    /// Serial port layer failure
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Plain I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations
pub type Result<T> = core::result::Result<T, Error>;
