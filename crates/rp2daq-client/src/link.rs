//! Byte-link abstraction under the transport worker
//!
//! The runtime talks to its endpoint through a reader/writer half pair
//! so the transport threads can own their halves independently. Two
//! implementations exist: the USB CDC serial endpoint, and an in-memory
//! pipe used by the virtual device and by tests.

use std::io::Read;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::{Error, Result};

/// Poll granularity of a blocked read; the reader thread re-checks its
/// stop flag at this interval.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest fragment a single read produces
const MAX_FRAGMENT: usize = 4096;

/// Receiving half of a byte link
pub trait LinkReader: Send {
    /// Read at least one byte, up to whatever is readily available.
    ///
    /// Returns `Ok(None)` when no byte arrived within the poll interval,
    /// `Err` when the link is gone.
    fn read_fragment(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Transmitting half of a byte link
pub trait LinkWriter: Send {
    /// Write the whole slice, in order
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Open a serial endpoint and split it into link halves.
///
/// 115200 baud 8N1; the baud rate is nominal for USB CDC. The two
/// halves are independent cloned handles of the same endpoint.
pub fn open_serial(path: &str) -> Result<(Box<dyn LinkReader>, Box<dyn LinkWriter>)> {
    let port = serialport::new(path, 115_200)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    let writer = port.try_clone()?;
    log::info!("opened serial endpoint {}", path);

    Ok((
        Box::new(SerialReader { port }),
        Box::new(SerialWriter { port: writer }),
    ))
}

struct SerialReader {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkReader for SerialReader {
    fn read_fragment(&mut self) -> Result<Option<Vec<u8>>> {
        // Read at least one byte, up to in-waiting, so short reports do
        // not wait for a full buffer and long streams arrive in bulk.
        let waiting = self.port.bytes_to_read().unwrap_or(0) as usize;
        let mut buf = vec![0u8; waiting.clamp(1, MAX_FRAGMENT)];

        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(_) => Err(Error::Disconnected),
        }
    }
}

struct SerialWriter {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkWriter for SerialWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        self.port.write_all(bytes).map_err(|_| Error::Disconnected)?;
        self.port.flush().map_err(|_| Error::Disconnected)?;
        Ok(())
    }
}

/// In-memory byte pipe: one direction of a virtual link
pub mod pipe {
    use super::*;

    /// Create a unidirectional pipe
    pub fn pair() -> (PipeWriter, PipeReader) {
        let (tx, rx) = mpsc::channel();
        (PipeWriter { tx }, PipeReader { rx })
    }

    /// Create both directions of a host/device link: the first tuple is
    /// the host's halves, the second the device's.
    #[allow(clippy::type_complexity)]
    pub fn duplex() -> ((PipeReader, PipeWriter), (PipeReader, PipeWriter)) {
        let (host_tx, device_rx) = pair();
        let (device_tx, host_rx) = pair();
        ((host_rx, host_tx), (device_rx, device_tx))
    }

    pub struct PipeWriter {
        tx: Sender<Vec<u8>>,
    }

    pub struct PipeReader {
        rx: Receiver<Vec<u8>>,
    }

    impl LinkWriter for PipeWriter {
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.tx
                .send(bytes.to_vec())
                .map_err(|_| Error::Disconnected)
        }
    }

    impl LinkReader for PipeReader {
        fn read_fragment(&mut self) -> Result<Option<Vec<u8>>> {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
            }
        }
    }
}
