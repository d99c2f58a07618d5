//! Receive pipeline: fragments in, whole reports out
//!
//! Fragment boundaries carry no meaning; the pipeline owns a byte deque
//! fed by the transport reader and parses strictly sequentially: one
//! opcode byte names the report, the descriptor gives the header width,
//! the header may announce a sample payload. A partially received
//! report simply holds the pipeline until its bytes arrive. An opcode
//! the catalogue does not know means the stream can no longer be framed
//! and the runtime is torn down.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use rp2daq_core::{codec, payload, Catalogue};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::report::Report;
use crate::transport::LinkState;

/// Blocking byte view over the fragment queue
pub struct ByteStream {
    rx: Receiver<Vec<u8>>,
    buf: VecDeque<u8>,
}

impl ByteStream {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buf: VecDeque::new(),
        }
    }

    /// Pop exactly `n` bytes, blocking until they are buffered
    pub fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buf.len() < n {
            let fragment = self.rx.recv().map_err(|_| Error::Disconnected)?;
            self.buf.extend(fragment);
        }
        Ok(self.buf.drain(..n).collect())
    }
}

/// Spawn the pipeline thread.
///
/// The thread runs until the fragment queue closes (orderly shutdown or
/// endpoint loss) or the stream desynchronises; either way it fails all
/// pending synchronous calls on its way out.
pub fn spawn(
    catalogue: Arc<Catalogue>,
    rx: Receiver<Vec<u8>>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<LinkState>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("rp2daq-pipeline".into())
        .spawn(move || {
            let mut stream = ByteStream::new(rx);
            if let Err(e) = run(&catalogue, &mut stream, &dispatcher) {
                match e {
                    Error::Disconnected => log::debug!("receive pipeline drained"),
                    other => {
                        log::error!("receive pipeline failed: {}", other);
                        state.mark_disconnected();
                    }
                }
            }
            dispatcher.cancel_all();
        })
        .expect("spawn pipeline thread")
}

fn run(catalogue: &Catalogue, stream: &mut ByteStream, dispatcher: &Dispatcher) -> Result<()> {
    loop {
        let opcode = stream.recv_exact(1)?[0];
        let desc = catalogue
            .report(opcode)
            .ok_or(Error::ProtocolDesync { opcode })?;

        let mut header = vec![opcode];
        header.extend(stream.recv_exact(desc.header_len() - 1)?);
        let values = codec::decode_header(desc, &header).map_err(Error::Core)?;

        if desc.has_payload {
            let count = values[desc.field_index("data_count").unwrap()] as usize;
            let bitwidth = values[desc.field_index("data_bitwidth").unwrap()] as u8;
            let raw = stream.recv_exact(payload::payload_len(count, bitwidth))?;

            match payload::unpack_samples(&raw, count, bitwidth) {
                Ok(data) => {
                    dispatcher.deliver(Report::new(Arc::clone(desc), values, Some(data)))
                }
                // the payload bytes are consumed either way, so the
                // stream stays framed and the pipeline continues
                Err(e) => dispatcher.deliver_error(opcode, Error::Core(e)),
            }
        } else {
            dispatcher.deliver(Report::new(Arc::clone(desc), values, None));
        }
    }
}
