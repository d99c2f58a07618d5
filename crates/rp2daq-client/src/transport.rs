//! Transport worker: exclusive owner of the endpoint
//!
//! Two threads share the endpoint, one per direction. The reader
//! forwards raw fragments into the receive queue in wire order; the
//! writer drains the transmit queue. Keeping both off the application's
//! threads means a CPU-bound application cannot stall USB reads and
//! overflow the device-side buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::link::{LinkReader, LinkWriter};

/// Item on the transmit queue
pub enum TxItem {
    /// An encoded command frame to put on the wire
    Frame(Vec<u8>),
    /// Sentinel: stop the writer thread
    Shutdown,
}

/// Connection state shared with the rest of the runtime
pub struct LinkState {
    connected: AtomicBool,
    on_disconnect: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl LinkState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            on_disconnect: Mutex::new(None),
        })
    }

    /// True while the endpoint is believed healthy
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Install a hook fired once on unexpected endpoint loss
    pub fn set_disconnect_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        *self.on_disconnect.lock().unwrap() = Some(hook);
    }

    /// Record an unexpected endpoint loss; idempotent
    pub fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let Some(hook) = self.on_disconnect.lock().unwrap().take() {
                hook();
            }
        }
    }

    /// Record an orderly shutdown without firing the disconnect hook
    pub fn mark_closed(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// The endpoint-owning thread pair
pub struct TransportWorker {
    tx: Sender<TxItem>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl TransportWorker {
    /// Spawn the reader and writer threads.
    ///
    /// `rx_delay` is the inter-read pacing sleep: on some hosts the
    /// scheduler otherwise fragments the stream into single-byte reads,
    /// on others any sleep overruns the device buffer. It is a fixed
    /// configuration choice, never measured at runtime.
    pub fn start(
        mut link_rx: Box<dyn LinkReader>,
        mut link_tx: Box<dyn LinkWriter>,
        fragment_tx: Sender<Vec<u8>>,
        rx_delay: Option<Duration>,
        state: Arc<LinkState>,
    ) -> Self {
        let (tx, tx_queue) = mpsc::channel::<TxItem>();
        let stop = Arc::new(AtomicBool::new(false));

        let reader_stop = Arc::clone(&stop);
        let reader_state = Arc::clone(&state);
        let reader = std::thread::Builder::new()
            .name("rp2daq-usb-rx".into())
            .spawn(move || {
                read_loop(&mut *link_rx, &fragment_tx, rx_delay, &reader_stop, &reader_state);
            })
            .expect("spawn reader thread");

        let writer_state = state;
        let writer = std::thread::Builder::new()
            .name("rp2daq-usb-tx".into())
            .spawn(move || {
                write_loop(&mut *link_tx, tx_queue, &writer_state);
            })
            .expect("spawn writer thread");

        Self {
            tx,
            stop,
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Handle for enqueueing command frames
    pub fn sender(&self) -> Sender<TxItem> {
        self.tx.clone()
    }

    /// Stop both threads and wait for them; idempotent.
    ///
    /// Dropping the reader closes the endpoint handle, which is what
    /// actually releases the device.
    pub fn stop(&mut self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(TxItem::Shutdown);
        }
        if let Some(h) = self.reader.take() {
            let _ = h.join();
        }
        if let Some(h) = self.writer.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TransportWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    link: &mut dyn LinkReader,
    fragment_tx: &Sender<Vec<u8>>,
    rx_delay: Option<Duration>,
    stop: &AtomicBool,
    state: &LinkState,
) {
    while !stop.load(Ordering::Acquire) {
        match link.read_fragment() {
            Ok(Some(fragment)) => {
                if fragment_tx.send(fragment).is_err() {
                    break;
                }
                if let Some(delay) = rx_delay {
                    std::thread::sleep(delay);
                }
            }
            Ok(None) => {}
            Err(_) => {
                if !stop.load(Ordering::Acquire) {
                    log::error!("device disconnected, check the cabling");
                    state.mark_disconnected();
                }
                break;
            }
        }
    }
    // fragment_tx drops here; the receive pipeline drains out and exits
}

fn write_loop(link: &mut dyn LinkWriter, queue: Receiver<TxItem>, state: &LinkState) {
    while let Ok(item) = queue.recv() {
        match item {
            TxItem::Frame(frame) => {
                if let Err(e) = link.write_all(&frame) {
                    log::error!("write to device failed: {}", e);
                    state.mark_disconnected();
                    break;
                }
            }
            TxItem::Shutdown => break,
        }
    }
}
