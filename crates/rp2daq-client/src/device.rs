//! The runtime value: owns the workers, exposes the call surface
//!
//! One [`Rp2daq`] per device; all dispatch state lives inside the value,
//! so several runtimes (several devices) coexist in one process.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rp2daq_core::{codec, parser, Catalogue, CommandDescriptor};

use crate::commands::{DeviceCommand, FromReport};
use crate::dispatcher::Dispatcher;
use crate::dummy;
use crate::error::{Error, Result};
use crate::link::{self, LinkReader, LinkWriter};
use crate::locator;
use crate::pipeline;
use crate::report::Report;
use crate::transport::{LinkState, TransportWorker, TxItem};

/// Environment variable naming the required device serial number
pub const SERIAL_ENV: &str = "RP2DAQ_SERIAL";

/// Endpoint name selecting the in-process virtual device
pub const DUMMY_PORT: &str = "dummy";

/// Connection configuration
pub struct ConnectOptions {
    /// Endpoint path; `None` runs discovery, [`DUMMY_PORT`] attaches the
    /// virtual device
    pub port: Option<String>,
    /// Only accept a device with this serial number (case-insensitive,
    /// colons ignored); defaults from the `RP2DAQ_SERIAL` environment
    pub require_serial: Option<String>,
    /// Firmware source tree the descriptor catalogue is parsed from
    pub firmware_dir: PathBuf,
    /// Pacing sleep between endpoint reads. Some hosts fragment the
    /// stream into single-byte reads without it; on others any sleep
    /// overruns the device buffer. Fixed per platform, never inferred
    /// at runtime.
    pub rx_delay: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port: None,
            require_serial: std::env::var(SERIAL_ENV).ok(),
            firmware_dir: PathBuf::from("firmware"),
            rx_delay: if cfg!(unix) {
                Some(Duration::from_millis(2))
            } else {
                None
            },
        }
    }
}

/// A connected rp2daq device
pub struct Rp2daq {
    catalogue: Arc<Catalogue>,
    dispatcher: Arc<Dispatcher>,
    tx: mpsc::Sender<TxItem>,
    state: Arc<LinkState>,
    transport: Mutex<TransportWorker>,
    pipeline: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Rp2daq {
    /// Parse the descriptor catalogue, find the device and start the
    /// runtime threads
    pub fn connect(options: ConnectOptions) -> Result<Self> {
        let catalogue = Arc::new(parser::parse_firmware(&options.firmware_dir)?);
        log::info!(
            "descriptor catalogue: {} commands, firmware version {}",
            catalogue.len(),
            catalogue.version()
        );

        match options.port.as_deref() {
            Some(DUMMY_PORT) => {
                let (reader, writer) = dummy::spawn(Arc::clone(&catalogue));
                Ok(Self::over_link(catalogue, reader, writer, None))
            }
            Some(path) => {
                let (reader, writer) = link::open_serial(path)?;
                Ok(Self::over_link(catalogue, reader, writer, options.rx_delay))
            }
            None => {
                let path =
                    locator::locate(catalogue.version(), options.require_serial.as_deref())?;
                let (reader, writer) = link::open_serial(&path)?;
                Ok(Self::over_link(catalogue, reader, writer, options.rx_delay))
            }
        }
    }

    /// Start the runtime over an already-open byte link.
    ///
    /// This is the seam the virtual device and the tests use; bridged
    /// transports can use it too.
    pub fn over_link(
        catalogue: Arc<Catalogue>,
        reader: Box<dyn LinkReader>,
        writer: Box<dyn LinkWriter>,
        rx_delay: Option<Duration>,
    ) -> Self {
        let state = LinkState::new();
        let (fragment_tx, fragment_rx) = mpsc::channel();
        let transport =
            TransportWorker::start(reader, writer, fragment_tx, rx_delay, Arc::clone(&state));
        let dispatcher = Dispatcher::new();
        let pipeline = pipeline::spawn(
            Arc::clone(&catalogue),
            fragment_rx,
            Arc::clone(&dispatcher),
            Arc::clone(&state),
        );

        Self {
            tx: transport.sender(),
            catalogue,
            dispatcher,
            state,
            transport: Mutex::new(transport),
            pipeline: Mutex::new(Some(pipeline)),
            closed: AtomicBool::new(false),
        }
    }

    /// The immutable descriptor catalogue
    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// True while the endpoint is healthy and the runtime running
    pub fn connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.state.connected()
    }

    /// Install a hook fired once if the endpoint is lost unexpectedly
    pub fn on_disconnect(&self, hook: impl FnOnce() + Send + 'static) {
        self.state.set_disconnect_hook(Box::new(hook));
    }

    /// Invoke a typed command and block for its typed report
    pub fn call<C: DeviceCommand>(&self, command: &C) -> Result<C::Output> {
        let report = self.invoke(C::NAME, &command.args())?;
        C::Output::from_report(report)
    }

    /// Invoke a typed command asynchronously; `callback` runs on the
    /// callback worker for every matching report until replaced
    pub fn subscribe<C: DeviceCommand>(
        &self,
        command: &C,
        mut callback: impl FnMut(C::Output) + Send + 'static,
    ) -> Result<()> {
        self.invoke_with_callback(C::NAME, &command.args(), move |report| {
            match C::Output::from_report(report) {
                Ok(typed) => callback(typed),
                Err(e) => log::warn!("dropping malformed \"{}\" report: {}", C::NAME, e),
            }
        })
    }

    /// Invoke a command by name and block for its report.
    ///
    /// Arguments omitted from `args` take the descriptor defaults; a
    /// missing argument without a default is an error, as is a name the
    /// descriptor does not list. Bounds are enforced before any byte is
    /// queued.
    pub fn invoke(&self, name: &str, args: &[(&str, i128)]) -> Result<Report> {
        let (opcode, frame) = self.encode(name, args)?;
        self.ensure_alive()?;

        // the ticket must exist before the frame is on the wire
        let ticket = self.dispatcher.begin_sync(opcode);
        self.enqueue(frame)?;
        // a shutdown that completed between the liveness check and the
        // ticket would otherwise leave this wait unserved
        if self.dispatcher.cancelled() {
            return Err(Error::Cancelled);
        }
        ticket.wait()
    }

    /// Invoke a command by name with a standing callback; replaces the
    /// opcode's previous subscription and returns immediately
    pub fn invoke_with_callback(
        &self,
        name: &str,
        args: &[(&str, i128)],
        callback: impl FnMut(Report) + Send + 'static,
    ) -> Result<()> {
        let (opcode, frame) = self.encode(name, args)?;
        self.ensure_alive()?;

        self.dispatcher.subscribe(opcode, Box::new(callback));
        self.enqueue(frame)
    }

    /// Stop the runtime: close the endpoint, fail pending calls with
    /// `Cancelled`, join every thread. Idempotent; also runs on drop.
    pub fn quit(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("shutting down rp2daq runtime");

        self.state.mark_closed();
        self.transport.lock().unwrap().stop();

        // the reader is gone, so the fragment queue has closed and the
        // pipeline drains out, cancelling the dispatcher on its way
        let pipeline = self.pipeline.lock().unwrap().take();
        if let Some(handle) = pipeline {
            let _ = handle.join();
        }
        self.dispatcher.cancel_all();
        self.dispatcher.join_worker();
    }

    fn encode(&self, name: &str, args: &[(&str, i128)]) -> Result<(u8, Vec<u8>)> {
        let command = self
            .catalogue
            .command_by_name(name)
            .ok_or_else(|| Error::Core(rp2daq_core::Error::UnknownCommand(name.to_string())))?;
        let values = resolve_args(command, args)?;
        let frame = codec::encode_command(command, &values)?;
        Ok((command.opcode, frame))
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        if !self.state.connected() {
            return Err(Error::Disconnected);
        }
        if self.dispatcher.cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn enqueue(&self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(TxItem::Frame(frame))
            .map_err(|_| Error::Disconnected)
    }
}

impl Drop for Rp2daq {
    fn drop(&mut self) {
        self.quit();
    }
}

/// Order provided arguments by descriptor position, filling defaults
fn resolve_args(command: &CommandDescriptor, args: &[(&str, i128)]) -> Result<Vec<i128>> {
    for (name, _) in args {
        if command.field(name).is_none() {
            return Err(Error::Core(rp2daq_core::Error::UnknownParameter {
                command: command.name.clone(),
                field: name.to_string(),
            }));
        }
    }

    command
        .fields
        .iter()
        .map(|field| {
            args.iter()
                .find(|(name, _)| *name == field.name)
                .map(|&(_, value)| value)
                .or(field.default)
                .ok_or_else(|| {
                    Error::Core(rp2daq_core::Error::MissingParameter {
                        command: command.name.clone(),
                        field: field.name.clone(),
                    })
                })
        })
        .collect()
}
