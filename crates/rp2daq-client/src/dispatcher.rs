//! Report dispatch: sync waiters, subscriptions and the callback worker
//!
//! Every opcode is in one of three states: a callback is subscribed, a
//! synchronous caller is waiting, or nobody cares (the report is logged
//! and dropped). Callbacks never run on the receive-pipeline thread;
//! they are queued to one dedicated worker, so callbacks for a single
//! opcode arrive in wire order and are never concurrent. Callbacks for
//! *different* opcodes share that worker too, which serialises them —
//! the simple choice the protocol permits.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::report::Report;

/// Callback installed by an asynchronous call
pub type Callback = Box<dyn FnMut(Report) + Send>;

struct CallbackJob {
    callback: Arc<Mutex<Callback>>,
    report: Report,
}

/// Hand-off slot for one opcode's synchronous callers.
///
/// Created on the first synchronous use of the opcode and reused for
/// the lifetime of the runtime.
struct SyncSlot {
    tx: Sender<Result<Report>>,
    rx: Arc<Mutex<Receiver<Result<Report>>>>,
    waiting: Arc<AtomicUsize>,
}

/// Receiver half handed to a blocked caller
pub struct SyncTicket {
    rx: Arc<Mutex<Receiver<Result<Report>>>>,
    waiting: Arc<AtomicUsize>,
}

impl SyncTicket {
    /// Block until the dispatcher deposits this opcode's next report
    pub fn wait(self) -> Result<Report> {
        let guard = self.rx.lock().unwrap();
        match guard.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }
}

impl Drop for SyncTicket {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Routes assembled reports to their consumers
pub struct Dispatcher {
    slots: Mutex<HashMap<u8, SyncSlot>>,
    subscriptions: Mutex<HashMap<u8, Arc<Mutex<Callback>>>>,
    jobs: Mutex<Option<Sender<CallbackJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancelled: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<CallbackJob>();
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker_cancelled = Arc::clone(&cancelled);
        let worker = std::thread::Builder::new()
            .name("rp2daq-callbacks".into())
            .spawn(move || {
                for job in jobs_rx {
                    // reports already queued must not fire after cancel
                    if worker_cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    let mut callback = job.callback.lock().unwrap();
                    (callback)(job.report);
                }
            })
            .expect("spawn callback worker");

        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            jobs: Mutex::new(Some(jobs_tx)),
            worker: Mutex::new(Some(worker)),
            cancelled,
        })
    }

    /// Install (or replace) the callback subscribed to an opcode
    pub fn subscribe(&self, opcode: u8, callback: Callback) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(opcode, Arc::new(Mutex::new(callback)));
    }

    /// Register a synchronous wait on an opcode.
    ///
    /// Clears any standing subscription for the opcode: a synchronous
    /// call supersedes the previous asynchronous one. The caller must
    /// obtain the ticket *before* the command frame is queued so the
    /// report cannot win the race.
    pub fn begin_sync(&self, opcode: u8) -> SyncTicket {
        self.subscriptions.lock().unwrap().remove(&opcode);

        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(opcode).or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            SyncSlot {
                tx,
                rx: Arc::new(Mutex::new(rx)),
                waiting: Arc::new(AtomicUsize::new(0)),
            }
        });
        slot.waiting.fetch_add(1, Ordering::AcqRel);
        SyncTicket {
            rx: Arc::clone(&slot.rx),
            waiting: Arc::clone(&slot.waiting),
        }
    }

    /// Route one assembled report
    pub fn deliver(&self, report: Report) {
        let opcode = report.opcode();

        let subscription = self.subscriptions.lock().unwrap().get(&opcode).cloned();
        if let Some(callback) = subscription {
            if let Some(jobs) = &*self.jobs.lock().unwrap() {
                let _ = jobs.send(CallbackJob { callback, report });
            }
            return;
        }

        if let Some(tx) = self.sync_waiter(opcode) {
            let _ = tx.send(Ok(report));
            return;
        }

        log::warn!(
            "unsolicited report \"{}\" (0x{:02X}) dropped",
            report.name(),
            opcode
        );
    }

    /// Route a per-report failure (e.g. an undecodable payload) to the
    /// receiver that would have gotten the report
    pub fn deliver_error(&self, opcode: u8, error: Error) {
        if self.subscriptions.lock().unwrap().contains_key(&opcode) {
            log::warn!("report 0x{:02X} dropped before callback: {}", opcode, error);
            return;
        }
        if let Some(tx) = self.sync_waiter(opcode) {
            let _ = tx.send(Err(error));
        } else {
            log::warn!("undeliverable report 0x{:02X}: {}", opcode, error);
        }
    }

    fn sync_waiter(&self, opcode: u8) -> Option<Sender<Result<Report>>> {
        let slots = self.slots.lock().unwrap();
        let slot = slots.get(&opcode)?;
        if slot.waiting.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(slot.tx.clone())
    }

    /// True once the dispatcher has been shut down
    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail every pending synchronous call, drop all subscriptions and
    /// close the callback queue. Idempotent, callable from any thread
    /// including the callback worker itself; use [`join_worker`] to wait
    /// for the worker afterwards.
    ///
    /// [`join_worker`]: Dispatcher::join_worker
    pub fn cancel_all(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the slot senders wakes every blocked `recv` as
        // `Cancelled`; an explicit error reaches callers already queued.
        let slots = std::mem::take(&mut *self.slots.lock().unwrap());
        for slot in slots.values() {
            let _ = slot.tx.send(Err(Error::Cancelled));
        }
        drop(slots);

        self.subscriptions.lock().unwrap().clear();
        drop(self.jobs.lock().unwrap().take());
    }

    /// Wait for the callback worker to exit. A no-op when called from a
    /// callback (the worker cannot join itself); the worker then exits
    /// as soon as the callback returns.
    pub fn join_worker(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp2daq_core::descriptor::{FieldDescriptor, FieldWidth, ReportDescriptor};
    use std::time::Duration;

    fn descriptor(opcode: u8) -> Arc<ReportDescriptor> {
        Arc::new(ReportDescriptor {
            name: "probe".into(),
            opcode,
            fields: vec![
                FieldDescriptor {
                    name: "report_code".into(),
                    signed: false,
                    width: FieldWidth::W8,
                    min: None,
                    max: None,
                    default: None,
                    comment: String::new(),
                },
                FieldDescriptor {
                    name: "seq".into(),
                    signed: false,
                    width: FieldWidth::W16,
                    min: None,
                    max: None,
                    default: None,
                    comment: String::new(),
                },
            ],
            has_payload: false,
        })
    }

    fn report(desc: &Arc<ReportDescriptor>, seq: i128) -> Report {
        Report::new(Arc::clone(desc), vec![desc.opcode as i128, seq], None)
    }

    #[test]
    fn test_sync_handoff() {
        let dispatcher = Dispatcher::new();
        let desc = descriptor(3);

        let ticket = dispatcher.begin_sync(3);
        dispatcher.deliver(report(&desc, 42));

        let got = ticket.wait().unwrap();
        assert_eq!(got.get("seq"), Some(42));
        dispatcher.cancel_all();
    }

    #[test]
    fn test_subscription_wins_over_slot() {
        let dispatcher = Dispatcher::new();
        let desc = descriptor(5);
        let (seen_tx, seen_rx) = mpsc::channel();

        dispatcher.subscribe(
            5,
            Box::new(move |r| seen_tx.send(r.get("seq").unwrap()).unwrap()),
        );
        for seq in [1, 2, 3] {
            dispatcher.deliver(report(&desc, seq));
        }

        // wire order preserved through the callback worker
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 3);
        dispatcher.cancel_all();
    }

    #[test]
    fn test_sync_call_clears_subscription() {
        let dispatcher = Dispatcher::new();
        let desc = descriptor(7);
        let (seen_tx, seen_rx) = mpsc::channel();

        dispatcher.subscribe(7, Box::new(move |r| seen_tx.send(r.opcode()).unwrap()));
        let ticket = dispatcher.begin_sync(7);
        dispatcher.deliver(report(&desc, 1));

        assert!(ticket.wait().is_ok());
        assert!(seen_rx.try_recv().is_err());
        dispatcher.cancel_all();
    }

    #[test]
    fn test_unsolicited_report_dropped() {
        let dispatcher = Dispatcher::new();
        let desc = descriptor(9);
        // no subscription, no waiter: must not panic or leak anywhere
        dispatcher.deliver(report(&desc, 0));
        dispatcher.cancel_all();
    }

    #[test]
    fn test_cancel_unblocks_waiter() {
        let dispatcher = Dispatcher::new();
        let ticket = dispatcher.begin_sync(1);

        let canceller = Arc::clone(&dispatcher);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel_all();
        });

        assert!(matches!(ticket.wait(), Err(Error::Cancelled)));
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let dispatcher = Dispatcher::new();
        dispatcher.cancel_all();
        dispatcher.cancel_all();
        assert!(dispatcher.cancelled());
    }

    #[test]
    fn test_payload_error_reaches_sync_waiter() {
        let dispatcher = Dispatcher::new();
        let ticket = dispatcher.begin_sync(6);
        dispatcher.deliver_error(
            6,
            Error::Core(rp2daq_core::Error::UnsupportedEncoding { bitwidth: 24 }),
        );
        assert!(matches!(ticket.wait(), Err(Error::Core(_))));
        dispatcher.cancel_all();
    }
}
