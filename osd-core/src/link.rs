//! Request/response plumbing on top of a transport.
//!
//! A background dispatcher owns reception. Responses are routed to the one
//! request outstanding for the responding module; everything else (trace
//! records, stop notifications) goes to an [`EventHandler`].

use crate::error::TransportError;
use crate::protocol::{Body, Frame, ModuleId};
use crate::transport::Transport;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Receives frames that are not responses.
pub trait EventHandler: Send + Sync {
    /// An unsolicited frame from `src`.
    fn on_event(&self, src: ModuleId, body: Body);

    /// The transport failed; no more frames will arrive.
    fn on_link_lost(&self, error: &TransportError);
}

/// Timing knobs of a link.
#[derive(Debug, Clone, Copy)]
pub struct LinkTiming {
    /// How long a single request waits for its response.
    pub response_timeout: Duration,
    /// How often the dispatcher checks for shutdown while idle.
    pub poll_interval: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self { response_timeout: Duration::from_secs(2), poll_interval: Duration::from_millis(10) }
    }
}

type Pending = Arc<Mutex<HashMap<ModuleId, Sender<Body>>>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An open connection to the debug system.
pub struct Link {
    transport: Arc<dyn Transport>,
    pending: Pending,
    slots: Mutex<HashMap<ModuleId, Arc<Mutex<()>>>>,
    fatal: Arc<Mutex<Option<TransportError>>>,
    shutdown: Arc<AtomicBool>,
    dispatcher: Option<thread::JoinHandle<()>>,
    timing: LinkTiming,
}

impl Link {
    /// Start dispatching frames from `transport`.
    pub fn open(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn EventHandler>,
        timing: LinkTiming,
    ) -> Result<Self, TransportError> {
        let pending: Pending = Arc::default();
        let fatal = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let transport = Arc::clone(&transport);
            let pending = Arc::clone(&pending);
            let fatal = Arc::clone(&fatal);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new().name("osd-dispatch".to_string()).spawn(move || {
                dispatch_loop(&*transport, &pending, &fatal, &shutdown, &*handler, timing.poll_interval);
            })?
        };

        Ok(Self {
            transport,
            pending,
            slots: Mutex::default(),
            fatal,
            shutdown,
            dispatcher: Some(dispatcher),
            timing,
        })
    }

    /// The error that took the link down, if it is down.
    pub fn fatal_error(&self) -> Option<TransportError> {
        lock(&self.fatal).clone()
    }

    fn slot(&self, module: ModuleId) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.slots).entry(module).or_default())
    }

    /// Send a request and wait for the module's response.
    ///
    /// Only one request per module is in flight at a time; requests to
    /// different modules proceed independently.
    pub fn transact(&self, module: ModuleId, body: Body) -> Result<Body, TransportError> {
        if let Some(e) = self.fatal_error() {
            return Err(e);
        }

        let slot = self.slot(module);
        let _exclusive = lock(&slot);

        let (tx, rx) = crossbeam_channel::bounded(1);
        lock(&self.pending).insert(module, tx);

        log::trace!("-> {module} {}", body.name());
        if let Err(e) = self.transport.send(&Frame::to_module(module, body)) {
            lock(&self.pending).remove(&module);
            return Err(e);
        }

        match rx.recv_timeout(self.timing.response_timeout) {
            Ok(response) => {
                log::trace!("<- {module} {}", response.name());
                Ok(response)
            }
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.pending).remove(&module);
                Err(TransportError::NoResponse(module))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self
                .fatal_error()
                .unwrap_or_else(|| TransportError::LinkLost("dispatcher stopped".to_string()))),
        }
    }

    /// Read a register. A rejection is a protocol violation at this level.
    pub fn read_register(&self, module: ModuleId, reg: u16) -> Result<u64, TransportError> {
        match self.transact(module, Body::RegRead { reg })? {
            Body::RegValue { reg: r, value } if r == reg => Ok(value),
            other => Err(unexpected(module, &other, "reg-value")),
        }
    }

    /// Write a register and wait for the acknowledgement.
    pub fn write_register(&self, module: ModuleId, reg: u16, value: u64) -> Result<(), TransportError> {
        match self.transact(module, Body::RegWrite { reg, value })? {
            Body::Ack => Ok(()),
            other => Err(unexpected(module, &other, "ack")),
        }
    }
}

pub(crate) fn unexpected(module: ModuleId, body: &Body, wanted: &str) -> TransportError {
    TransportError::Protocol { module, detail: format!("expected {wanted}, got {body:?}") }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

fn dispatch_loop(
    transport: &dyn Transport,
    pending: &Pending,
    fatal: &Mutex<Option<TransportError>>,
    shutdown: &AtomicBool,
    handler: &dyn EventHandler,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match transport.receive(poll_interval) {
            Ok(Some(frame)) => {
                if frame.body.is_response() {
                    let waiter = lock(pending).remove(&frame.src);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(frame.body);
                        }
                        None => log::warn!("Dropping unsolicited {} from module {}", frame.body.name(), frame.src),
                    }
                } else {
                    handler.on_event(frame.src, frame.body);
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Debug link failed: {e}");
                *lock(fatal) = Some(e.clone());
                // Dropping the senders wakes every waiting request.
                lock(pending).clear();
                handler.on_link_lost(&e);
                return;
            }
        }
    }
    log::debug!("Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, Sender};

    /// Echoes register reads back as their register number, queues events.
    struct Loopback {
        to_host_tx: Sender<Result<Frame, TransportError>>,
        to_host_rx: Receiver<Result<Frame, TransportError>>,
        silent: ModuleId,
    }

    impl Loopback {
        fn new(silent: ModuleId) -> Self {
            let (to_host_tx, to_host_rx) = crossbeam_channel::unbounded();
            Self { to_host_tx, to_host_rx, silent }
        }
    }

    impl Transport for Loopback {
        fn send(&self, frame: &Frame) -> Result<(), TransportError> {
            if frame.dest == self.silent {
                return Ok(());
            }
            if let Body::RegRead { reg } = frame.body {
                let _ = self.to_host_tx.send(Ok(Frame::to_host(frame.dest, Body::RegValue { reg, value: u64::from(reg) })));
            }
            Ok(())
        }

        fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
            match self.to_host_rx.recv_timeout(timeout) {
                Ok(r) => r.map(Some),
                Err(_) => Ok(None),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ModuleId, Body)>>,
        lost: AtomicBool,
    }

    impl EventHandler for Recorder {
        fn on_event(&self, src: ModuleId, body: Body) {
            lock(&self.events).push((src, body));
        }

        fn on_link_lost(&self, _error: &TransportError) {
            self.lost.store(true, Ordering::SeqCst);
        }
    }

    fn fast() -> LinkTiming {
        LinkTiming { response_timeout: Duration::from_millis(100), poll_interval: Duration::from_millis(5) }
    }

    #[test]
    fn test_register_read_round_trip() {
        let transport = Arc::new(Loopback::new(ModuleId(99)));
        let link = Link::open(transport, Arc::new(Recorder::default()), fast()).unwrap();
        assert_eq!(link.read_register(ModuleId(2), 0x0200).unwrap(), 0x0200);
    }

    #[test]
    fn test_silent_module_times_out() {
        let transport = Arc::new(Loopback::new(ModuleId(3)));
        let link = Link::open(transport, Arc::new(Recorder::default()), fast()).unwrap();
        assert_eq!(link.read_register(ModuleId(3), 0).unwrap_err(), TransportError::NoResponse(ModuleId(3)));
        // Other modules are unaffected.
        assert_eq!(link.read_register(ModuleId(4), 1).unwrap(), 1);
    }

    #[test]
    fn test_events_reach_handler_and_loss_is_sticky() {
        let transport = Arc::new(Loopback::new(ModuleId(99)));
        let recorder = Arc::new(Recorder::default());
        let link = Link::open(Arc::clone(&transport) as Arc<dyn Transport>, Arc::clone(&recorder) as Arc<dyn EventHandler>, fast()).unwrap();

        let event = Body::StmTrace { timestamp: 1, id: 2, value: 3 };
        transport.to_host_tx.send(Ok(Frame::to_host(ModuleId(5), event.clone()))).unwrap();
        transport.to_host_tx.send(Err(TransportError::LinkLost("cable".to_string()))).unwrap();

        for _ in 0..100 {
            if recorder.lost.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(recorder.lost.load(Ordering::SeqCst));
        assert_eq!(*lock(&recorder.events), vec![(ModuleId(5), event)]);
        assert!(matches!(link.read_register(ModuleId(2), 0), Err(TransportError::LinkLost(_))));
    }
}
