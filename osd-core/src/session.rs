//! Session management module.
//!
//! A [`Session`] owns the link to the debug system, the modules discovered
//! on it and the lifecycle state machine:
//!
//! ```text
//! Created -> Reset -> Configuring -> Running -> Terminated | TimedOut
//! ```
//!
//! Per-module configuration (log attachment, image loading) happens through
//! proxies borrowed from the session while it is in `Reset`/`Configuring`.

use crate::config::{SessionConfig, VerificationPolicy};
use crate::error::{Error, Result, StateError, TransportError, VerificationError};
use crate::image::Image;
use crate::link::{lock, EventHandler, Link};
use crate::modules::{CoreTraceModule, MemoryModule, Proxy, TraceModule};
use crate::protocol::registers::{SCM_SYSRST, SYSRST_HALT, SYSRST_SYSTEM};
use crate::protocol::{Body, ModuleId, StopReason};
use crate::registry::{Module, ModuleKind, Registry};
use crate::trace::LogAttachment;
use crate::transport::Transport;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Modules discovered, system not reset yet.
    Created,
    /// System reset; modules accept configuration.
    Reset,
    /// At least one module has been configured since the reset.
    Configuring,
    /// Cores released; waiting for the target to stop.
    Running,
    /// The target stopped or the link failed. Final.
    Terminated,
    /// A wait ran out while the target kept running. Final.
    TimedOut,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Reset => write!(f, "reset"),
            Self::Configuring => write!(f, "configuring"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Notifications broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session entered a new state.
    StateChanged(SessionState),
    /// A core trace module saw an unexpected instruction fetch.
    Verification { module: ModuleId, error: VerificationError },
    /// The target stopped on its own.
    Stopped(StopReason),
    /// The transport failed; the text describes why.
    LinkLost(String),
}

/// A request to place an image into the memory behind one module.
#[derive(Debug, Clone, Copy)]
pub struct ImageLoadRequest<'a> {
    /// Memory module to load through.
    pub module: ModuleId,
    /// Image to place.
    pub image: &'a Image,
    /// Read every segment back after writing it.
    pub verify: bool,
}

enum Completion {
    Stopped(StopReason),
    LinkLost(TransportError),
    Verification { module: ModuleId, error: VerificationError },
}

/// State shared with the dispatcher thread.
struct Shared {
    attachments: Mutex<HashMap<ModuleId, LogAttachment>>,
    failures: Mutex<Vec<(ModuleId, VerificationError)>>,
    policy: VerificationPolicy,
    completion: Sender<Completion>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn report_violation(&self, module: ModuleId, error: VerificationError) {
        log::warn!("Module {module}: {error}");
        lock(&self.failures).push((module, error.clone()));
        let _ = self.events.send(SessionEvent::Verification { module, error: error.clone() });
        if self.policy == VerificationPolicy::Abort {
            let _ = self.completion.send(Completion::Verification { module, error });
        }
    }

    fn flush_logs(&self) {
        for (module, log) in lock(&self.attachments).iter_mut() {
            if let Err(e) = log.flush() {
                log::warn!("Failed to flush log of module {module}: {e}");
            }
        }
    }
}

impl EventHandler for Shared {
    fn on_event(&self, src: ModuleId, body: Body) {
        match body {
            Body::Stopped { reason } => {
                log::info!("Target {reason}");
                let _ = self.events.send(SessionEvent::Stopped(reason));
                let _ = self.completion.send(Completion::Stopped(reason));
            }
            Body::StmTrace { .. } | Body::CtmTrace { .. } => {
                let result = match lock(&self.attachments).get_mut(&src) {
                    Some(log) => log.record(&body),
                    None => {
                        log::trace!("Discarding {} from module {src} without a log", body.name());
                        return;
                    }
                };
                match result {
                    Ok(None) => {}
                    Ok(Some(error)) => self.report_violation(src, error),
                    Err(e) => log::warn!("Failed to write trace of module {src}: {e}"),
                }
            }
            other => log::debug!("Ignoring {} from module {src}", other.name()),
        }
    }

    fn on_link_lost(&self, error: &TransportError) {
        let _ = self.events.send(SessionEvent::LinkLost(error.to_string()));
        let _ = self.completion.send(Completion::LinkLost(error.clone()));
    }
}

/// A debug session against one target.
pub struct Session {
    link: Link,
    registry: RwLock<Registry>,
    state: Mutex<SessionState>,
    shared: Arc<Shared>,
    completion: Receiver<Completion>,
    config: SessionConfig,
}

impl Session {
    /// Take ownership of `transport`, start dispatching and discover modules.
    pub fn open(transport: impl Transport + 'static, config: SessionConfig) -> Result<Self> {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        // create a broadcast channel with capacity 100
        let (events, _) = broadcast::channel(100);

        let shared = Arc::new(Shared {
            attachments: Mutex::default(),
            failures: Mutex::default(),
            policy: config.verification_policy,
            completion: completion_tx,
            events,
        });

        let link = Link::open(Arc::new(transport), Arc::clone(&shared) as Arc<dyn EventHandler>, config.timing())?;
        let registry = Registry::discover(&link)?;
        log::info!("Session opened with {} modules", registry.len());

        Ok(Self {
            link,
            registry: RwLock::new(registry),
            state: Mutex::new(SessionState::Created),
            shared,
            completion: completion_rx,
            config,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Settings the session was opened with.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Verification failures recorded so far.
    pub fn verification_failures(&self) -> Vec<(ModuleId, VerificationError)> {
        lock(&self.shared.failures).clone()
    }

    /// Scan for modules again. Only valid before the first reset.
    pub fn discover(&self) -> Result<()> {
        self.expect_state("discover", &[SessionState::Created])?;
        let registry = self.guard(Registry::discover(&self.link))?;
        *self.registry.write().unwrap_or_else(std::sync::PoisonError::into_inner) = registry;
        Ok(())
    }

    /// All discovered modules in discovery order.
    pub fn modules(&self) -> Vec<Module> {
        self.registry.read().unwrap_or_else(std::sync::PoisonError::into_inner).modules().to_vec()
    }

    /// Discovered modules of one kind, in discovery order.
    pub fn modules_of(&self, kind: ModuleKind) -> Vec<Module> {
        self.registry
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .filter(kind)
            .cloned()
            .collect()
    }

    /// The module with id `id`, if one was discovered.
    pub fn module(&self, id: ModuleId) -> Option<Module> {
        self.registry.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(id).cloned()
    }

    /// Proxies for every module of `kind`.
    pub fn get_modules(&self, kind: ModuleKind) -> Vec<Proxy<'_>> {
        self.modules_of(kind).into_iter().map(|m| Proxy::new(self, m)).collect()
    }

    /// Proxy for the module with id `id`.
    pub fn proxy(&self, id: ModuleId) -> Option<Proxy<'_>> {
        self.module(id).map(|m| Proxy::new(self, m))
    }

    /// Software trace modules.
    pub fn trace_modules(&self) -> Vec<TraceModule<'_>> {
        self.modules_of(ModuleKind::Stm).into_iter().map(|m| TraceModule::new(self, m)).collect()
    }

    /// Core trace modules.
    pub fn core_trace_modules(&self) -> Vec<CoreTraceModule<'_>> {
        self.modules_of(ModuleKind::Ctm).into_iter().map(|m| CoreTraceModule::new(self, m)).collect()
    }

    /// Memory access modules.
    pub fn memory_modules(&self) -> Vec<MemoryModule<'_>> {
        self.modules_of(ModuleKind::Mam).into_iter().map(|m| MemoryModule::new(self, m)).collect()
    }

    /// Carry out an image load request against the module it names.
    pub fn load(&self, request: &ImageLoadRequest<'_>) -> Result<()> {
        let module = self
            .module(request.module)
            .ok_or(StateError::UnknownModule { module: request.module })?;
        if module.kind() != ModuleKind::Mam {
            return Err(StateError::Unsupported { module: request.module, operation: "load_image" }.into());
        }
        let mam = MemoryModule::new(self, module);
        if request.verify {
            mam.load_image_verified(request.image)
        } else {
            mam.load_image(request.image)
        }
    }

    /// Reset the system. With `halt`, cores stay stopped until [`start`](Self::start).
    pub fn reset(&self, halt: bool) -> Result<()> {
        self.expect_state("reset", &[SessionState::Created])?;
        let hold = if halt { SYSRST_HALT } else { 0 };
        self.guard(self.link.write_register(ModuleId::SCM, SCM_SYSRST, SYSRST_SYSTEM | hold))?;
        self.guard(self.link.write_register(ModuleId::SCM, SCM_SYSRST, hold))?;
        log::info!("System reset{}", if halt { ", cores halted" } else { "" });
        self.set_state(SessionState::Reset);
        Ok(())
    }

    /// Release the cores.
    pub fn start(&self) -> Result<()> {
        self.expect_state("start", &[SessionState::Reset, SessionState::Configuring])?;
        self.guard(self.link.write_register(ModuleId::SCM, SCM_SYSRST, 0))?;
        log::info!("Cores started");
        self.set_state(SessionState::Running);
        Ok(())
    }

    /// Block until the target stops or `timeout` elapses.
    ///
    /// A timeout leaves the target running; stopping it is up to the caller.
    pub fn wait(&self, timeout: Duration) -> Result<StopReason> {
        self.expect_state("wait", &[SessionState::Running])?;

        let outcome = self.completion.recv_timeout(timeout);
        self.shared.flush_logs();
        match outcome {
            Ok(Completion::Stopped(reason)) => {
                self.set_state(SessionState::Terminated);
                Ok(reason)
            }
            Ok(Completion::LinkLost(e)) => {
                self.set_state(SessionState::Terminated);
                Err(Error::Transport(e))
            }
            Ok(Completion::Verification { module, error }) => {
                self.set_state(SessionState::Terminated);
                Err(Error::Verification { module, source: error })
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Target still running after {timeout:?}");
                self.set_state(SessionState::TimedOut);
                Err(Error::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.set_state(SessionState::Terminated);
                Err(Error::Transport(TransportError::LinkLost("dispatcher stopped".to_string())))
            }
        }
    }

    pub(crate) const fn link(&self) -> &Link {
        &self.link
    }

    /// Turn a transport failure into a terminated session.
    pub(crate) fn guard<T>(&self, result: std::result::Result<T, TransportError>) -> Result<T> {
        result.map_err(|e| {
            log::error!("Transport failure, terminating session: {e}");
            self.shared.flush_logs();
            self.set_state(SessionState::Terminated);
            Error::Transport(e)
        })
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        let state = *lock(&self.state);
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(StateError::InvalidState { operation, state }.into())
        }
    }

    /// Per-module configuration is only valid between reset and start.
    pub(crate) fn expect_configurable(&self, operation: &'static str) -> Result<()> {
        self.expect_state(operation, &[SessionState::Reset, SessionState::Configuring])
    }

    /// Record that a configuration command went through.
    pub(crate) fn mark_configured(&self) {
        let mut state = lock(&self.state);
        if *state == SessionState::Reset {
            *state = SessionState::Configuring;
            drop(state);
            log::debug!("Session is configuring");
            let _ = self.shared.events.send(SessionEvent::StateChanged(SessionState::Configuring));
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state == next {
            return;
        }
        log::debug!("Session {} -> {next}", *state);
        *state = next;
        drop(state);
        let _ = self.shared.events.send(SessionEvent::StateChanged(next));
    }

    pub(crate) fn is_attached(&self, module: ModuleId) -> bool {
        lock(&self.shared.attachments).contains_key(&module)
    }

    pub(crate) fn insert_attachment(&self, attachment: LogAttachment) -> Result<()> {
        use std::collections::hash_map::Entry;

        let module = attachment.module();
        match lock(&self.shared.attachments).entry(module) {
            Entry::Occupied(_) => Err(StateError::LogAlreadyAttached { module }.into()),
            Entry::Vacant(slot) => {
                slot.insert(attachment);
                Ok(())
            }
        }
    }

    pub(crate) fn remove_attachment(&self, module: ModuleId) -> Option<LogAttachment> {
        lock(&self.shared.attachments).remove(&module)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.flush_logs();
        log::debug!("Session closed in state {}", self.state());
    }
}
