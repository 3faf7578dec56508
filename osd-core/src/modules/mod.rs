//! Typed module proxies.
//!
//! A proxy pairs a discovered [`Module`] with the session that owns it.
//! There is one proxy type per module kind; callers only see the operations
//! that kind supports.

mod memory;
mod trace;

pub use memory::MemoryModule;
pub use trace::{CoreTraceModule, TraceModule};

use crate::error::Result;
use crate::protocol::ModuleId;
use crate::registry::{Module, ModuleKind};
use crate::session::Session;

/// Common surface of all proxies.
pub trait ModuleProxy {
    fn module(&self) -> &Module;

    fn id(&self) -> ModuleId {
        self.module().id()
    }

    fn kind(&self) -> ModuleKind {
        self.module().kind()
    }
}

/// Proxies of modules that stream trace to a log.
pub trait TraceLog: ModuleProxy {
    /// Stop streaming and close the log.
    fn detach_log(&self) -> Result<()>;

    fn is_logging(&self) -> bool;
}

/// A proxy for any discovered module.
pub enum Proxy<'a> {
    Trace(TraceModule<'a>),
    CoreTrace(CoreTraceModule<'a>),
    Memory(MemoryModule<'a>),
    /// Modules this host has no operations for.
    Other(Module),
}

impl<'a> Proxy<'a> {
    pub(crate) fn new(session: &'a Session, module: Module) -> Self {
        match module.kind() {
            ModuleKind::Stm => Self::Trace(TraceModule::new(session, module)),
            ModuleKind::Ctm => Self::CoreTrace(CoreTraceModule::new(session, module)),
            ModuleKind::Mam => Self::Memory(MemoryModule::new(session, module)),
            _ => Self::Other(module),
        }
    }
}

impl ModuleProxy for Proxy<'_> {
    fn module(&self) -> &Module {
        match self {
            Self::Trace(p) => p.module(),
            Self::CoreTrace(p) => p.module(),
            Self::Memory(p) => p.module(),
            Self::Other(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::sim::{SimulatedSoc, SocLayout};

    #[test]
    fn test_proxy_kinds_follow_registry() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let session = Session::open(soc.connect(), SessionConfig::default()).unwrap();

        for module in session.modules() {
            let proxy = session.proxy(module.id()).unwrap();
            assert_eq!(proxy.id(), module.id());
            let matches = match (&proxy, module.kind()) {
                (Proxy::Trace(_), ModuleKind::Stm)
                | (Proxy::CoreTrace(_), ModuleKind::Ctm)
                | (Proxy::Memory(_), ModuleKind::Mam)
                | (Proxy::Other(_), ModuleKind::Scm) => true,
                _ => false,
            };
            assert!(matches, "wrong proxy for {module}");
        }
        assert!(session.proxy(ModuleId(0x200)).is_none());
    }
}
