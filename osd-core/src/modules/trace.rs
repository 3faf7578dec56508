use super::{ModuleProxy, TraceLog};
use crate::error::{Error, Result, StateError};
use crate::image::Image;
use crate::protocol::registers::{CS_TRACE_ENABLE, MOD_CS};
use crate::registry::Module;
use crate::session::{Session, SessionState};
use crate::trace::{file_sink, Decoder, LogAttachment, Sink};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Software trace module.
pub struct TraceModule<'a> {
    session: &'a Session,
    module: Module,
}

impl<'a> TraceModule<'a> {
    pub(crate) const fn new(session: &'a Session, module: Module) -> Self {
        Self { session, module }
    }

    /// Stream trace records into `path`, creating or truncating it.
    pub fn attach_log(&self, path: impl AsRef<Path>) -> Result<()> {
        attach(self.session, &self.module, Decoder::Software, Target::Path(path.as_ref()))
    }

    /// Stream into the file named by the session's log naming.
    pub fn attach_default_log(&self) -> Result<PathBuf> {
        let path = self.session.config().log_path(self.module.kind(), self.module.id());
        self.attach_log(&path)?;
        Ok(path)
    }

    /// Stream into an arbitrary sink, e.g. a [`SharedSink`](crate::trace::SharedSink).
    pub fn attach_sink(&self, sink: Sink) -> Result<()> {
        attach(self.session, &self.module, Decoder::Software, Target::Sink(sink))
    }
}

impl ModuleProxy for TraceModule<'_> {
    fn module(&self) -> &Module {
        &self.module
    }
}

impl TraceLog for TraceModule<'_> {
    fn detach_log(&self) -> Result<()> {
        detach(self.session, &self.module)
    }

    fn is_logging(&self) -> bool {
        self.session.is_attached(self.module.id())
    }
}

/// Core trace module.
pub struct CoreTraceModule<'a> {
    session: &'a Session,
    module: Module,
}

impl<'a> CoreTraceModule<'a> {
    pub(crate) const fn new(session: &'a Session, module: Module) -> Self {
        Self { session, module }
    }

    /// Stream core trace into `path`, annotated against `image`.
    ///
    /// With `verify`, every traced fetch outside the image's executable
    /// segments is a verification failure, handled per the session's
    /// [`VerificationPolicy`](crate::config::VerificationPolicy).
    pub fn attach_log(&self, path: impl AsRef<Path>, image: Arc<Image>, verify: bool) -> Result<()> {
        attach(self.session, &self.module, Decoder::Core { image, verify }, Target::Path(path.as_ref()))
    }

    pub fn attach_default_log(&self, image: Arc<Image>, verify: bool) -> Result<PathBuf> {
        let path = self.session.config().log_path(self.module.kind(), self.module.id());
        self.attach_log(&path, image, verify)?;
        Ok(path)
    }

    pub fn attach_sink(&self, sink: Sink, image: Arc<Image>, verify: bool) -> Result<()> {
        attach(self.session, &self.module, Decoder::Core { image, verify }, Target::Sink(sink))
    }

    /// Core index this module observes.
    pub const fn core(&self) -> Option<u16> {
        self.module.core()
    }
}

impl ModuleProxy for CoreTraceModule<'_> {
    fn module(&self) -> &Module {
        &self.module
    }
}

impl TraceLog for CoreTraceModule<'_> {
    fn detach_log(&self) -> Result<()> {
        detach(self.session, &self.module)
    }

    fn is_logging(&self) -> bool {
        self.session.is_attached(self.module.id())
    }
}

enum Target<'p> {
    Path(&'p Path),
    Sink(Sink),
}

fn attach(session: &Session, module: &Module, decoder: Decoder, target: Target<'_>) -> Result<()> {
    session.expect_configurable("attach_log")?;
    let id = module.id();
    // Checked before touching the file so an existing log is not truncated.
    if session.is_attached(id) {
        return Err(StateError::LogAlreadyAttached { module: id }.into());
    }

    let sink = match target {
        Target::Path(path) => {
            let sink = file_sink(path).map_err(|source| Error::LogSink { module: id, path: path.to_path_buf(), source })?;
            log::info!("Logging {} {id} to {}", module.kind(), path.display());
            sink
        }
        Target::Sink(sink) => sink,
    };

    session.insert_attachment(LogAttachment::new(id, decoder, sink))?;
    if let Err(e) = session.guard(session.link().write_register(id, MOD_CS, CS_TRACE_ENABLE)) {
        session.remove_attachment(id);
        return Err(e);
    }
    session.mark_configured();
    Ok(())
}

fn detach(session: &Session, module: &Module) -> Result<()> {
    let id = module.id();
    let Some(mut attachment) = session.remove_attachment(id) else {
        return Err(StateError::LogNotAttached { module: id }.into());
    };
    if let Err(e) = attachment.flush() {
        log::warn!("Failed to flush log of module {id}: {e}");
    }
    log::info!("Detached log of module {id} after {} records", attachment.records());

    // A dead link cannot be told to stop streaming.
    if session.state() != SessionState::Terminated {
        session.guard(session.link().write_register(id, MOD_CS, 0))?;
    }
    Ok(())
}
