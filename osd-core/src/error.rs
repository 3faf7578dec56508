//! Error types for debug sessions.
//!
//! Transport failures are fatal for a session and are surfaced without
//! decoration. Module-level failures carry the identifier of the module
//! that failed so callers can report exactly which hardware unit broke.

use crate::protocol::ModuleId;
use crate::session::SessionState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error returned by session operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("module {module}: {source}")]
    Load {
        module: ModuleId,
        #[source]
        source: LoadError,
    },

    #[error("module {module}: {source}")]
    Verification {
        module: ModuleId,
        #[source]
        source: VerificationError,
    },

    #[error("module {module}: cannot open log sink {}: {source}", path.display())]
    LogSink {
        module: ModuleId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module {module}: request rejected with code {code:#06x}")]
    Rejected { module: ModuleId, code: u16 },

    #[error("target did not stop within {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// The module the error is attributed to, if any.
    pub const fn module(&self) -> Option<ModuleId> {
        match self {
            Self::Load { module, .. }
            | Self::Verification { module, .. }
            | Self::LogSink { module, .. }
            | Self::Rejected { module, .. } => Some(*module),
            Self::State(
                StateError::LogAlreadyAttached { module }
                | StateError::LogNotAttached { module }
                | StateError::UnknownModule { module }
                | StateError::Unsupported { module, .. },
            ) => Some(*module),
            _ => None,
        }
    }

    /// Whether the error ended the session.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Link or hardware communication failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("link to the debug system lost: {0}")]
    LinkLost(String),

    #[error("module {0} did not respond")]
    NoResponse(ModuleId),

    #[error("unexpected response from module {module}: {detail}")]
    Protocol { module: ModuleId, detail: String },

    #[error("malformed frame: {0}")]
    Codec(#[from] CodecError),
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::LinkLost(error.to_string())
    }
}

/// Operation is not valid in the current session state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("{operation} is not valid while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("module {module} already has a log attached")]
    LogAlreadyAttached { module: ModuleId },

    #[error("module {module} has no log attached")]
    LogNotAttached { module: ModuleId },

    #[error("no module {module} was discovered")]
    UnknownModule { module: ModuleId },

    #[error("module {module} does not support {operation}")]
    Unsupported { module: ModuleId, operation: &'static str },
}

/// Image cannot be placed into target memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("segment at {address:#010x} ({len} bytes) is not addressable by this module")]
    Unaddressable { address: u64, len: u64 },

    #[error("read-back mismatch at {address:#010x}: expected {expected:#04x}, found {actual:#04x}")]
    VerifyMismatch { address: u64, expected: u8, actual: u8 },

    #[error("memory test failed at {address:#010x}")]
    MemoryTest { address: u64 },
}

/// Observed execution deviates from the expected image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("traced fetch at {pc:#010x} (timestamp {timestamp}) is outside the image's executable segments")]
    UnexpectedFetch { pc: u64, timestamp: u32 },
}

/// Frame encoding or decoding failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),

    #[error("frame length {0} exceeds the maximum")]
    Oversize(usize),

    #[error("{0} trailing bytes after frame body")]
    TrailingBytes(usize),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
