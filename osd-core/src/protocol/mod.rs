//! Debug protocol.
//!
//! Every debug module on the target is addressed by a [`ModuleId`]. The host
//! exchanges [`Frame`]s with modules: register accesses and memory bursts are
//! request/response pairs, trace records and stop notifications are
//! unsolicited events.

pub mod codec;
pub mod registers;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a debug module, unique and stable within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u16);

impl ModuleId {
    /// The debug host itself.
    pub const HOST: Self = Self(0);
    /// The system control module, always present.
    pub const SCM: Self = Self(1);

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x}", self.0)
    }
}

impl From<u16> for ModuleId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Why the target stopped executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Program exited with the given code.
    Exit(u32),
    /// Cores halted without exiting.
    Halt,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(code) => write!(f, "exited with code {code}"),
            Self::Halt => write!(f, "halted"),
        }
    }
}

/// Frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    RegRead { reg: u16 },
    RegWrite { reg: u16, value: u64 },
    RegValue { reg: u16, value: u64 },
    Ack,
    Nack { code: u16 },
    MemWrite { address: u64, data: Vec<u8> },
    MemRead { address: u64, len: u32 },
    MemData { address: u64, data: Vec<u8> },
    StmTrace { timestamp: u32, id: u16, value: u64 },
    CtmTrace { timestamp: u32, pc: u64 },
    Stopped { reason: StopReason },
}

impl Body {
    /// Responses complete a request issued by the host.
    pub const fn is_response(&self) -> bool {
        matches!(
            self,
            Self::RegValue { .. } | Self::Ack | Self::Nack { .. } | Self::MemData { .. }
        )
    }

    /// Short name for log output.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegRead { .. } => "reg-read",
            Self::RegWrite { .. } => "reg-write",
            Self::RegValue { .. } => "reg-value",
            Self::Ack => "ack",
            Self::Nack { .. } => "nack",
            Self::MemWrite { .. } => "mem-write",
            Self::MemRead { .. } => "mem-read",
            Self::MemData { .. } => "mem-data",
            Self::StmTrace { .. } => "stm-trace",
            Self::CtmTrace { .. } => "ctm-trace",
            Self::Stopped { .. } => "stopped",
        }
    }
}

/// An addressed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dest: ModuleId,
    pub src: ModuleId,
    pub body: Body,
}

impl Frame {
    /// A frame from the host to `dest`.
    pub const fn to_module(dest: ModuleId, body: Body) -> Self {
        Self { dest, src: ModuleId::HOST, body }
    }

    /// A frame from module `src` to the host.
    pub const fn to_host(src: ModuleId, body: Body) -> Self {
        Self { dest: ModuleId::HOST, src, body }
    }
}

/// Nack codes.
pub mod nack {
    /// Register does not exist on the module.
    pub const UNKNOWN_REGISTER: u16 = 0x0001;
    /// Address outside the module's memory regions.
    pub const ADDRESS_ERROR: u16 = 0x0002;
    /// Request not supported by the module type.
    pub const UNSUPPORTED: u16 = 0x0003;
    /// No module with the destination id.
    pub const NO_SUCH_MODULE: u16 = 0x0004;
}
