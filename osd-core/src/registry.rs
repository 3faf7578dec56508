//! Module discovery.
//!
//! The system control module reports how many modules sit on the debug
//! interconnect; each one is then asked for its type, version and
//! type-specific parameters. Discovery order is the order the hardware
//! reports, and every later listing preserves it.

use crate::error::TransportError;
use crate::link::Link;
use crate::protocol::registers::{self, types};
use crate::protocol::ModuleId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of a debug module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    /// System control module.
    Scm,
    /// UART device emulation module.
    DemUart,
    /// Memory access module.
    Mam,
    /// Software trace module.
    Stm,
    /// Core trace module.
    Ctm,
    /// A module type this host does not know.
    Unknown(u16),
}

impl ModuleKind {
    pub const fn from_type_code(code: u64) -> Self {
        match code {
            types::SCM => Self::Scm,
            types::DEM_UART => Self::DemUart,
            types::MAM => Self::Mam,
            types::STM => Self::Stm,
            types::CTM => Self::Ctm,
            #[allow(clippy::cast_possible_truncation)]
            other => Self::Unknown(other as u16),
        }
    }

    pub const fn type_code(self) -> u64 {
        match self {
            Self::Scm => types::SCM,
            Self::DemUart => types::DEM_UART,
            Self::Mam => types::MAM,
            Self::Stm => types::STM,
            Self::Ctm => types::CTM,
            Self::Unknown(code) => code as u64,
        }
    }

    /// Capabilities every module of this kind offers.
    pub fn capabilities(self) -> Vec<Capability> {
        match self {
            Self::Scm => vec![Capability::SystemControl],
            Self::Stm => vec![Capability::TraceLog],
            Self::Ctm => vec![Capability::TraceLog, Capability::ImageCorrelation],
            Self::Mam => vec![Capability::MemoryAccess],
            Self::DemUart | Self::Unknown(_) => Vec::new(),
        }
    }

    /// Lower-case short name, used in log file names.
    pub fn short_name(self) -> String {
        match self {
            Self::Scm => "scm".to_string(),
            Self::DemUart => "dem_uart".to_string(),
            Self::Mam => "mam".to_string(),
            Self::Stm => "stm".to_string(),
            Self::Ctm => "ctm".to_string(),
            Self::Unknown(code) => format!("mod{code:02x}"),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name().to_uppercase())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scm" => Ok(Self::Scm),
            "dem_uart" | "uart" => Ok(Self::DemUart),
            "mam" => Ok(Self::Mam),
            "stm" => Ok(Self::Stm),
            "ctm" => Ok(Self::Ctm),
            other => Err(format!("unknown module type '{other}'")),
        }
    }
}

/// An operation family a module supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    SystemControl,
    TraceLog,
    ImageCorrelation,
    MemoryAccess,
}

/// A contiguous range of target memory reachable through a memory module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
}

impl MemoryRegion {
    /// One past the last address.
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Whether `[address, address + len)` lies entirely inside the region.
    pub const fn contains_range(&self, address: u64, len: u64) -> bool {
        match address.checked_add(len) {
            Some(end) => address >= self.base && end <= self.end(),
            None => false,
        }
    }
}

/// A discovered debug module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    id: ModuleId,
    kind: ModuleKind,
    version: u16,
    capabilities: Vec<Capability>,
    regions: Vec<MemoryRegion>,
    core: Option<u16>,
}

impl Module {
    pub fn new(id: ModuleId, kind: ModuleKind, version: u16) -> Self {
        Self { id, kind, version, capabilities: kind.capabilities(), regions: Vec::new(), core: None }
    }

    #[must_use]
    pub fn with_regions(mut self, regions: Vec<MemoryRegion>) -> Self {
        self.regions = regions;
        self
    }

    #[must_use]
    pub const fn with_core(mut self, core: u16) -> Self {
        self.core = Some(core);
        self
    }

    pub const fn id(&self) -> ModuleId {
        self.id
    }

    pub const fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub const fn version(&self) -> u16 {
        self.version
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Memory regions, only populated for memory modules.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Core index a core trace module observes.
    pub const fn core(&self) -> Option<u16> {
        self.core
    }

    /// Whether the whole range is reachable through one of the regions.
    pub fn addresses(&self, address: u64, len: u64) -> bool {
        self.regions.iter().any(|r| r.contains_range(address, len))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} v{}", self.id, self.kind, self.version)?;
        for region in &self.regions {
            write!(f, " [{:#010x}..{:#010x})", region.base, region.end())?;
        }
        if let Some(core) = self.core {
            write!(f, " core {core}")?;
        }
        Ok(())
    }
}

/// Ordered set of discovered modules.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: Vec<Module>,
}

impl Registry {
    /// Build a registry from modules already in discovery order.
    pub const fn from_modules(modules: Vec<Module>) -> Self {
        Self { modules }
    }

    /// Scan the debug interconnect.
    pub fn discover(link: &Link) -> Result<Self, TransportError> {
        let count = link.read_register(ModuleId::SCM, registers::SCM_NUM_MOD)?;
        log::debug!("System control module reports {count} modules");

        let mut modules = Vec::new();
        // Module ids are dense, starting at the system control module.
        for raw in 1..=count {
            let id = ModuleId(u16::try_from(raw).map_err(|_| TransportError::Protocol {
                module: ModuleId::SCM,
                detail: format!("module count {count} out of range"),
            })?);
            let module = Self::probe_module(link, id)?;
            log::info!("Discovered {module}");
            modules.push(module);
        }

        Ok(Self { modules })
    }

    fn probe_module(link: &Link, id: ModuleId) -> Result<Module, TransportError> {
        let kind = ModuleKind::from_type_code(link.read_register(id, registers::MOD_TYPE)?);
        let version = link.read_register(id, registers::MOD_VERSION)?;
        let version = u16::try_from(version).unwrap_or(u16::MAX);
        let module = Module::new(id, kind, version);

        match kind {
            ModuleKind::Mam => {
                let count = link.read_register(id, registers::MAM_REGION_COUNT)?;
                let out_of_range =
                    || TransportError::Protocol { module: id, detail: format!("region count {count} out of range") };
                let count = u16::try_from(count)
                    .ok()
                    .filter(|c| *c <= registers::MAM_MAX_REGIONS)
                    .ok_or_else(out_of_range)?;
                let mut regions = Vec::with_capacity(usize::from(count));
                for n in 0..count {
                    let base_reg = registers::mam_region_base(n);
                    let size_reg = registers::mam_region_size(n);
                    let (Some(base_reg), Some(size_reg)) = (base_reg, size_reg) else {
                        return Err(out_of_range());
                    };
                    let base = link.read_register(id, base_reg)?;
                    let size = link.read_register(id, size_reg)?;
                    regions.push(MemoryRegion { base, size });
                }
                Ok(module.with_regions(regions))
            }
            ModuleKind::Ctm => {
                let core = link.read_register(id, registers::CTM_CORE)?;
                Ok(module.with_core(u16::try_from(core).unwrap_or(u16::MAX)))
            }
            _ => Ok(module),
        }
    }

    /// All modules in discovery order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Modules of one kind, in discovery order.
    pub fn filter(&self, kind: ModuleKind) -> impl Iterator<Item = &Module> + '_ {
        self.modules.iter().filter(move |m| m.kind == kind)
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
