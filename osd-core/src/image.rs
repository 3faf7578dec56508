//! Executable images.
//!
//! An image is an entry point plus loadable segments and, when available,
//! function symbols used to annotate core trace. ELF parsing is delegated to
//! the `object` crate.

use object::{Object, ObjectSegment, ObjectSymbol, SegmentFlags as ObjectSegmentFlags, SymbolKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

/// Errors while reading an image.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a loadable executable: {0}")]
    Parse(#[from] object::Error),

    #[error("segment at {0:#010x} is larger than its file contents allow")]
    BadSegment(u64),
}

/// Access flags of a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFlags {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl SegmentFlags {
    pub const CODE: Self = Self { read: true, write: false, execute: true };
    pub const DATA: Self = Self { read: true, write: true, execute: false };

    const fn from_elf(p_flags: u32) -> Self {
        Self {
            read: p_flags & PF_R != 0,
            write: p_flags & PF_W != 0,
            execute: p_flags & PF_X != 0,
        }
    }
}

/// A loadable segment. `data` covers the full in-memory size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub address: u64,
    pub data: Vec<u8>,
    pub flags: SegmentFlags,
}

impl Segment {
    pub const fn new(address: u64, data: Vec<u8>, flags: SegmentFlags) -> Self {
        Self { address, data, flags }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.len())
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }
}

/// A function symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// Executable image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    entry: u64,
    segments: Vec<Segment>,
    symbols: Vec<Symbol>,
}

impl Image {
    pub const fn new(entry: u64) -> Self {
        Self { entry, segments: Vec::new(), symbols: Vec::new() }
    }

    #[must_use]
    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, name: impl Into<String>, address: u64, size: u64) -> Self {
        self.symbols.push(Symbol { name: name.into(), address, size });
        self.symbols.sort_by_key(|s| s.address);
        self
    }

    /// Read and parse an ELF file.
    pub fn from_elf_file(path: &Path) -> Result<Self, ImageError> {
        let data = std::fs::read(path).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;
        let image = Self::from_elf(&data)?;
        log::info!(
            "Loaded image {} ({} segments, {} bytes, entry {:#010x})",
            path.display(),
            image.segments.len(),
            image.total_len(),
            image.entry
        );
        Ok(image)
    }

    /// Parse an ELF image from memory.
    pub fn from_elf(data: &[u8]) -> Result<Self, ImageError> {
        let obj = object::File::parse(data)?;

        let mut segments = Vec::new();
        for segment in obj.segments() {
            let mem_size = segment.size();
            let file_data = segment.data()?;
            if file_data.len() as u64 > mem_size {
                return Err(ImageError::BadSegment(segment.address()));
            }
            if mem_size == 0 {
                continue;
            }

            let mut bytes = file_data.to_vec();
            // Zero-fill the part that has no file contents.
            bytes.resize(usize::try_from(mem_size).map_err(|_| ImageError::BadSegment(segment.address()))?, 0);

            let flags = match segment.flags() {
                ObjectSegmentFlags::Elf { p_flags } => SegmentFlags::from_elf(p_flags),
                _ => SegmentFlags::DATA,
            };
            segments.push(Segment::new(segment.address(), bytes, flags));
        }

        let mut symbols: Vec<Symbol> = obj
            .symbols()
            .filter(|s| s.kind() == SymbolKind::Text && s.address() != 0)
            .filter_map(|s| {
                let name = s.name().ok()?;
                (!name.is_empty()).then(|| Symbol { name: name.to_string(), address: s.address(), size: s.size() })
            })
            .collect();
        symbols.sort_by_key(|s| s.address);

        Ok(Self { entry: obj.entry(), segments, symbols })
    }

    pub const fn entry(&self) -> u64 {
        self.entry
    }

    /// Loadable segments, in file order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Sum of all segment sizes.
    pub fn total_len(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Whether `address` falls inside an executable segment.
    pub fn is_executable(&self, address: u64) -> bool {
        self.segments.iter().any(|s| s.flags.execute && s.contains(address))
    }

    /// Function containing `address` and the offset into it.
    pub fn symbolize(&self, address: u64) -> Option<(&str, u64)> {
        let idx = self.symbols.partition_point(|s| s.address <= address);
        let symbol = self.symbols[..idx].last()?;
        let offset = address - symbol.address;
        // Zero-sized symbols only match exactly.
        if offset < symbol.size.max(1) {
            Some((symbol.name.as_str(), offset))
        } else {
            None
        }
    }
}
