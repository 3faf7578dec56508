use super::ModuleProxy;
use crate::error::{Error, LoadError, Result};
use crate::image::Image;
use crate::link::unexpected;
use crate::protocol::codec::MAX_MEM_PAYLOAD;
use crate::protocol::{nack, Body};
use crate::registry::Module;
use crate::session::Session;

/// Bytes exercised per region by [`MemoryModule::memory_test`].
const MEMORY_TEST_SPAN: u64 = 4096;

/// Memory access module.
pub struct MemoryModule<'a> {
    session: &'a Session,
    module: Module,
}

impl<'a> MemoryModule<'a> {
    pub(crate) const fn new(session: &'a Session, module: Module) -> Self {
        Self { session, module }
    }

    fn load_error(&self, source: LoadError) -> Error {
        Error::Load { module: self.module.id(), source }
    }

    fn burst(&self) -> usize {
        self.session.config().memory_burst.clamp(1, MAX_MEM_PAYLOAD)
    }

    fn check_range(&self, address: u64, len: u64) -> Result<()> {
        if self.module.addresses(address, len) {
            Ok(())
        } else {
            Err(self.load_error(LoadError::Unaddressable { address, len }))
        }
    }

    /// Write every loadable segment of `image`.
    ///
    /// All segments are checked against the module's regions before the
    /// first byte is written.
    pub fn load_image(&self, image: &Image) -> Result<()> {
        self.load(image, false)
    }

    /// Like [`load_image`](Self::load_image), then read every segment back.
    pub fn load_image_verified(&self, image: &Image) -> Result<()> {
        self.load(image, true)
    }

    fn load(&self, image: &Image, verify: bool) -> Result<()> {
        self.session.expect_configurable("load_image")?;
        for segment in image.segments() {
            self.check_range(segment.address, segment.len())?;
        }

        for segment in image.segments() {
            log::debug!("Loading {} bytes at {:#010x} via module {}", segment.len(), segment.address, self.module.id());
            self.write_bursts(segment.address, &segment.data)?;
        }

        if verify {
            for segment in image.segments() {
                let actual = self.read_bursts(segment.address, segment.len())?;
                if let Some((offset, (expected, found))) =
                    segment.data.iter().zip(&actual).enumerate().find(|(_, (e, a))| e != a)
                {
                    return Err(self.load_error(LoadError::VerifyMismatch {
                        address: segment.address + offset as u64,
                        expected: *expected,
                        actual: *found,
                    }));
                }
            }
        }

        log::info!(
            "Loaded {} bytes in {} segments via module {}{}",
            image.total_len(),
            image.segments().len(),
            self.module.id(),
            if verify { ", verified" } else { "" }
        );
        self.session.mark_configured();
        Ok(())
    }

    /// Write a block of memory.
    pub fn write(&self, address: u64, data: &[u8]) -> Result<()> {
        self.session.expect_configurable("write")?;
        self.check_range(address, data.len() as u64)?;
        self.write_bursts(address, data)?;
        self.session.mark_configured();
        Ok(())
    }

    /// Read a block of memory.
    pub fn read(&self, address: u64, len: u64) -> Result<Vec<u8>> {
        self.session.expect_configurable("read")?;
        self.check_range(address, len)?;
        self.read_bursts(address, len)
    }

    /// Pattern test over the start of every region. Destroys memory contents.
    pub fn memory_test(&self) -> Result<()> {
        self.session.expect_configurable("memory_test")?;
        for region in self.module.regions() {
            let span = region.size.min(MEMORY_TEST_SPAN);
            #[allow(clippy::cast_possible_truncation)]
            let pattern: Vec<u8> = (0..span).map(|i| (i as u8) ^ 0x5a ^ ((i >> 8) as u8)).collect();

            for fill in [pattern.clone(), vec![0x55; pattern.len()], vec![0xaa; pattern.len()]] {
                self.write_bursts(region.base, &fill)?;
                let back = self.read_bursts(region.base, span)?;
                if let Some(offset) = fill.iter().zip(&back).position(|(a, b)| a != b) {
                    return Err(self.load_error(LoadError::MemoryTest { address: region.base + offset as u64 }));
                }
            }
            log::info!("Memory test passed for {span} bytes at {:#010x} via module {}", region.base, self.module.id());
        }
        self.session.mark_configured();
        Ok(())
    }

    fn write_bursts(&self, address: u64, data: &[u8]) -> Result<()> {
        let burst = self.burst();
        let id = self.module.id();
        for (i, chunk) in data.chunks(burst).enumerate() {
            let chunk_address = address + (i * burst) as u64;
            let body = Body::MemWrite { address: chunk_address, data: chunk.to_vec() };
            match self.session.guard(self.session.link().transact(id, body))? {
                Body::Ack => {}
                Body::Nack { code: nack::ADDRESS_ERROR } => {
                    return Err(self.load_error(LoadError::Unaddressable {
                        address: chunk_address,
                        len: chunk.len() as u64,
                    }));
                }
                Body::Nack { code } => return Err(Error::Rejected { module: id, code }),
                other => return self.session.guard(Err(unexpected(id, &other, "ack"))),
            }
        }
        Ok(())
    }

    fn read_bursts(&self, address: u64, len: u64) -> Result<Vec<u8>> {
        let burst = u32::try_from(self.burst()).unwrap_or(u32::MAX);
        let id = self.module.id();
        let mut out = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        let mut offset = 0;
        while offset < len {
            let chunk_address = address + offset;
            let chunk_len = u64::from(burst).min(len - offset);
            let wire_len = u32::try_from(chunk_len).unwrap_or(burst);
            let body = Body::MemRead { address: chunk_address, len: wire_len };
            match self.session.guard(self.session.link().transact(id, body))? {
                Body::MemData { address: a, data } if a == chunk_address && data.len() as u64 == chunk_len => {
                    out.extend_from_slice(&data);
                }
                Body::Nack { code: nack::ADDRESS_ERROR } => {
                    return Err(self.load_error(LoadError::Unaddressable { address: chunk_address, len: chunk_len }));
                }
                Body::Nack { code } => return Err(Error::Rejected { module: id, code }),
                other => return self.session.guard(Err(unexpected(id, &other, "mem-data"))),
            }
            offset += chunk_len;
        }
        Ok(out)
    }
}

impl ModuleProxy for MemoryModule<'_> {
    fn module(&self) -> &Module {
        &self.module
    }
}
