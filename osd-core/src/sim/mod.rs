//! Simulated debug system.
//!
//! [`SimulatedSoc`] answers the debug protocol the way hardware would: a
//! system control module, trace modules that stream records once enabled,
//! and memory modules backed by sparse byte storage. Releasing the cores
//! runs a scripted [`SimProgram`] which emits trace and finally a stop
//! notification.

pub mod server;

use crate::error::TransportError;
use crate::image::Image;
use crate::link::lock;
use crate::protocol::registers::{self, types};
use crate::protocol::{nack, Body, Frame, ModuleId, StopReason};
use crate::registry::MemoryRegion;
use crate::transport::Transport;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const PAGE_BYTES: usize = 4096;
const PAGE_SIZE: u64 = PAGE_BYTES as u64;
const MODULE_VERSION: u64 = 1;

/// One module of a simulated system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleSpec {
    Stm,
    Ctm { core: u16 },
    Mam { regions: Vec<MemoryRegion> },
    DemUart,
}

/// A software trace event the program emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StmEvent {
    pub id: u16,
    pub value: u64,
}

/// What the target does once its cores are released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimProgram {
    /// Emitted by every enabled software trace module.
    pub stm_events: Vec<StmEvent>,
    /// Fetch addresses emitted by every enabled core trace module.
    pub ctm_trace: Vec<u64>,
    /// Time from release to exit. `None` runs forever.
    pub run_time_ms: Option<u64>,
    pub exit_code: u32,
}

impl Default for SimProgram {
    fn default() -> Self {
        Self {
            stm_events: b"hello\n".iter().map(|c| StmEvent { id: 4, value: u64::from(*c) }).collect(),
            ctm_trace: Vec::new(),
            run_time_ms: Some(20),
            exit_code: 0,
        }
    }
}

impl SimProgram {
    /// A program that walks the first `steps` instructions of `image`'s
    /// executable segments, four bytes apart.
    pub fn executing(image: &Image, steps: usize) -> Self {
        let ctm_trace = image
            .segments()
            .iter()
            .filter(|s| s.flags.execute)
            .flat_map(|s| (s.address..s.end()).step_by(4))
            .take(steps)
            .collect();
        Self { ctm_trace, ..Self::default() }
    }
}

/// Module layout and behaviour of a simulated system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocLayout {
    pub modules: Vec<ModuleSpec>,
    pub program: SimProgram,
}

impl Default for SocLayout {
    fn default() -> Self {
        Self {
            modules: vec![
                ModuleSpec::Stm,
                ModuleSpec::Ctm { core: 0 },
                ModuleSpec::Mam { regions: vec![MemoryRegion { base: 0, size: 0x1000_0000 }] },
            ],
            program: SimProgram::default(),
        }
    }
}

impl SocLayout {
    /// One trace module, one core trace module and a memory module whose
    /// region covers every segment of `image`; the program walks the image.
    pub fn for_image(image: &Image) -> Self {
        let base = image.segments().iter().map(|s| s.address).min().unwrap_or(0) & !(PAGE_SIZE - 1);
        let end = image.segments().iter().map(crate::image::Segment::end).max().unwrap_or(PAGE_SIZE);
        let size = (end - base).div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE;
        Self {
            modules: vec![
                ModuleSpec::Stm,
                ModuleSpec::Ctm { core: 0 },
                ModuleSpec::Mam { regions: vec![MemoryRegion { base, size }] },
            ],
            program: SimProgram::executing(image, 64),
        }
    }

    /// Parse a layout; missing fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Default)]
struct SparseMemory {
    pages: HashMap<u64, Vec<u8>>,
}

impl SparseMemory {
    fn write(&mut self, address: u64, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let a = address + i as u64;
            let page = self.pages.entry(a / PAGE_SIZE).or_insert_with(|| vec![0; PAGE_BYTES]);
            #[allow(clippy::cast_possible_truncation)]
            let offset = (a % PAGE_SIZE) as usize;
            page[offset] = *byte;
        }
    }

    fn read(&self, address: u64, len: u64) -> Vec<u8> {
        (address..address + len)
            .map(|a| {
                #[allow(clippy::cast_possible_truncation)]
                let offset = (a % PAGE_SIZE) as usize;
                self.pages.get(&(a / PAGE_SIZE)).map_or(0, |p| p[offset])
            })
            .collect()
    }
}

struct SimModule {
    spec: ModuleSpec,
    cs: u64,
    memory: SparseMemory,
}

impl SimModule {
    fn regions(&self) -> &[MemoryRegion] {
        match &self.spec {
            ModuleSpec::Mam { regions } => regions,
            _ => &[],
        }
    }

    fn addresses(&self, address: u64, len: u64) -> bool {
        self.regions().iter().any(|r| r.contains_range(address, len))
    }

    const fn type_code(&self) -> u64 {
        match self.spec {
            ModuleSpec::Stm => types::STM,
            ModuleSpec::Ctm { .. } => types::CTM,
            ModuleSpec::Mam { .. } => types::MAM,
            ModuleSpec::DemUart => types::DEM_UART,
        }
    }
}

struct Soc {
    modules: Vec<SimModule>,
    program: SimProgram,
    sysrst: u64,
    reset_seen: bool,
    running: bool,
    finished: bool,
    generation: u64,
    timestamp: u32,
}

impl Soc {
    const fn first_id() -> u16 {
        ModuleId::SCM.0 + 1
    }

    fn module_mut(&mut self, id: ModuleId) -> Option<&mut SimModule> {
        let index = id.0.checked_sub(Self::first_id())?;
        self.modules.get_mut(usize::from(index))
    }

    fn next_timestamp(&mut self) -> u32 {
        self.timestamp = self.timestamp.wrapping_add(1);
        self.timestamp
    }

    fn module_count(&self) -> u64 {
        self.modules.len() as u64 + 1
    }

    /// Handle a host request. Returns the response and whether the cores
    /// were just released.
    fn handle(&mut self, dest: ModuleId, body: Body) -> (Option<Body>, bool) {
        if dest == ModuleId::SCM {
            return self.handle_scm(body);
        }

        let Some(module) = self.module_mut(dest) else {
            return (Some(Body::Nack { code: nack::NO_SUCH_MODULE }), false);
        };

        let response = match body {
            Body::RegRead { reg } => Some(read_module_register(module, reg)),
            Body::RegWrite { reg: registers::MOD_CS, value } => {
                module.cs = value;
                Some(Body::Ack)
            }
            Body::RegWrite { .. } => Some(Body::Nack { code: nack::UNKNOWN_REGISTER }),
            Body::MemWrite { address, data } => Some(if !matches!(module.spec, ModuleSpec::Mam { .. }) {
                Body::Nack { code: nack::UNSUPPORTED }
            } else if module.addresses(address, data.len() as u64) {
                module.memory.write(address, &data);
                Body::Ack
            } else {
                Body::Nack { code: nack::ADDRESS_ERROR }
            }),
            Body::MemRead { address, len } => Some(if !matches!(module.spec, ModuleSpec::Mam { .. }) {
                Body::Nack { code: nack::UNSUPPORTED }
            } else if module.addresses(address, u64::from(len)) {
                Body::MemData { address, data: module.memory.read(address, u64::from(len)) }
            } else {
                Body::Nack { code: nack::ADDRESS_ERROR }
            }),
            _ => None,
        };
        (response, false)
    }

    fn handle_scm(&mut self, body: Body) -> (Option<Body>, bool) {
        match body {
            Body::RegRead { reg } => {
                let value = match reg {
                    registers::MOD_TYPE => Some(types::SCM),
                    registers::MOD_VERSION => Some(MODULE_VERSION),
                    registers::SCM_NUM_MOD => Some(self.module_count()),
                    registers::SCM_SYSRST => Some(self.sysrst),
                    _ => None,
                };
                let response = value.map_or(Body::Nack { code: nack::UNKNOWN_REGISTER }, |value| Body::RegValue { reg, value });
                (Some(response), false)
            }
            Body::RegWrite { reg: registers::SCM_SYSRST, value } => {
                self.sysrst = value;
                if value & registers::SYSRST_SYSTEM != 0 {
                    // Reset aborts whatever was running.
                    self.generation += 1;
                    self.reset_seen = true;
                    self.running = false;
                    self.finished = false;
                }
                let release = self.reset_seen
                    && value & (registers::SYSRST_SYSTEM | registers::SYSRST_HALT) == 0
                    && !self.running
                    && !self.finished;
                if release {
                    self.running = true;
                }
                (Some(Body::Ack), release)
            }
            Body::RegWrite { .. } => (Some(Body::Nack { code: nack::UNKNOWN_REGISTER }), false),
            Body::MemWrite { .. } | Body::MemRead { .. } => (Some(Body::Nack { code: nack::UNSUPPORTED }), false),
            _ => (None, false),
        }
    }
}

fn read_module_register(module: &SimModule, reg: u16) -> Body {
    let value = match (reg, &module.spec) {
        (registers::MOD_TYPE, _) => Some(module.type_code()),
        (registers::MOD_VERSION, _) => Some(MODULE_VERSION),
        (registers::MOD_CS, _) => Some(module.cs),
        (registers::MAM_REGION_COUNT, ModuleSpec::Mam { regions }) => Some(regions.len() as u64),
        (registers::MAM_DATA_WIDTH, ModuleSpec::Mam { .. }) => Some(32),
        (registers::CTM_CORE, ModuleSpec::Ctm { core }) => Some(u64::from(*core)),
        (reg, ModuleSpec::Mam { regions }) if reg >= registers::MAM_REGION_BASE => {
            let offset = reg - registers::MAM_REGION_BASE;
            let region = regions.get(usize::from(offset / 2));
            if offset % 2 == 0 {
                region.map(|r| r.base)
            } else {
                region.map(|r| r.size)
            }
        }
        _ => None,
    };
    value.map_or(Body::Nack { code: nack::UNKNOWN_REGISTER }, |value| Body::RegValue { reg, value })
}

/// Handle to a simulated debug system. Clones share the same system.
#[derive(Clone)]
pub struct SimulatedSoc {
    soc: Arc<Mutex<Soc>>,
    to_host_tx: Sender<Frame>,
    to_host_rx: Receiver<Frame>,
    connected: Arc<AtomicBool>,
}

impl SimulatedSoc {
    /// A system in power-on state, cores not yet released.
    pub fn new(layout: SocLayout) -> Self {
        let modules = layout
            .modules
            .into_iter()
            .map(|spec| SimModule { spec, cs: 0, memory: SparseMemory::default() })
            .collect();
        let (to_host_tx, to_host_rx) = crossbeam_channel::unbounded();
        Self {
            soc: Arc::new(Mutex::new(Soc {
                modules,
                program: layout.program,
                sysrst: 0,
                reset_seen: false,
                running: false,
                finished: false,
                generation: 0,
                timestamp: 0,
            })),
            to_host_tx,
            to_host_rx,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A transport endpoint talking to this system.
    pub fn connect(&self) -> SimTransport {
        SimTransport { soc: self.clone() }
    }

    /// Cut the link; every later send or receive fails.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Inspect memory behind the memory module `id`.
    pub fn memory(&self, id: ModuleId, address: u64, len: u64) -> Option<Vec<u8>> {
        let mut soc = lock(&self.soc);
        let module = soc.module_mut(id)?;
        module.addresses(address, len).then(|| module.memory.read(address, len))
    }

    /// Whether the cores are executing the program.
    pub fn is_running(&self) -> bool {
        lock(&self.soc).running
    }

    /// Whether cores are held by the halt bit.
    pub fn is_halted(&self) -> bool {
        lock(&self.soc).sysrst & registers::SYSRST_HALT != 0
    }

    pub fn trace_enabled(&self, id: ModuleId) -> bool {
        lock(&self.soc).module_mut(id).is_some_and(|m| m.cs & registers::CS_TRACE_ENABLE != 0)
    }

    /// Drop every frame queued for the host. Returns how many were dropped.
    pub fn discard_pending(&self) -> usize {
        let _guard = lock(&self.soc);
        self.to_host_rx.try_iter().count()
    }

    /// Drop queued trace and stop notices, keeping responses in order.
    /// Caller holds the system lock, so nothing is queued meanwhile.
    fn drop_notices(&self) {
        let kept: Vec<Frame> = self.to_host_rx.try_iter().filter(|f| f.body.is_response()).collect();
        for frame in kept {
            let _ = self.to_host_tx.send(frame);
        }
    }

    fn link_lost() -> TransportError {
        TransportError::LinkLost("simulated link disconnected".to_string())
    }

    fn run_program(&self) {
        let (generation, program) = {
            let soc = lock(&self.soc);
            (soc.generation, soc.program.clone())
        };
        let this = self.clone();

        thread::spawn(move || {
            log::debug!("Simulated cores released");
            for event in &program.stm_events {
                this.emit(generation, |soc, out| {
                    let ts = soc.next_timestamp();
                    for id in soc.enabled(|s| matches!(s, ModuleSpec::Stm)) {
                        out.push(Frame::to_host(id, Body::StmTrace { timestamp: ts, id: event.id, value: event.value }));
                    }
                });
            }
            for pc in &program.ctm_trace {
                this.emit(generation, |soc, out| {
                    let ts = soc.next_timestamp();
                    for id in soc.enabled(|s| matches!(s, ModuleSpec::Ctm { .. })) {
                        out.push(Frame::to_host(id, Body::CtmTrace { timestamp: ts, pc: *pc }));
                    }
                });
            }

            let Some(run_time) = program.run_time_ms else { return };
            thread::sleep(Duration::from_millis(run_time));

            let mut soc = lock(&this.soc);
            if soc.generation != generation || !soc.running || !this.connected.load(Ordering::SeqCst) {
                return;
            }
            soc.running = false;
            soc.finished = true;
            let _ = this
                .to_host_tx
                .send(Frame::to_host(ModuleId::SCM, Body::Stopped { reason: StopReason::Exit(program.exit_code) }));
            log::debug!("Simulated program exited with {}", program.exit_code);
        });
    }

    /// Emit frames built under the system lock, unless a reset intervened.
    fn emit(&self, generation: u64, build: impl FnOnce(&mut Soc, &mut Vec<Frame>)) {
        let mut soc = lock(&self.soc);
        if soc.generation != generation || !soc.running {
            return;
        }
        let mut out = Vec::new();
        build(&mut *soc, &mut out);
        for frame in out {
            let _ = self.to_host_tx.send(frame);
        }
    }
}

impl Soc {
    fn enabled(&self, kind: impl Fn(&ModuleSpec) -> bool) -> Vec<ModuleId> {
        self.modules
            .iter()
            .enumerate()
            .filter(|(_, m)| kind(&m.spec) && m.cs & registers::CS_TRACE_ENABLE != 0)
            .filter_map(|(i, _)| u16::try_from(i).ok().map(|i| ModuleId(i + Self::first_id())))
            .collect()
    }
}

/// Transport endpoint of a [`SimulatedSoc`].
pub struct SimTransport {
    soc: SimulatedSoc,
}

impl Transport for SimTransport {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.soc.connected.load(Ordering::SeqCst) {
            return Err(SimulatedSoc::link_lost());
        }

        let released = {
            let mut soc = lock(&self.soc.soc);
            let generation = soc.generation;
            let (response, released) = soc.handle(frame.dest, frame.body.clone());
            if soc.generation != generation {
                // Notices of the run a reset aborted must not reach the host.
                self.soc.drop_notices();
            }
            if let Some(body) = response {
                // Queued under the lock so responses stay ordered with trace.
                let _ = self.soc.to_host_tx.send(Frame::to_host(frame.dest, body));
            }
            released
        };

        if released {
            self.soc.run_program();
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if !self.soc.connected.load(Ordering::SeqCst) {
            return Err(SimulatedSoc::link_lost());
        }
        match self.soc.to_host_rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SimulatedSoc::link_lost()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Image, Segment, SegmentFlags};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn request(transport: &SimTransport, dest: u16, body: Body) -> Body {
        transport.send(&Frame::to_module(ModuleId(dest), body)).unwrap();
        let frame = transport.receive(TIMEOUT).unwrap().expect("no response");
        assert_eq!(frame.src, ModuleId(dest));
        assert_eq!(frame.dest, ModuleId::HOST);
        frame.body
    }

    fn read(transport: &SimTransport, dest: u16, reg: u16) -> u64 {
        match request(transport, dest, Body::RegRead { reg }) {
            Body::RegValue { value, .. } => value,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_default_layout_registers() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let t = soc.connect();

        assert_eq!(read(&t, 1, registers::MOD_TYPE), types::SCM);
        assert_eq!(read(&t, 1, registers::SCM_NUM_MOD), 4);
        assert_eq!(read(&t, 2, registers::MOD_TYPE), types::STM);
        assert_eq!(read(&t, 3, registers::MOD_TYPE), types::CTM);
        assert_eq!(read(&t, 3, registers::CTM_CORE), 0);
        assert_eq!(read(&t, 4, registers::MOD_TYPE), types::MAM);
        assert_eq!(read(&t, 4, registers::MAM_REGION_COUNT), 1);
        assert_eq!(read(&t, 4, registers::MAM_REGION_BASE), 0);
        assert_eq!(read(&t, 4, registers::MAM_REGION_BASE + 1), 0x1000_0000);

        assert_eq!(
            request(&t, 2, Body::RegRead { reg: 0x0777 }),
            Body::Nack { code: nack::UNKNOWN_REGISTER }
        );
        assert_eq!(request(&t, 9, Body::RegRead { reg: 0 }), Body::Nack { code: nack::NO_SUCH_MODULE });
    }

    #[test]
    fn test_memory_access() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let t = soc.connect();

        let data = vec![1, 2, 3, 4, 5];
        // Straddles a page boundary.
        let address = PAGE_SIZE - 2;
        assert_eq!(request(&t, 4, Body::MemWrite { address, data: data.clone() }), Body::Ack);
        assert_eq!(request(&t, 4, Body::MemRead { address, len: 5 }), Body::MemData { address, data: data.clone() });
        assert_eq!(soc.memory(ModuleId(4), address, 5), Some(data));
        assert_eq!(soc.memory(ModuleId(4), 0x9000, 2), Some(vec![0, 0]));

        assert_eq!(
            request(&t, 4, Body::MemWrite { address: 0x1000_0000, data: vec![0] }),
            Body::Nack { code: nack::ADDRESS_ERROR }
        );
        assert_eq!(request(&t, 2, Body::MemRead { address: 0, len: 1 }), Body::Nack { code: nack::UNSUPPORTED });
    }

    #[test]
    fn test_program_runs_after_reset_release() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let t = soc.connect();

        // Nothing runs before a reset was seen.
        assert_eq!(request(&t, 1, Body::RegWrite { reg: registers::SCM_SYSRST, value: 0 }), Body::Ack);
        assert!(!soc.is_running());

        request(&t, 2, Body::RegWrite { reg: registers::MOD_CS, value: registers::CS_TRACE_ENABLE });
        assert!(soc.trace_enabled(ModuleId(2)));

        let hold = registers::SYSRST_SYSTEM | registers::SYSRST_HALT;
        request(&t, 1, Body::RegWrite { reg: registers::SCM_SYSRST, value: hold });
        request(&t, 1, Body::RegWrite { reg: registers::SCM_SYSRST, value: registers::SYSRST_HALT });
        assert!(soc.is_halted());
        assert!(!soc.is_running());

        request(&t, 1, Body::RegWrite { reg: registers::SCM_SYSRST, value: 0 });
        assert!(!soc.is_halted());

        let mut text = Vec::new();
        loop {
            let frame = t.receive(TIMEOUT).unwrap().expect("program never stopped");
            match frame.body {
                Body::StmTrace { value, .. } => {
                    assert_eq!(frame.src, ModuleId(2));
                    text.push(u8::try_from(value).unwrap());
                }
                Body::Stopped { reason } => {
                    assert_eq!(frame.src, ModuleId::SCM);
                    assert_eq!(reason, StopReason::Exit(0));
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(text, b"hello\n");
        assert!(!soc.is_running());
    }

    #[test]
    fn test_reset_drops_notices_of_previous_run() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let t = soc.connect();
        request(&t, 2, Body::RegWrite { reg: registers::MOD_CS, value: registers::CS_TRACE_ENABLE });
        request(&t, 1, Body::RegWrite { reg: registers::SCM_SYSRST, value: registers::SYSRST_SYSTEM });
        request(&t, 1, Body::RegWrite { reg: registers::SCM_SYSRST, value: 0 });
        while soc.is_running() {
            thread::sleep(Duration::from_millis(5));
        }

        // Trace and the stop notice are still queued; the next reset drops them.
        let hold = registers::SYSRST_SYSTEM | registers::SYSRST_HALT;
        assert_eq!(request(&t, 1, Body::RegWrite { reg: registers::SCM_SYSRST, value: hold }), Body::Ack);
        assert_eq!(t.receive(Duration::from_millis(50)).unwrap(), None);
    }

    #[test]
    fn test_discard_pending() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let t = soc.connect();
        t.send(&Frame::to_module(ModuleId::SCM, Body::RegRead { reg: registers::MOD_TYPE })).unwrap();
        t.send(&Frame::to_module(ModuleId(2), Body::RegRead { reg: registers::MOD_TYPE })).unwrap();

        assert_eq!(soc.discard_pending(), 2);
        assert_eq!(t.receive(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_disconnect_fails_both_directions() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let t = soc.connect();
        soc.disconnect();

        assert!(matches!(
            t.send(&Frame::to_module(ModuleId::SCM, Body::RegRead { reg: 0 })),
            Err(TransportError::LinkLost(_))
        ));
        assert!(matches!(t.receive(Duration::from_millis(1)), Err(TransportError::LinkLost(_))));
    }

    #[test]
    fn test_layout_for_image() {
        let image = Image::new(0x8000_0000)
            .with_segment(Segment::new(0x8000_0000, vec![0x13; 16], SegmentFlags::CODE))
            .with_segment(Segment::new(0x8000_2010, vec![0; 8], SegmentFlags::DATA));
        let layout = SocLayout::for_image(&image);

        let ModuleSpec::Mam { regions } = &layout.modules[2] else { panic!("no memory module") };
        assert_eq!(regions[0].base, 0x8000_0000);
        assert!(regions[0].contains_range(0x8000_2010, 8));
        assert_eq!(layout.program.ctm_trace, vec![0x8000_0000, 0x8000_0004, 0x8000_0008, 0x8000_000c]);
    }

    #[test]
    fn test_layout_from_json() {
        let layout = SocLayout::from_json(
            r#"{"modules": [{"type": "mam", "regions": [{"base": 4096, "size": 4096}]}, {"type": "dem_uart"}],
                "program": {"run_time_ms": null, "exit_code": 3}}"#,
        )
        .unwrap();
        assert_eq!(layout.modules.len(), 2);
        assert_eq!(layout.modules[1], ModuleSpec::DemUart);
        assert_eq!(layout.program.run_time_ms, None);
        assert_eq!(layout.program.exit_code, 3);
        assert!(SocLayout::from_json("{\"modules\": [{\"type\": \"gpu\"}]}").is_err());
    }
}
