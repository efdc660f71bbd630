//! Shared register model standing in for mapped PCI windows.
//!
//! A [`RegisterModel`] is a [`RegionProvider`]: every region it maps is a
//! view onto the same register file, so the test keeps a clone and inspects
//! the access log and register contents after the code under test has run.
//! Device behaviour (arbitration grants, access gating, command engines) is
//! layered on top with [`RegisterBehavior`] implementations.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;

use hostflash_engine::mmio::{RegionIo, RegionProvider};
use hostflash_errors::{Result, UpdateError};
use parking_lot::Mutex;

/// Direction of a logged access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Register read, with the value returned
    Read,
    /// Register write, with the value written
    Write,
}

/// One logged register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// Read or write
    pub kind: AccessKind,
    /// Region index
    pub region: usize,
    /// Byte offset in the region
    pub offset: usize,
    /// Value read or written
    pub value: u32,
}

/// Sparse register contents keyed by region and offset. Unwritten
/// registers read as zero.
#[derive(Debug, Default)]
pub struct RegisterFile {
    words: BTreeMap<(usize, usize), u32>,
}

impl RegisterFile {
    /// Stored value of a register.
    pub fn get(&self, region: usize, offset: usize) -> u32 {
        self.words.get(&(region, offset)).copied().unwrap_or(0)
    }

    /// Store a register value.
    pub fn set(&mut self, region: usize, offset: usize, value: u32) {
        self.words.insert((region, offset), value);
    }
}

/// Device-side reaction to register traffic.
pub trait RegisterBehavior: Send {
    /// React to a write. Return `true` when the write was consumed and must
    /// not be stored verbatim.
    fn write(&mut self, regs: &mut RegisterFile, region: usize, offset: usize, value: u32) -> bool;

    /// Value to return for a read, or `None` to return the stored value.
    fn read(&self, regs: &RegisterFile, region: usize, offset: usize) -> Option<u32> {
        let _ = (regs, region, offset);
        None
    }
}

struct ModelState {
    lengths: BTreeMap<usize, usize>,
    regs: RegisterFile,
    behaviors: Vec<Box<dyn RegisterBehavior>>,
    log: Vec<Access>,
    mapped: BTreeSet<usize>,
    map_calls: usize,
    fail_map: BTreeSet<usize>,
}

/// Register model shared between the test and the regions it maps.
#[derive(Clone)]
pub struct RegisterModel {
    state: Arc<Mutex<ModelState>>,
}

impl std::fmt::Debug for RegisterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RegisterModel")
            .field("regions", &state.lengths)
            .field("accesses", &state.log.len())
            .finish_non_exhaustive()
    }
}

impl RegisterModel {
    /// A model exposing one region of `len` bytes per `(index, len)` pair.
    pub fn new(regions: &[(usize, usize)]) -> Self {
        Self {
            state: Arc::new(Mutex::new(ModelState {
                lengths: regions.iter().copied().collect(),
                regs: RegisterFile::default(),
                behaviors: Vec::new(),
                log: Vec::new(),
                mapped: BTreeSet::new(),
                map_calls: 0,
                fail_map: BTreeSet::new(),
            })),
        }
    }

    /// Add a behaviour. Behaviours are consulted in insertion order.
    #[must_use]
    pub fn with_behavior(self, behavior: impl RegisterBehavior + 'static) -> Self {
        self.state.lock().behaviors.push(Box::new(behavior));
        self
    }

    /// Make mapping `index` fail with a transport error.
    #[must_use]
    pub fn failing_map(self, index: usize) -> Self {
        self.state.lock().fail_map.insert(index);
        self
    }

    /// Preset a register without logging.
    pub fn preset(&self, region: usize, offset: usize, value: u32) {
        self.state.lock().regs.set(region, offset, value);
    }

    /// Stored value of a register, bypassing behaviours.
    pub fn peek(&self, region: usize, offset: usize) -> u32 {
        self.state.lock().regs.get(region, offset)
    }

    /// Every access so far, in order.
    pub fn log(&self) -> Vec<Access> {
        self.state.lock().log.clone()
    }

    /// Values written to one register, in order.
    pub fn writes_to(&self, region: usize, offset: usize) -> Vec<u32> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|a| a.kind == AccessKind::Write && a.region == region && a.offset == offset)
            .map(|a| a.value)
            .collect()
    }

    /// Offsets of all writes in `region`, in order.
    pub fn write_offsets(&self, region: usize) -> Vec<usize> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|a| a.kind == AccessKind::Write && a.region == region)
            .map(|a| a.offset)
            .collect()
    }

    /// Forget the access log.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Regions currently mapped.
    pub fn mapped(&self) -> Vec<usize> {
        self.state.lock().mapped.iter().copied().collect()
    }

    /// Number of `map_region` calls, including failed ones.
    pub fn map_calls(&self) -> usize {
        self.state.lock().map_calls
    }
}

impl RegionProvider for RegisterModel {
    fn map_region(&mut self, index: usize) -> Result<Box<dyn RegionIo>> {
        let mut state = self.state.lock();
        state.map_calls += 1;
        if state.fail_map.contains(&index) {
            return Err(UpdateError::transport(format!("map BAR[{index}]"), "injected failure"));
        }
        let Some(&len) = state.lengths.get(&index) else {
            return Err(UpdateError::not_mapped(format!("BAR[{index}]")));
        };
        state.mapped.insert(index);
        Ok(Box::new(ModelRegion {
            state: Arc::clone(&self.state),
            index,
            len,
        }))
    }
}

struct ModelRegion {
    state: Arc<Mutex<ModelState>>,
    index: usize,
    len: usize,
}

impl RegionIo for ModelRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let mut state = self.state.lock();
        let value = state
            .behaviors
            .iter()
            .find_map(|b| b.read(&state.regs, self.index, offset))
            .unwrap_or_else(|| state.regs.get(self.index, offset));
        state.log.push(Access {
            kind: AccessKind::Read,
            region: self.index,
            offset,
            value,
        });
        value
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        let ModelState {
            regs, behaviors, log, ..
        } = &mut *state;
        log.push(Access {
            kind: AccessKind::Write,
            region: self.index,
            offset,
            value,
        });
        let consumed = behaviors
            .iter_mut()
            .any(|b| b.write(regs, self.index, offset, value));
        if !consumed {
            regs.set(self.index, offset, value);
        }
    }
}

impl Drop for ModelRegion {
    fn drop(&mut self) {
        self.state.lock().mapped.remove(&self.index);
    }
}

/// Request/grant arbitration register: a write with `request_set` bits
/// grants (unless disabled), a write with `request_clear` bits withdraws.
/// The register reads back `granted` while held.
#[derive(Debug, Clone)]
pub struct ArbitrationBehavior {
    region: usize,
    offset: usize,
    request_set: u32,
    request_clear: u32,
    granted: u32,
    grant: bool,
}

impl ArbitrationBehavior {
    /// Arbitration at `region:offset` using the given bit masks.
    pub fn new(region: usize, offset: usize, request_set: u32, request_clear: u32, granted: u32) -> Self {
        Self {
            region,
            offset,
            request_set,
            request_clear,
            granted,
            grant: true,
        }
    }

    /// A requester that never wins.
    #[must_use]
    pub fn never_grant(mut self) -> Self {
        self.grant = false;
        self
    }
}

impl RegisterBehavior for ArbitrationBehavior {
    fn write(&mut self, regs: &mut RegisterFile, region: usize, offset: usize, value: u32) -> bool {
        if (region, offset) != (self.region, self.offset) {
            return false;
        }
        let mut current = regs.get(region, offset);
        if value & self.request_set != 0 && self.grant {
            current |= self.granted;
        }
        if value & self.request_clear != 0 {
            current &= !self.granted;
        }
        regs.set(region, offset, current);
        true
    }
}

/// Access gate: while the `enable` bit of the gate register is clear, reads
/// of the protected range return all ones and writes to it are dropped.
#[derive(Debug, Clone)]
pub struct AccessGateBehavior {
    gate: (usize, usize),
    enable: u32,
    region: usize,
    protected: Range<usize>,
}

impl AccessGateBehavior {
    /// Gate `protected` in `region` on the `enable` bit of the register at
    /// `gate`.
    pub fn new(gate: (usize, usize), enable: u32, region: usize, protected: Range<usize>) -> Self {
        Self {
            gate,
            enable,
            region,
            protected,
        }
    }

    fn blocked(&self, regs: &RegisterFile, region: usize, offset: usize) -> bool {
        region == self.region
            && self.protected.contains(&offset)
            && regs.get(self.gate.0, self.gate.1) & self.enable == 0
    }
}

impl RegisterBehavior for AccessGateBehavior {
    fn write(&mut self, regs: &mut RegisterFile, region: usize, offset: usize, _value: u32) -> bool {
        self.blocked(regs, region, offset)
    }

    fn read(&self, regs: &RegisterFile, region: usize, offset: usize) -> Option<u32> {
        self.blocked(regs, region, offset).then_some(u32::MAX)
    }
}

/// Register offsets and bits of a command/address/data NVM engine.
#[derive(Debug, Clone, Copy)]
pub struct NvmEngineLayout {
    /// Region holding the engine
    pub region: usize,
    /// Command register
    pub command: usize,
    /// Address register
    pub address: usize,
    /// Read data register
    pub read_data: usize,
    /// Write data register
    pub write_data: usize,
    /// Command bit starting an operation
    pub doit: u32,
    /// Command bit selecting a write
    pub write: u32,
    /// Command bit reporting completion, write-one-to-clear
    pub done: u32,
}

/// Word-addressed non-volatile memory behind a command engine. Data words
/// are big-endian in storage.
#[derive(Debug, Clone)]
pub struct NvmEngineBehavior {
    layout: NvmEngineLayout,
    storage: Arc<Mutex<Vec<u8>>>,
    complete: bool,
}

impl NvmEngineBehavior {
    /// An engine over `size` bytes of erased (0xFF) memory.
    pub fn new(layout: NvmEngineLayout, size: usize) -> Self {
        Self {
            layout,
            storage: Arc::new(Mutex::new(vec![0xFF; size])),
            complete: true,
        }
    }

    /// An engine that never reports completion.
    #[must_use]
    pub fn stalled(mut self) -> Self {
        self.complete = false;
        self
    }

    /// Handle onto the memory contents.
    pub fn storage(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.storage)
    }
}

impl RegisterBehavior for NvmEngineBehavior {
    fn write(&mut self, regs: &mut RegisterFile, region: usize, offset: usize, value: u32) -> bool {
        let l = self.layout;
        if (region, offset) != (l.region, l.command) {
            return false;
        }
        let mut status = regs.get(region, offset);
        if value & l.done != 0 {
            status &= !l.done;
        }
        if value & l.doit != 0 && self.complete {
            let addr = regs.get(region, l.address) as usize;
            let mut storage = self.storage.lock();
            if let Some(word) = storage.get_mut(addr..addr.saturating_add(4)) {
                if value & l.write != 0 {
                    word.copy_from_slice(&regs.get(region, l.write_data).to_be_bytes());
                } else if let Ok(bytes) = <[u8; 4]>::try_from(&*word) {
                    regs.set(region, l.read_data, u32::from_be_bytes(bytes));
                }
            }
            status |= l.done;
        }
        regs.set(region, offset, status);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostflash_engine::mmio::MappedRegions;

    #[test]
    fn test_regions_share_one_register_file() {
        let model = RegisterModel::new(&[(0, 0x100), (1, 0x100)]);
        let mut provider = model.clone();
        let mut regions = MappedRegions::open(&mut provider, &[0, 1]).unwrap();
        regions.write(0, 0x10, 7).unwrap();
        assert_eq!(model.peek(0, 0x10), 7);
        assert_eq!(model.mapped(), vec![0, 1]);
        regions.close();
        assert!(model.mapped().is_empty());
    }

    #[test]
    fn test_arbitration_grant_and_clear() {
        let model = RegisterModel::new(&[(0, 0x100)]).with_behavior(ArbitrationBehavior::new(0, 0x20, 0x2, 0x20, 0x200));
        let mut provider = model.clone();
        let mut regions = MappedRegions::open(&mut provider, &[0]).unwrap();
        regions.write(0, 0x20, 0x2).unwrap();
        assert_eq!(regions.read(0, 0x20).unwrap(), 0x200);
        regions.write(0, 0x20, 0x20).unwrap();
        assert_eq!(regions.read(0, 0x20).unwrap(), 0);
    }

    #[test]
    fn test_access_gate_blocks_until_enabled() {
        let model = RegisterModel::new(&[(0, 0x100)]).with_behavior(AccessGateBehavior::new((0, 0x24), 0x1, 0, 0x10..0x14));
        model.preset(0, 0x10, 0x1234);
        let mut provider = model.clone();
        let mut regions = MappedRegions::open(&mut provider, &[0]).unwrap();
        assert_eq!(regions.read(0, 0x10).unwrap(), u32::MAX);
        regions.write(0, 0x24, 0x1).unwrap();
        assert_eq!(regions.read(0, 0x10).unwrap(), 0x1234);
    }

    #[test]
    fn test_failing_map_is_reported() {
        let mut model = RegisterModel::new(&[(0, 0x100)]).failing_map(0);
        assert!(model.map_region(0).is_err());
        assert_eq!(model.map_calls(), 1);
    }
}
