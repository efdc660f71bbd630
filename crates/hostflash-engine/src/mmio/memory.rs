//! Heap-backed region for simulations and tests.

use super::RegionIo;

/// A zero-initialised window held in host memory.
///
/// Registers are stored little-endian, the byte order of the PCI devices
/// this engine drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    bytes: Vec<u8>,
}

impl MemoryRegion {
    /// A zeroed window of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    /// A window initialised from `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl RegionIo for MemoryRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_u32(&self, offset: usize) -> u32 {
        self.bytes
            .get(offset..offset.saturating_add(4))
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map_or(u32::MAX, u32::from_le_bytes)
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        if let Some(word) = self.bytes.get_mut(offset..offset.saturating_add(4)) {
            word.copy_from_slice(&value.to_le_bytes());
        }
    }
}
