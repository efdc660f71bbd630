//! Register access over memory-mapped hardware regions.
//!
//! [`MappedRegion`] owns the bounds checks and memory barriers; the raw
//! backend behind it ([`RegionIo`]) only ever sees aligned, in-bounds
//! offsets. [`MappedRegions`] is the set of windows one device maps while
//! open.

mod memory;
mod sysfs;

use std::sync::atomic::{Ordering, fence};

use hostflash_errors::{Result, UpdateError};
use tracing::{debug, trace};

use crate::registers::RegisterLayout;

pub use memory::MemoryRegion;
pub use sysfs::SysfsPciProvider;
#[cfg(unix)]
pub use sysfs::MmapRegion;

/// Width of one register access in bytes.
pub const REGISTER_WIDTH: usize = 4;

/// Raw 32-bit access to one mapped window.
///
/// Offsets passed in are always 4-byte aligned and satisfy
/// `offset + 4 <= len()`.
pub trait RegionIo: Send {
    /// Length of the window in bytes.
    fn len(&self) -> usize;

    /// Whether the window is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the register at `offset`.
    fn read_u32(&self, offset: usize) -> u32;

    /// Write the register at `offset`.
    fn write_u32(&mut self, offset: usize, value: u32);
}

/// Source of mapped windows, addressed by resource index.
pub trait RegionProvider {
    /// Map the window with the given index.
    ///
    /// # Errors
    ///
    /// `TransportFailure` when the window cannot be opened or mapped,
    /// `UnsupportedOperation` when the platform cannot map it at all.
    fn map_region(&mut self, index: usize) -> Result<Box<dyn RegionIo>>;
}

impl<P: RegionProvider + ?Sized> RegionProvider for &mut P {
    fn map_region(&mut self, index: usize) -> Result<Box<dyn RegionIo>> {
        (**self).map_region(index)
    }
}

/// A named, bounded window of device registers.
pub struct MappedRegion {
    name: String,
    index: usize,
    io: Option<Box<dyn RegionIo>>,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl MappedRegion {
    /// Wrap a mapped window.
    pub fn new(index: usize, io: Box<dyn RegionIo>) -> Self {
        Self {
            name: format!("BAR[{index}]"),
            index,
            io: Some(io),
        }
    }

    /// A region slot with no mapping behind it.
    pub fn unmapped(index: usize) -> Self {
        Self {
            name: format!("BAR[{index}]"),
            index,
            io: None,
        }
    }

    /// Region name, e.g. `BAR[0]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether a mapping is present.
    pub fn is_mapped(&self) -> bool {
        self.io.is_some()
    }

    /// Mapped length, zero when unmapped.
    pub fn len(&self) -> usize {
        self.io.as_ref().map_or(0, |io| io.len())
    }

    /// Whether the region has no accessible bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, offset: usize) -> Result<()> {
        let Some(io) = self.io.as_ref() else {
            return Err(UpdateError::not_mapped(&self.name));
        };
        let len = io.len();
        let fits = offset
            .checked_add(REGISTER_WIDTH)
            .is_some_and(|end| end <= len);
        if !fits || offset % REGISTER_WIDTH != 0 {
            return Err(UpdateError::out_of_bounds(
                &self.name,
                offset,
                REGISTER_WIDTH,
                len,
            ));
        }
        Ok(())
    }

    /// Read the 32-bit register at `offset`.
    ///
    /// A full barrier precedes the access so that hardware-initiated changes
    /// are observed.
    ///
    /// # Errors
    ///
    /// `NotMapped` if the mapping is absent, `OutOfBounds` if
    /// `offset + 4 > len` or `offset` is not 4-byte aligned.
    pub fn read(&self, offset: usize) -> Result<u32> {
        self.check(offset)?;
        let io = self
            .io
            .as_ref()
            .ok_or_else(|| UpdateError::not_mapped(&self.name))?;
        fence(Ordering::SeqCst);
        let value = io.read_u32(offset);
        trace!(region = %self.name, "read {offset:#06x} -> {value:#010x}");
        Ok(value)
    }

    /// Write the 32-bit register at `offset`.
    ///
    /// Barriers on both sides keep the write ordered against earlier accesses
    /// and against any dependent read, in this or another region.
    ///
    /// # Errors
    ///
    /// As for [`MappedRegion::read`].
    pub fn write(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset)?;
        let io = self
            .io
            .as_mut()
            .ok_or_else(|| UpdateError::not_mapped(&self.name))?;
        trace!(region = %self.name, "write {offset:#06x} <- {value:#010x}");
        fence(Ordering::SeqCst);
        io.write_u32(offset, value);
        fence(Ordering::SeqCst);
        Ok(())
    }

    /// Drop the mapping. Unmapping an unmapped region is a no-op.
    pub fn unmap(&mut self) {
        if self.io.take().is_some() {
            debug!(region = %self.name, "unmapped");
        }
    }
}

/// The set of windows a device maps while open.
#[derive(Debug, Default)]
pub struct MappedRegions {
    regions: Vec<MappedRegion>,
}

impl MappedRegions {
    /// An empty, closed set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every window in `indexes`.
    ///
    /// If any mapping fails, windows mapped so far are unmapped before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// The provider's error for the first window that fails to map.
    pub fn open<P: RegionProvider + ?Sized>(provider: &mut P, indexes: &[usize]) -> Result<Self> {
        let mut set = Self::new();
        for &index in indexes {
            match provider.map_region(index) {
                Ok(io) => {
                    debug!(region = index, len = io.len(), "mapped BAR[{index}]");
                    set.regions.push(MappedRegion::new(index, io));
                }
                Err(e) => {
                    set.close();
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    /// Whether any window is still mapped.
    pub fn is_open(&self) -> bool {
        self.regions.iter().any(MappedRegion::is_mapped)
    }

    /// Number of region slots.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the set has no region slots.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Region slots in mapping order.
    pub fn iter(&self) -> impl Iterator<Item = &MappedRegion> {
        self.regions.iter()
    }

    fn find(&self, index: usize) -> Result<&MappedRegion> {
        self.regions
            .iter()
            .find(|r| r.index == index)
            .ok_or_else(|| UpdateError::not_mapped(format!("BAR[{index}]")))
    }

    fn find_mut(&mut self, index: usize) -> Result<&mut MappedRegion> {
        self.regions
            .iter_mut()
            .find(|r| r.index == index)
            .ok_or_else(|| UpdateError::not_mapped(format!("BAR[{index}]")))
    }

    /// Read a register from the window with resource index `region`.
    ///
    /// # Errors
    ///
    /// `NotMapped` if that window is absent or closed, `OutOfBounds` for a
    /// bad offset.
    pub fn read(&self, region: usize, offset: usize) -> Result<u32> {
        self.find(region)?.read(offset)
    }

    /// Write a register in the window with resource index `region`.
    ///
    /// # Errors
    ///
    /// As for [`MappedRegions::read`].
    pub fn write(&mut self, region: usize, offset: usize, value: u32) -> Result<()> {
        self.find_mut(region)?.write(offset, value)
    }

    /// Read a register described by a layout, logging its decoded fields.
    ///
    /// # Errors
    ///
    /// As for [`MappedRegions::read`].
    pub fn read_reg(&self, reg: &RegisterLayout) -> Result<u32> {
        let value = self.read(reg.region, reg.offset)?;
        trace!("{}", reg.decode(value));
        Ok(value)
    }

    /// Write a register described by a layout.
    ///
    /// # Errors
    ///
    /// As for [`MappedRegions::read`].
    pub fn write_reg(&mut self, reg: &RegisterLayout, value: u32) -> Result<()> {
        trace!("{}", reg.decode(value));
        self.write(reg.region, reg.offset, value)
    }

    /// Read-modify-write a register described by a layout.
    ///
    /// # Errors
    ///
    /// As for [`MappedRegions::read`].
    pub fn modify_reg(&mut self, reg: &RegisterLayout, f: impl FnOnce(u32) -> u32) -> Result<u32> {
        let old = self.read_reg(reg)?;
        let new = f(old);
        self.write_reg(reg, new)?;
        Ok(new)
    }

    /// Unmap every window. Closing twice is a no-op.
    pub fn close(&mut self) {
        for region in &mut self.regions {
            region.unmap();
        }
    }
}

impl Drop for MappedRegions {
    fn drop(&mut self) {
        self.close();
    }
}
