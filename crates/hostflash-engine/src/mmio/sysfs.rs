//! PCI BAR mapping through sysfs resource files.
//!
//! Linux exposes each PCI BAR of a device as
//! `/sys/bus/pci/devices/<addr>/resourceN`. 64-bit BARs take two slots, so
//! window `i` lives in `resource{2*i}`.

#![cfg_attr(
    unix,
    expect(unsafe_code, reason = "mapping and volatile access of device BAR memory")
)]

use std::path::{Path, PathBuf};

use hostflash_errors::{Result, UpdateError};

use super::{RegionIo, RegionProvider};

/// Maps BARs of one PCI device from its sysfs directory.
#[derive(Debug, Clone)]
pub struct SysfsPciProvider {
    sysfs_path: PathBuf,
}

impl SysfsPciProvider {
    /// Provider for the device at `sysfs_path`.
    pub fn new(sysfs_path: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_path: sysfs_path.into(),
        }
    }

    /// Device directory.
    pub fn sysfs_path(&self) -> &Path {
        &self.sysfs_path
    }

    /// Resource file backing window `index`.
    pub fn resource_path(&self, index: usize) -> PathBuf {
        self.sysfs_path
            .join(format!("resource{}", index.saturating_mul(2)))
    }
}

#[cfg(unix)]
impl RegionProvider for SysfsPciProvider {
    fn map_region(&mut self, index: usize) -> Result<Box<dyn RegionIo>> {
        let path = self.resource_path(index);
        let region = MmapRegion::open(&path)?;
        tracing::debug!(
            "mapping BAR[{index}] {} for {:#x} bytes",
            path.display(),
            region.len()
        );
        Ok(Box::new(region))
    }
}

#[cfg(not(unix))]
impl RegionProvider for SysfsPciProvider {
    fn map_region(&mut self, index: usize) -> Result<Box<dyn RegionIo>> {
        Err(UpdateError::unsupported(format!(
            "cannot map {}: memory-mapped BARs need a unix target",
            self.resource_path(index).display()
        )))
    }
}

/// A shared read/write mapping of a resource file.
#[cfg(unix)]
#[derive(Debug)]
pub struct MmapRegion {
    map: memmap2::MmapMut,
}

#[cfg(unix)]
impl MmapRegion {
    /// Open and map `path` read/write with synchronous I/O semantics.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the file cannot be opened, has no length, or
    /// cannot be mapped.
    pub fn open(path: &Path) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| UpdateError::io(format!("open {}", path.display()), e))?;
        let len = file
            .metadata()
            .map_err(|e| UpdateError::io(format!("stat {}", path.display()), e))?
            .len();
        if len == 0 {
            return Err(UpdateError::transport(
                format!("map {}", path.display()),
                "resource has zero length",
            ));
        }

        // SAFETY: the resource file is device memory, not a regular file that
        // another process could truncate; the mapping is only accessed through
        // aligned volatile 32-bit operations below.
        let map = unsafe { memmap2::MmapOptions::new().map_mut(&file) }
            .map_err(|e| UpdateError::io(format!("mmap {}", path.display()), e))?;
        Ok(Self { map })
    }
}

#[cfg(unix)]
impl RegionIo for MmapRegion {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let ptr = self.map.as_ptr().wrapping_add(offset).cast::<u32>();
        // SAFETY: the caller guarantees `offset` is 4-byte aligned and
        // `offset + 4 <= len`; the mapping base is page aligned.
        unsafe { ptr.read_volatile() }
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        let ptr = self.map.as_mut_ptr().wrapping_add(offset).cast::<u32>();
        // SAFETY: as for `read_u32`; `&mut self` makes this the only access.
        unsafe { ptr.write_volatile(value) }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use hostflash_errors::ErrorKind;

    #[test]
    fn test_resource_paths_skip_upper_halves() {
        let provider = SysfsPciProvider::new("/sys/bus/pci/devices/0000:01:00.0");
        assert!(provider.resource_path(0).ends_with("resource0"));
        assert!(provider.resource_path(1).ends_with("resource2"));
        assert!(provider.resource_path(2).ends_with("resource4"));
    }

    #[test]
    fn test_missing_resource_is_transport_failure() {
        let mut provider = SysfsPciProvider::new("/nonexistent/hostflash/device");
        let err = provider.map_region(0).err().map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::TransportFailure));
    }
}
