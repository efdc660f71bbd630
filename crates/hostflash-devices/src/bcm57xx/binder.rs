//! Kernel driver binding for PCI devices.
//!
//! The NIC driver owns the NVM engine while bound, so the update detaches
//! it first and binds it again afterwards.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use hostflash_errors::{Result, UpdateError};
use tracing::{debug, info};

/// Kernel driver normally bound to BCM57xx NICs.
pub const TG3_DRIVER: &str = "tg3";

/// Detaches and reattaches the kernel driver of one device.
pub trait DriverBinder: Send {
    /// Unbind whatever driver is bound. Unbinding an unbound device succeeds.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the kernel refuses.
    fn unbind(&mut self) -> Result<()>;

    /// Bind `driver`.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the kernel refuses.
    fn bind(&mut self, driver: &str) -> Result<()>;
}

impl<B: DriverBinder + ?Sized> DriverBinder for Box<B> {
    fn unbind(&mut self) -> Result<()> {
        (**self).unbind()
    }

    fn bind(&mut self, driver: &str) -> Result<()> {
        (**self).bind(driver)
    }
}

/// Binder writing the device address to the sysfs `bind`/`unbind` files.
#[derive(Debug, Clone)]
pub struct SysfsDriverBinder {
    device_path: PathBuf,
    drivers_root: PathBuf,
}

impl SysfsDriverBinder {
    /// Binder for the device directory `device_path`, e.g.
    /// `/sys/bus/pci/devices/0000:01:00.0`.
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            drivers_root: PathBuf::from("/sys/bus/pci/drivers"),
        }
    }

    /// Use a different directory of driver entries.
    #[must_use]
    pub fn with_drivers_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.drivers_root = root.into();
        self
    }

    /// Device directory.
    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    fn address(&self) -> Result<String> {
        self.device_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                UpdateError::device_mismatch(format!(
                    "{} does not name a PCI device",
                    self.device_path.display()
                ))
            })
    }

    fn write_attr(path: &Path, value: &str) -> Result<()> {
        let op = format!("write {}", path.display());
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| UpdateError::io(op.clone(), e))?;
        file.write_all(value.as_bytes()).map_err(|e| UpdateError::io(op, e))
    }
}

impl DriverBinder for SysfsDriverBinder {
    fn unbind(&mut self) -> Result<()> {
        let address = self.address()?;
        let unbind = self.device_path.join("driver").join("unbind");
        if !unbind.exists() {
            debug!(%address, "no driver bound");
            return Ok(());
        }
        Self::write_attr(&unbind, &address)?;
        info!(%address, "driver unbound");
        Ok(())
    }

    fn bind(&mut self, driver: &str) -> Result<()> {
        let address = self.address()?;
        Self::write_attr(&self.drivers_root.join(driver).join("bind"), &address)?;
        info!(%address, driver, "driver bound");
        Ok(())
    }
}
