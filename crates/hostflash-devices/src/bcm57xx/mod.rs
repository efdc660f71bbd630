//! Broadcom BCM57xx NIC updated through memory-mapped NVM registers.
//!
//! The NVM is shared between the host driver and the on-board APE
//! management processor. Every NVM operation therefore runs inside the
//! software arbitration lock (requester slot 1) with NVM access enabled:
//!
//! ```text
//! acquire lock #1 -> enable NVM access -> NVM commands -> disable -> release
//! ```
//!
//! While updating, the `tg3` kernel driver is unbound so that it does not
//! touch the NVM engine.

mod binder;
mod nvm;
pub mod registers;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use hostflash_engine::arbitration::{AccessGate, AccessMode, ArbitrationLock};
use hostflash_engine::device::{DeviceDescriptor, FirmwareDevice, Reenumeration, TransportKind};
use hostflash_engine::image::FirmwareImage;
use hostflash_engine::mmio::{MappedRegions, RegionProvider, SysfsPciProvider};
use hostflash_engine::transfer::{TransferContext, TransferPlan, TransferReport, TransferSession};
use hostflash_errors::{Result, UpdateError};
use tracing::{debug, info};

use crate::ids::BROADCOM_VENDOR_ID;

pub use binder::{DriverBinder, SysfsDriverBinder, TG3_DRIVER};
pub use nvm::{DEFAULT_COMMAND_TIMEOUT, NVM_PAGE_SIZE, NVM_WORD, NvmTransport};

use registers::{APE_MODE, BAR_APE, BAR_DEVICE, NVM_ACCESS, NVM_SOFTWARE_ARBITRATION, VENDOR_DEVICE_ID};
use registers::{ape_mode, arbitration, nvm_access};

/// Protocol string reported for BCM57xx devices.
pub const PROTOCOL: &str = "com.broadcom.bcm57xx";

/// Software arbitration slot owned by the host driver.
pub const NVM_LOCK: ArbitrationLock = ArbitrationLock::new(
    NVM_SOFTWARE_ARBITRATION,
    arbitration::REQ_SET1,
    arbitration::REQ_CLR1,
    arbitration::ARB_WON1,
);

/// NVM access enable bits.
pub const NVM_GATE: AccessGate = AccessGate::new(NVM_ACCESS, nvm_access::ENABLE, nvm_access::WRITE_ENABLE);

/// A BCM57xx NIC reached through mapped PCI BARs.
pub struct Bcm57xxDevice<P, B = SysfsDriverBinder> {
    descriptor: DeviceDescriptor,
    provider: P,
    binder: B,
    regions: MappedRegions,
    lock: ArbitrationLock,
    command_timeout: Duration,
}

impl<P, B> std::fmt::Debug for Bcm57xxDevice<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bcm57xxDevice")
            .field("descriptor", &self.descriptor)
            .field("regions", &self.regions)
            .field("lock_timeout", &self.lock.timeout())
            .finish_non_exhaustive()
    }
}

impl Bcm57xxDevice<SysfsPciProvider, SysfsDriverBinder> {
    /// A device at a sysfs PCI directory, mapping its resource files and
    /// binding drivers through sysfs.
    pub fn from_sysfs(descriptor: DeviceDescriptor, sysfs_path: impl Into<PathBuf>) -> Self {
        let path = sysfs_path.into();
        Self::new(
            descriptor,
            SysfsPciProvider::new(path.clone()),
            SysfsDriverBinder::new(path),
        )
    }
}

impl<P: RegionProvider, B: DriverBinder> Bcm57xxDevice<P, B> {
    /// A device mapping its BARs from `provider`.
    pub fn new(descriptor: DeviceDescriptor, provider: P, binder: B) -> Self {
        Self {
            descriptor,
            provider,
            binder,
            regions: MappedRegions::new(),
            lock: NVM_LOCK,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Override the per-command NVM deadline.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Currently mapped windows.
    pub fn regions(&self) -> &MappedRegions {
        &self.regions
    }

    /// The driver binder.
    pub fn binder(&self) -> &B {
        &self.binder
    }

    fn bars(&self) -> &[usize] {
        match &self.descriptor.transport {
            TransportKind::Mmio { regions } => regions.as_slice(),
            TransportKind::Usb { .. } => &[],
        }
    }
}

impl<P: RegionProvider, B: DriverBinder> FirmwareDevice for Bcm57xxDevice<P, B> {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn probe(&mut self) -> Result<()> {
        if self.descriptor.vendor_id != BROADCOM_VENDOR_ID {
            return Err(UpdateError::device_mismatch(format!(
                "vendor {:04x} is not Broadcom",
                self.descriptor.vendor_id
            )));
        }
        if !matches!(self.descriptor.transport, TransportKind::Mmio { .. }) {
            return Err(UpdateError::device_mismatch(format!(
                "{} needs memory-mapped access, got {}",
                self.descriptor.id, self.descriptor.transport
            )));
        }
        for bar in [BAR_DEVICE, BAR_APE] {
            if !self.bars().contains(&bar) {
                return Err(UpdateError::device_mismatch(format!(
                    "{} does not expose BAR[{bar}]",
                    self.descriptor.id
                )));
            }
        }
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let bars = self.bars().to_vec();
        self.regions = MappedRegions::open(&mut self.provider, &bars)?;
        let id = self.regions.read_reg(&VENDOR_DEVICE_ID)?;
        debug!(device = %self.descriptor.id, "mapped {} BARs, id {id:#010x}", bars.len());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.regions.close();
        Ok(())
    }

    fn detach(&mut self) -> Result<Reenumeration> {
        self.binder.unbind()?;
        Ok(Reenumeration::NotRequired)
    }

    fn write_firmware(&mut self, image: &FirmwareImage, ctx: &TransferContext) -> Result<TransferReport> {
        let page = NonZeroUsize::new(NVM_PAGE_SIZE).unwrap_or(NonZeroUsize::MIN);
        let chunk_size = ctx.config.chunk_size_or(page);
        if chunk_size.get() % NVM_WORD != 0 {
            return Err(UpdateError::invalid_config(format!(
                "NVM chunk size {chunk_size} is not a multiple of {NVM_WORD}"
            )));
        }
        let plan = TransferPlan::new(chunk_size).with_chunk_delay(Duration::ZERO);
        // kept for activate, which runs without a transfer context
        self.lock = self.lock.with_timeout(ctx.arbitration.timeout());
        let command_timeout = self.command_timeout;
        self.lock
            .hold_with_access(&NVM_GATE, AccessMode::ReadWrite, &mut self.regions, |regions| {
                let mut nvm = NvmTransport::new(regions).with_command_timeout(command_timeout);
                TransferSession::new(&plan, ctx).run(&mut nvm, image)
            })
    }

    fn attach(&mut self) -> Result<Reenumeration> {
        self.binder.bind(TG3_DRIVER)?;
        Ok(Reenumeration::NotRequired)
    }

    fn activate(&mut self) -> Result<()> {
        self.lock
            .hold_with_access(&NVM_GATE, AccessMode::ReadOnly, &mut self.regions, |regions| {
                regions.write_reg(&APE_MODE, ape_mode::HALT.bit())?;
                regions.write_reg(&APE_MODE, ape_mode::RESET.bit())
            })?;
        info!(device = %self.descriptor.id, "APE restarted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hostflash_engine::lifecycle::{Lifecycle, LifecycleState};
    use hostflash_errors::ErrorKind;
    use hostflash_test_helpers::prelude::*;

    use super::*;
    use registers::{NVM_ADDR, NVM_COMMAND, NVM_READ, NVM_WRITE, nvm_command};

    #[derive(Debug, Default)]
    struct RecordingBinder {
        calls: Vec<String>,
    }

    impl DriverBinder for RecordingBinder {
        fn unbind(&mut self) -> Result<()> {
            self.calls.push("unbind".to_owned());
            Ok(())
        }

        fn bind(&mut self, driver: &str) -> Result<()> {
            self.calls.push(format!("bind {driver}"));
            Ok(())
        }
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new(
            "0000:01:00.0",
            PROTOCOL,
            TransportKind::Mmio {
                regions: registers::BARS.to_vec(),
            },
            BROADCOM_VENDOR_ID,
            0x1657,
        )
    }

    fn nvm_model(size: usize) -> (RegisterModel, std::sync::Arc<parking_lot::Mutex<Vec<u8>>>) {
        let engine = NvmEngineBehavior::new(
            NvmEngineLayout {
                region: BAR_DEVICE,
                command: NVM_COMMAND.offset,
                address: NVM_ADDR.offset,
                read_data: NVM_READ.offset,
                write_data: NVM_WRITE.offset,
                doit: nvm_command::DOIT.bit(),
                write: nvm_command::WR.bit(),
                done: nvm_command::DONE.bit(),
            },
            size,
        );
        let storage = engine.storage();
        let model = RegisterModel::new(&[(0, 0x8000), (1, 0x20000), (2, 0x1000)])
            .with_behavior(ArbitrationBehavior::new(
                BAR_DEVICE,
                NVM_SOFTWARE_ARBITRATION.offset,
                arbitration::REQ_SET1.bit(),
                arbitration::REQ_CLR1.bit(),
                arbitration::ARB_WON1.bit(),
            ))
            .with_behavior(AccessGateBehavior::new(
                (BAR_DEVICE, NVM_ACCESS.offset),
                nvm_access::ENABLE.bit(),
                BAR_DEVICE,
                0x7000..0x7020,
            ))
            .with_behavior(engine);
        (model, storage)
    }

    #[test]
    fn test_probe_rejects_foreign_vendor() {
        let mut d = descriptor();
        d.vendor_id = 0x8086;
        let mut dev = Bcm57xxDevice::new(d, RegisterModel::new(&[]), RecordingBinder::default());
        assert_eq!(dev.probe().err().map(|e| e.kind()), Some(ErrorKind::DeviceMismatch));
    }

    #[test]
    fn test_probe_rejects_usb_transport() {
        let mut d = descriptor();
        d.transport = TransportKind::Usb { interface: 0 };
        let mut dev = Bcm57xxDevice::new(d, RegisterModel::new(&[]), RecordingBinder::default());
        assert_eq!(dev.probe().err().map(|e| e.kind()), Some(ErrorKind::DeviceMismatch));
    }

    #[test]
    fn test_open_maps_three_bars_and_close_unmaps() -> Result<()> {
        let (model, _) = nvm_model(16);
        let mut dev = Bcm57xxDevice::new(descriptor(), model.clone(), RecordingBinder::default());
        dev.probe()?;
        dev.open()?;
        assert_eq!(model.mapped(), vec![0, 1, 2]);
        dev.close()?;
        assert!(model.mapped().is_empty());
        dev.close()?;
        Ok(())
    }

    #[test]
    fn test_open_failure_unmaps_earlier_bars() {
        let (model, _) = nvm_model(16);
        let model = model.failing_map(2);
        let mut dev = Bcm57xxDevice::new(descriptor(), model.clone(), RecordingBinder::default());
        assert_eq!(dev.open().err().map(|e| e.kind()), Some(ErrorKind::TransportFailure));
        assert!(model.mapped().is_empty());
    }

    #[test]
    fn test_write_firmware_programs_nvm() -> Result<()> {
        let (model, storage) = nvm_model(1024);
        let mut dev = Bcm57xxDevice::new(descriptor(), model.clone(), RecordingBinder::default());
        dev.open()?;
        let image = pattern_image(600);
        let report = dev.write_firmware(&image, &fast_context())?;
        assert!(report.verified);
        assert_eq!(report.chunks, 3);
        assert_eq!(storage.lock().get(..600), Some(image.as_bytes()));
        assert_eq!(model.peek(BAR_DEVICE, NVM_ACCESS.offset) & 0x3, 0);
        assert!(!arbitration::ARB_WON1.is_set(model.peek(BAR_DEVICE, NVM_SOFTWARE_ARBITRATION.offset)));
        Ok(())
    }

    #[test]
    fn test_write_honours_configured_arbitration_timeout() -> Result<()> {
        let model = RegisterModel::new(&[(0, 0x8000), (1, 0x20000), (2, 0x1000)]);
        let mut dev = Bcm57xxDevice::new(descriptor(), model.clone(), RecordingBinder::default());
        dev.open()?;
        let ctx = fast_context().with_arbitration(hostflash_engine::config::ArbitrationConfig { timeout_ms: 3 });

        let started = std::time::Instant::now();
        let err = dev.write_firmware(&pattern_image(16), &ctx).err();

        assert_eq!(err.as_ref().map(|e| e.kind()), Some(ErrorKind::Timeout));
        assert_eq!(
            err.map(|e| e.to_string()),
            Some("Timed out after 3ms: acquire arbitration ArbWon1".to_owned())
        );
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(dev.lock.timeout(), Duration::from_millis(3));
        assert!(model.writes_to(BAR_DEVICE, NVM_ACCESS.offset).is_empty());
        Ok(())
    }

    #[test]
    fn test_odd_chunk_size_is_invalid_config() -> Result<()> {
        let (model, _) = nvm_model(64);
        let mut dev = Bcm57xxDevice::new(descriptor(), model, RecordingBinder::default());
        dev.open()?;
        let mut ctx = fast_context();
        ctx.config.chunk_size = Some(6);
        let err = dev.write_firmware(&pattern_image(12), &ctx).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidConfig));
        Ok(())
    }

    #[test]
    fn test_activate_halts_then_resets_ape() -> Result<()> {
        let (model, _) = nvm_model(16);
        let mut dev = Bcm57xxDevice::new(descriptor(), model.clone(), RecordingBinder::default());
        dev.open()?;
        dev.activate()?;
        assert_eq!(
            model.writes_to(BAR_APE, APE_MODE.offset),
            vec![ape_mode::HALT.bit(), ape_mode::RESET.bit()]
        );
        let access = model.writes_to(BAR_DEVICE, NVM_ACCESS.offset);
        assert_eq!(access.first().copied(), Some(nvm_access::ENABLE.bit()));
        Ok(())
    }

    #[test]
    fn test_lifecycle_binds_driver_around_write() -> Result<()> {
        let (model, _) = nvm_model(256);
        let mut dev = Bcm57xxDevice::new(descriptor(), model, RecordingBinder::default());
        {
            let mut lc = Lifecycle::new(&mut dev);
            lc.probe()?;
            lc.open()?;
            lc.detach()?;
            lc.write_firmware(&pattern_image(64), &fast_context())?;
            lc.attach()?;
            lc.activate()?;
            assert_eq!(lc.state(), LifecycleState::Activated);
            lc.close()?;
        }
        assert_eq!(dev.binder().calls, vec!["unbind".to_owned(), "bind tg3".to_owned()]);
        Ok(())
    }
}
