//! Novatek keyboard controller.
//!
//! Update sequence:
//!
//! 1. detach: switch to the boot loader, which re-enumerates as
//!    `0603:1020` with the vendor reports on interface 0
//! 2. erase, then wait for the erase to finish
//! 3. write start message and 2048-byte blocks, first byte neutralised,
//!    then block 0 again with the real first byte
//! 4. read the flash back and compare everything below the trailer
//! 5. attach: reset into the application, which re-enumerates again

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use hostflash_engine::chunk::Chunk;
use hostflash_engine::device::{DeviceDescriptor, FirmwareDevice, Reenumeration, TransportKind};
use hostflash_engine::image::FirmwareImage;
use hostflash_engine::transfer::{
    ChunkTransport, FirstBytePatch, TransferContext, TransferPlan, TransferReport, TransferSession, VerifyPolicy,
};
use hostflash_engine::transport::{ControlTransport, DEFAULT_CONTROL_TIMEOUT, UsbProvider};
use hostflash_errors::{Result, UpdateError};
use tracing::{debug, info, warn};

use super::UsbLink;
use super::commands::NovatekCommands;
use crate::ids::{
    NOVATEK_BOOT_INTERFACE, NOVATEK_BOOT_VENDOR_ID, is_novatek_boot_loader, is_novatek_keyboard, product_ids,
};

/// Which firmware the keyboard is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardMode {
    /// Application firmware
    Runtime,
    /// Boot loader, accepting erase/write/read commands
    BootLoader,
}

/// [`ChunkTransport`] over the keyboard boot loader's block protocol.
pub struct KeyboardTransport<'t> {
    link: &'t mut dyn ControlTransport,
    commands: NovatekCommands,
    timeout: Duration,
    read_pause: Duration,
}

impl std::fmt::Debug for KeyboardTransport<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardTransport")
            .field("commands", &self.commands)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<'t> KeyboardTransport<'t> {
    /// A transport over a claimed boot-loader interface.
    pub fn new(link: &'t mut dyn ControlTransport, commands: NovatekCommands) -> Self {
        Self {
            link,
            commands,
            timeout: DEFAULT_CONTROL_TIMEOUT,
            read_pause: Duration::ZERO,
        }
    }

    /// Per-transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause after every block read.
    #[must_use]
    pub fn with_read_pause(mut self, pause: Duration) -> Self {
        self.read_pause = pause;
        self
    }

    fn length(&self, total_len: usize) -> Result<u16> {
        u16::try_from(total_len)
            .map_err(|_| UpdateError::out_of_bounds("keyboard transfer length", 0, total_len, usize::from(u16::MAX)))
    }
}

impl ChunkTransport for KeyboardTransport<'_> {
    fn begin_write(&mut self, total_len: usize) -> Result<()> {
        let report = self.commands.with_length(self.commands.write_start, self.length(total_len)?);
        self.link.send_report(&report, self.timeout)
    }

    fn write_chunk(&mut self, chunk: &Chunk<'_>) -> Result<()> {
        let block = self.commands.block_size;
        if chunk.len() > block {
            return Err(UpdateError::out_of_bounds("keyboard block", chunk.offset(), chunk.len(), block));
        }
        let mut report = Vec::with_capacity(2 + block);
        report.extend_from_slice(&[self.commands.data_report, self.commands.write_block]);
        report.extend_from_slice(chunk.data());
        report.resize(2 + block, 0xFF);
        self.link.send_report(&report, self.timeout)?;
        debug!(index = chunk.index(), offset = chunk.offset(), patched = chunk.is_patched(), "block written");
        Ok(())
    }

    fn begin_read(&mut self, total_len: usize) -> Result<()> {
        let report = self.commands.with_length(self.commands.read_start, self.length(total_len)?);
        self.link.send_report(&report, self.timeout)
    }

    fn read_chunk(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let mut report = vec![0u8; 2 + self.commands.block_size];
        if let Some(tag) = report.get_mut(1) {
            *tag = self.commands.read_block;
        }
        let n = self
            .link
            .receive_report(self.commands.data_report, &mut report, self.timeout)?;
        let got = n.saturating_sub(2).min(buf.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..got), report.get(2..2 + got)) {
            dst.copy_from_slice(src);
        }
        debug!(offset, got, "block read");
        if !self.read_pause.is_zero() {
            thread::sleep(self.read_pause);
        }
        Ok(got)
    }
}

/// A Novatek keyboard controller reached over USB.
pub struct NovatekKeyboard<U> {
    descriptor: DeviceDescriptor,
    link: UsbLink<U>,
    commands: NovatekCommands,
    mode: KeyboardMode,
    runtime_id: Option<(u16, u16)>,
}

impl<U> std::fmt::Debug for NovatekKeyboard<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NovatekKeyboard")
            .field("descriptor", &self.descriptor)
            .field("mode", &self.mode)
            .field("claimed", &self.link.transport.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "hidapi")]
impl NovatekKeyboard<hostflash_engine::transport::HidapiProvider> {
    /// A keyboard reached through the system HID library.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the HID library cannot be initialised.
    pub fn from_hidapi(descriptor: DeviceDescriptor) -> Result<Self> {
        let provider = hostflash_engine::transport::HidapiProvider::new(descriptor.vendor_id, descriptor.product_id)?;
        Ok(Self::new(descriptor, provider))
    }
}

impl<U: UsbProvider> NovatekKeyboard<U> {
    /// A keyboard whose interfaces are claimed through `provider`.
    pub fn new(descriptor: DeviceDescriptor, provider: U) -> Self {
        Self {
            descriptor,
            link: UsbLink::new(provider),
            commands: NovatekCommands::default(),
            mode: KeyboardMode::Runtime,
            runtime_id: None,
        }
    }

    /// Replace the command table.
    #[must_use]
    pub fn with_commands(mut self, commands: NovatekCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Override the per-transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.link.timeout = timeout;
        self
    }

    /// Current mode.
    pub fn mode(&self) -> KeyboardMode {
        self.mode
    }

    /// Command table in use.
    pub fn commands(&self) -> &NovatekCommands {
        &self.commands
    }

    fn interface(&self) -> u8 {
        match (self.mode, &self.descriptor.transport) {
            (KeyboardMode::BootLoader, _) => NOVATEK_BOOT_INTERFACE,
            (KeyboardMode::Runtime, TransportKind::Usb { interface }) => *interface,
            (KeyboardMode::Runtime, TransportKind::Mmio { .. }) => crate::ids::NOVATEK_RUNTIME_INTERFACE,
        }
    }
}

impl<U: UsbProvider> FirmwareDevice for NovatekKeyboard<U> {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn probe(&mut self) -> Result<()> {
        let (vid, pid) = (self.descriptor.vendor_id, self.descriptor.product_id);
        if !matches!(self.descriptor.transport, TransportKind::Usb { .. }) {
            return Err(UpdateError::device_mismatch(format!(
                "{} needs a USB interface, got {}",
                self.descriptor.id, self.descriptor.transport
            )));
        }
        if is_novatek_keyboard(vid, pid) {
            self.mode = KeyboardMode::Runtime;
            self.runtime_id = Some((vid, pid));
        } else if is_novatek_boot_loader(vid, pid) {
            self.mode = KeyboardMode::BootLoader;
            self.runtime_id = None;
        } else {
            return Err(UpdateError::device_mismatch(format!(
                "{vid:04x}:{pid:04x} is not a Novatek keyboard"
            )));
        }
        debug!(device = %self.descriptor.id, mode = ?self.mode, "probed");
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        self.link.claim(self.interface())
    }

    fn close(&mut self) -> Result<()> {
        self.link.release();
        Ok(())
    }

    fn detach(&mut self) -> Result<Reenumeration> {
        if self.mode == KeyboardMode::BootLoader {
            debug!(device = %self.descriptor.id, "already in boot loader");
            return Ok(Reenumeration::NotRequired);
        }
        let switch = self.commands.command(self.commands.switch_to_boot, [0; 4]);
        self.link.send(&switch)?;
        self.link.release();
        self.link.provider.select(NOVATEK_BOOT_VENDOR_ID, product_ids::BOOT_LOADER)?;
        self.mode = KeyboardMode::BootLoader;
        info!(device = %self.descriptor.id, "switched to boot loader");
        Ok(Reenumeration::Required { delay: None })
    }

    fn write_firmware(&mut self, image: &FirmwareImage, ctx: &TransferContext) -> Result<TransferReport> {
        if self.mode != KeyboardMode::BootLoader {
            return Err(UpdateError::unsupported("keyboard flash write outside the boot loader"));
        }
        image.ensure_fits("keyboard flash", self.commands.image_capacity)?;
        let block = NonZeroUsize::new(self.commands.block_size)
            .ok_or_else(|| UpdateError::invalid_config("keyboard block size must be non-zero"))?;

        self.link.send(&self.commands.repeated(self.commands.erase))?;
        info!(device = %self.descriptor.id, "flash erase issued");
        let erase_delay = self.commands.erase_delay();
        if !erase_delay.is_zero() {
            thread::sleep(erase_delay);
        }
        ctx.cancel.check("after erase")?;

        let plan = TransferPlan::new(block).with_verify(VerifyPolicy::ReadBackExcluding(
            self.commands.verify_limit..usize::MAX,
        ));
        let patch = FirstBytePatch::default();
        let commands = self.commands;
        let timeout = self.link.timeout;
        let mut transport = KeyboardTransport::new(self.link.transport()?, commands)
            .with_timeout(timeout)
            .with_read_pause(ctx.config.inter_chunk_delay());
        TransferSession::new(&plan, ctx).with_patch(&patch).run(&mut transport, image)
    }

    fn attach(&mut self) -> Result<Reenumeration> {
        if self.mode == KeyboardMode::Runtime {
            return Ok(Reenumeration::NotRequired);
        }
        self.link.send(&self.commands.repeated(self.commands.reset))?;
        self.link.release();
        self.mode = KeyboardMode::Runtime;
        info!(device = %self.descriptor.id, "reset into application");
        match self.runtime_id {
            Some((vid, pid)) => {
                self.link.provider.select(vid, pid)?;
                Ok(Reenumeration::Required { delay: None })
            }
            None => {
                warn!(device = %self.descriptor.id, "runtime identity unknown, not following re-enumeration");
                Ok(Reenumeration::NotRequired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hostflash_engine::lifecycle::Lifecycle;
    use hostflash_errors::ErrorKind;
    use hostflash_test_helpers::prelude::*;

    use super::*;
    use crate::novatek::keyboard_descriptor;

    fn keyboard(usb: &ScriptedUsb, product_id: u16) -> NovatekKeyboard<ScriptedUsb> {
        NovatekKeyboard::new(keyboard_descriptor("usb:1-2", product_id), usb.clone()).with_commands(NovatekCommands {
            erase_delay_ms: 0,
            ..NovatekCommands::default()
        })
    }

    #[test]
    fn test_probe_accepts_runtime_and_boot_ids() -> Result<()> {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut kb = keyboard(&usb, product_ids::KEYBOARD_TOUCHPAD);
        kb.probe()?;
        assert_eq!(kb.mode(), KeyboardMode::Runtime);

        let mut boot = NovatekKeyboard::new(
            DeviceDescriptor::new(
                "usb:1-2",
                crate::novatek::PROTOCOL,
                TransportKind::Usb { interface: 0 },
                NOVATEK_BOOT_VENDOR_ID,
                product_ids::BOOT_LOADER,
            ),
            usb,
        );
        boot.probe()?;
        assert_eq!(boot.mode(), KeyboardMode::BootLoader);
        Ok(())
    }

    #[test]
    fn test_probe_rejects_other_products() {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut kb = keyboard(&usb, 0x1234);
        assert_eq!(kb.probe().err().map(|e| e.kind()), Some(ErrorKind::DeviceMismatch));
    }

    #[test]
    fn test_detach_switches_identity_and_interface() -> Result<()> {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut kb = keyboard(&usb, product_ids::KEYBOARD);
        kb.probe()?;
        kb.open()?;
        assert_eq!(kb.detach()?, Reenumeration::Required { delay: None });
        kb.open()?;
        assert_eq!(usb.sent(), vec![vec![0x05, 0x75, 0, 0, 0, 0]]);
        assert_eq!(usb.selected(), vec![(0x0603, 0x1020)]);
        assert_eq!(usb.claims(), vec![1, 0]);
        Ok(())
    }

    #[test]
    fn test_oversized_image_is_out_of_bounds_before_erase() -> Result<()> {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut kb = keyboard(&usb, product_ids::KEYBOARD);
        let mut lc = Lifecycle::new(&mut kb);
        lc.probe()?;
        lc.open()?;
        lc.detach()?;
        lc.rebind()?;
        let sent_before = usb.sent().len();
        let err = lc.write_firmware(&pattern_image(14 * 1024 + 1), &fast_context()).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::OutOfBounds));
        assert_eq!(usb.sent().len(), sent_before);
        Ok(())
    }

    #[test]
    fn test_short_block_is_padded_to_block_size() -> Result<()> {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut link = usb.clone();
        let mut transport = KeyboardTransport::new(&mut link, NovatekCommands::default());
        transport.write_chunk(&Chunk::new(0, 0, &[1, 2, 3]))?;
        let sent = usb.sent();
        let block = sent.first().map(Vec::as_slice).unwrap_or_default();
        assert_eq!(block.len(), 2050);
        assert_eq!(block.get(..5), Some(&[0x06, 0x77, 1, 2, 3][..]));
        assert!(block.get(5..).is_some_and(|rest| rest.iter().all(|&b| b == 0xFF)));
        Ok(())
    }

    #[test]
    fn test_transfer_length_must_fit_sixteen_bits() {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut link = usb.clone();
        let mut transport = KeyboardTransport::new(&mut link, NovatekCommands::default());
        let err = transport.begin_write(0x1_0000).err().map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::OutOfBounds));
    }

    #[test]
    fn test_attach_from_runtime_is_noop() -> Result<()> {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut kb = keyboard(&usb, product_ids::KEYBOARD);
        kb.probe()?;
        assert_eq!(kb.attach()?, Reenumeration::NotRequired);
        assert!(usb.sent().is_empty());
        Ok(())
    }
}
