//! Novatek touchpad controller.
//!
//! The touchpad is programmed in place through the keyboard's vendor
//! interface. The controller erases itself when the interface is opened
//! and reports the erase result unprompted. Every 1 KiB block goes out as a
//! framed data report followed by a verification handshake, and three
//! closing handshakes confirm the program.
//!
//! The erase happens once per claim, so a failed transfer is never
//! restarted in place: rewriting blocks over programmed flash needs a fresh
//! erase, which only a new update run provides.

use std::num::NonZeroUsize;
use std::time::Duration;

use hostflash_engine::chunk::Chunk;
use hostflash_engine::device::{DeviceDescriptor, FirmwareDevice, TransportKind};
use hostflash_engine::image::FirmwareImage;
use hostflash_engine::transfer::{
    ChunkTransport, StatusQuery, TransferContext, TransferPlan, TransferReport, TransferSession, VerifyPolicy,
};
use hostflash_engine::transport::{ControlTransport, DEFAULT_CONTROL_TIMEOUT, UsbProvider};
use hostflash_errors::{Result, UpdateError};
use tracing::{debug, info, trace, warn};

use super::UsbLink;
use super::commands::{SHORT_REPORT_LEN, TouchpadCodes};
use crate::ids::{NOVATEK_RUNTIME_INTERFACE, is_novatek_touchpad};

/// [`ChunkTransport`] over the touchpad's framed block protocol.
pub struct TouchpadTransport<'t> {
    link: &'t mut dyn ControlTransport,
    codes: TouchpadCodes,
    timeout: Duration,
}

impl std::fmt::Debug for TouchpadTransport<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TouchpadTransport")
            .field("codes", &self.codes)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<'t> TouchpadTransport<'t> {
    /// A transport over a claimed vendor interface.
    pub fn new(link: &'t mut dyn ControlTransport, codes: TouchpadCodes) -> Self {
        Self {
            link,
            codes,
            timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }

    /// Per-transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn exchange(&mut self, command: u8) -> Result<[u8; SHORT_REPORT_LEN]> {
        if command != self.codes.ic_erase.command {
            let query = self.codes.status_query(command);
            self.link.send_report(&query, self.timeout)?;
        }
        let mut response = [0u8; SHORT_REPORT_LEN];
        self.link
            .receive_report(self.codes.command_report, &mut response, self.timeout)?;
        Ok(response)
    }
}

impl ChunkTransport for TouchpadTransport<'_> {
    fn begin_write(&mut self, total_len: usize) -> Result<()> {
        trace!(total_len, "touchpad write needs no start message");
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk<'_>) -> Result<()> {
        let offset = u16::try_from(chunk.offset()).map_err(|_| {
            UpdateError::out_of_bounds("touchpad block offset", chunk.offset(), chunk.len(), usize::from(u16::MAX))
        })?;
        let frame = self.codes.frame(offset, chunk.data());
        self.link.send_report(&frame, self.timeout)?;
        debug!(index = chunk.index(), offset, "frame written");
        Ok(())
    }

    fn query_status(&mut self, command: u8) -> Result<Option<u8>> {
        let response = match self.exchange(command) {
            Ok(response) => response,
            Err(e) => {
                trace!(command, error = %e, "no status response");
                return Ok(None);
            }
        };
        let [report_id, code, ..] = response;
        if report_id != self.codes.command_report {
            return Ok(None);
        }
        if self.codes.is_failure(code) {
            let name = self.codes.describe(code).unwrap_or_else(|| format!("{code:#04x}"));
            warn!(command, "controller reported {name}");
        }
        Ok(Some(code))
    }
}

/// A Novatek touchpad reached over USB.
pub struct NovatekTouchpad<U> {
    descriptor: DeviceDescriptor,
    link: UsbLink<U>,
    codes: TouchpadCodes,
}

impl<U> std::fmt::Debug for NovatekTouchpad<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NovatekTouchpad")
            .field("descriptor", &self.descriptor)
            .field("claimed", &self.link.transport.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "hidapi")]
impl NovatekTouchpad<hostflash_engine::transport::HidapiProvider> {
    /// A touchpad reached through the system HID library.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the HID library cannot be initialised.
    pub fn from_hidapi(descriptor: DeviceDescriptor) -> Result<Self> {
        let provider = hostflash_engine::transport::HidapiProvider::new(descriptor.vendor_id, descriptor.product_id)?;
        Ok(Self::new(descriptor, provider))
    }
}

impl<U: UsbProvider> NovatekTouchpad<U> {
    /// A touchpad whose interface is claimed through `provider`.
    pub fn new(descriptor: DeviceDescriptor, provider: U) -> Self {
        Self {
            descriptor,
            link: UsbLink::new(provider),
            codes: TouchpadCodes::default(),
        }
    }

    /// Replace the status code table.
    #[must_use]
    pub fn with_codes(mut self, codes: TouchpadCodes) -> Self {
        self.codes = codes;
        self
    }

    /// Override the per-transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.link.timeout = timeout;
        self
    }

    /// Status code table in use.
    pub fn codes(&self) -> &TouchpadCodes {
        &self.codes
    }

    fn plan(&self, ctx: &TransferContext) -> Result<TransferPlan> {
        let block = NonZeroUsize::new(self.codes.block_size)
            .ok_or_else(|| UpdateError::invalid_config("touchpad block size must be non-zero"))?;
        let c = &self.codes;
        Ok(TransferPlan::new(block)
            .with_chunk_delay(ctx.config.handshake.settle())
            .with_prepare(StatusQuery::new("ICERASE", c.ic_erase.command, c.ic_erase.pass))
            .with_chunk_ack(StatusQuery::new(
                "VERIFY1KDATA",
                c.verify_1k_data.command,
                c.verify_1k_data.pass,
            ))
            .with_finalize(StatusQuery::new("ENDPROGRAM", c.end_program.command, c.end_program.pass))
            .with_finalize(StatusQuery::new(
                "VERIFY_CHECKSUM",
                c.verify_checksum.command,
                c.verify_checksum.pass,
            ))
            .with_finalize(StatusQuery::new("PROGRAMPASS", c.program_pass.command, c.program_pass.pass))
            .with_verify(VerifyPolicy::Skip)
            .with_max_write_attempts(1))
    }
}

impl<U: UsbProvider> FirmwareDevice for NovatekTouchpad<U> {
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
        if !is_novatek_touchpad(vid, pid) {
            return Err(UpdateError::device_mismatch(format!(
                "{vid:04x}:{pid:04x} has no Novatek touchpad"
            )));
        }
        debug!(device = %self.descriptor.id, "probed");
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        self.link.claim(NOVATEK_RUNTIME_INTERFACE)
    }

    fn close(&mut self) -> Result<()> {
        self.link.release();
        Ok(())
    }

    fn write_firmware(&mut self, image: &FirmwareImage, ctx: &TransferContext) -> Result<TransferReport> {
        let want = self.codes.image_len;
        if image.len() < want {
            return Err(UpdateError::out_of_bounds("touchpad image", 0, want, image.len()));
        }
        let image = image.truncated(want);
        let plan = self.plan(ctx)?;
        info!(device = %self.descriptor.id, len = image.len(), "programming touchpad");
        let codes = self.codes;
        let timeout = self.link.timeout;
        let mut transport = TouchpadTransport::new(self.link.transport()?, codes).with_timeout(timeout);
        TransferSession::new(&plan, ctx).run(&mut transport, &image)
    }
}
