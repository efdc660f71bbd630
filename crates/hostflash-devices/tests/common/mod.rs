//! Device emulators shared by the driver test suites.
//!
//! Each emulator implements the device side of one protocol closely enough
//! for the drivers to run unmodified against it: the keyboard boot loader
//! stores blocks and serves them back, the touchpad controller checks frame
//! layout and answers status queries, and the BCM57xx model grants
//! arbitration and executes NVM commands.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hostflash_devices::bcm57xx::registers::{
    BAR_DEVICE, NVM_ACCESS, NVM_ADDR, NVM_COMMAND, NVM_READ, NVM_SOFTWARE_ARBITRATION, NVM_WRITE, arbitration,
    nvm_access, nvm_command,
};
use hostflash_devices::bcm57xx::{DriverBinder, PROTOCOL as BCM_PROTOCOL, registers};
use hostflash_devices::ids::BROADCOM_VENDOR_ID;
use hostflash_engine::cancel::CancellationToken;
use hostflash_engine::config::EngineConfig;
use hostflash_engine::device::{DeviceDescriptor, TransportKind};
use hostflash_engine::runner::ReplugWaiter;
use hostflash_errors::{Result, UpdateError};
use hostflash_test_helpers::prelude::*;
use parking_lot::{Mutex, MutexGuard};

/// Offset of the keyboard trailer the boot loader rewrites on its own.
pub const KEYBOARD_TRAILER: usize = 0x37FB;

/// Keyboard boot loader holding 14 KiB of flash. Clones share the flash,
/// so a test keeps one to inspect what the driver did.
#[derive(Debug, Clone)]
pub struct KeyboardFlash {
    inner: Arc<Mutex<FlashState>>,
}

/// Contents and command counters of a [`KeyboardFlash`].
#[derive(Debug)]
pub struct FlashState {
    pub flash: Vec<u8>,
    pub switches: u32,
    pub erases: u32,
    pub resets: u32,
    pub write_starts: Vec<usize>,
    pub read_starts: Vec<usize>,
    write_cursor: usize,
    read_cursor: usize,
    corrupt_at: Option<usize>,
}

impl KeyboardFlash {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FlashState {
                flash: vec![0xA5; 14 * 1024],
                switches: 0,
                erases: 0,
                resets: 0,
                write_starts: Vec::new(),
                read_starts: Vec::new(),
                write_cursor: 0,
                read_cursor: 0,
                corrupt_at: None,
            })),
        }
    }

    /// Flip the byte at `offset` in every read response covering it.
    pub fn corrupt_reads_at(self, offset: usize) -> Self {
        self.inner.lock().corrupt_at = Some(offset);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FlashState> {
        self.inner.lock()
    }
}

impl FlashState {
    fn program(&mut self, block: &[u8]) {
        let start = self.write_cursor;
        let end = (start + block.len()).min(self.flash.len());
        if let (Some(dst), Some(src)) = (self.flash.get_mut(start..end), block.get(..end.saturating_sub(start))) {
            dst.copy_from_slice(src);
        }
        // the boot loader relocates its own trailer bytes after programming
        if (start..end).contains(&KEYBOARD_TRAILER) {
            if let Some(trailer) = self.flash.get_mut(KEYBOARD_TRAILER..KEYBOARD_TRAILER + 3) {
                trailer.copy_from_slice(&[0x12, 0x34, 0x56]);
            }
        }
        self.write_cursor = start + block.len();
    }
}

impl ReportDevice for KeyboardFlash {
    fn set_report(&mut self, data: &[u8]) -> Result<()> {
        self.inner.lock().set_report(data)
    }

    fn get_report(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().get_report(report_id, buf)
    }
}

impl FlashState {
    fn set_report(&mut self, data: &[u8]) -> Result<()> {
        match data {
            [0x05, 0x75, ..] => self.switches += 1,
            [0x05, 0x45, 0x45, 0x45, 0x45, 0x45] => {
                self.flash.fill(0xFF);
                self.erases += 1;
            }
            [0x05, 0x55, 0x55, 0x55, 0x55, 0x55] => self.resets += 1,
            [0x05, 0x57, 0, 0, lo, hi] => {
                self.write_starts.push(usize::from(u16::from_le_bytes([*lo, *hi])));
                self.write_cursor = 0;
            }
            [0x05, 0x52, 0, 0, lo, hi] => {
                self.read_starts.push(usize::from(u16::from_le_bytes([*lo, *hi])));
                self.read_cursor = 0;
            }
            [0x06, 0x77, block @ ..] => {
                if block.len() != 2048 {
                    return Err(UpdateError::transport("write block", format!("{} data bytes", block.len())));
                }
                self.program(block);
            }
            other => {
                return Err(UpdateError::transport(
                    "set feature report",
                    format!("unexpected report {:02x?}", other.get(..2)),
                ));
            }
        }
        Ok(())
    }

    fn get_report(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize> {
        if report_id != 0x06 {
            return Err(UpdateError::transport("get feature report", format!("report {report_id}")));
        }
        let Some((head, body)) = buf.split_first_chunk_mut::<2>() else {
            return Ok(0);
        };
        *head = [0x06, 0x72];
        let start = self.read_cursor;
        for (i, byte) in body.iter_mut().enumerate() {
            let offset = start + i;
            *byte = self.flash.get(offset).copied().unwrap_or(0xFF);
            if self.corrupt_at == Some(offset) {
                *byte ^= 0xFF;
            }
        }
        self.read_cursor = start + body.len();
        Ok(buf.len())
    }
}

/// Touchpad controller answering status queries. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TouchpadController {
    inner: Arc<Mutex<TouchpadState>>,
}

/// Frames and queries received by a [`TouchpadController`].
#[derive(Debug, Default)]
pub struct TouchpadState {
    pub frames: Vec<(u16, Vec<u8>)>,
    pub queries: Vec<u8>,
    pending: Option<u8>,
    erase_reported: bool,
    verify_failures: u32,
    checksum_fails: bool,
    erase_fails: bool,
}

impl TouchpadController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report VERIFY1KDATA_FAIL for the next `n` block verifications.
    pub fn failing_verifications(self, n: u32) -> Self {
        self.inner.lock().verify_failures = n;
        self
    }

    /// Never pass the checksum verification.
    pub fn failing_checksum(self) -> Self {
        self.inner.lock().checksum_fails = true;
        self
    }

    /// Report ICERASE_FAIL.
    pub fn failing_erase(self) -> Self {
        self.inner.lock().erase_fails = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, TouchpadState> {
        self.inner.lock()
    }
}

impl TouchpadState {
    /// Programmed contents assembled from the received frames.
    pub fn memory(&self) -> Vec<u8> {
        let mut memory = Vec::new();
        for (offset, data) in &self.frames {
            let start = usize::from(*offset);
            if memory.len() < start + data.len() {
                memory.resize(start + data.len(), 0);
            }
            if let Some(dst) = memory.get_mut(start..start + data.len()) {
                dst.copy_from_slice(data);
            }
        }
        memory
    }
}

impl ReportDevice for TouchpadController {
    fn set_report(&mut self, data: &[u8]) -> Result<()> {
        self.inner.lock().set_report(data)
    }

    fn get_report(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().get_report(report_id, buf)
    }
}

impl TouchpadState {
    fn set_report(&mut self, data: &[u8]) -> Result<()> {
        match data {
            [0x05, 0xA1, command, 0, 0, 0] => {
                self.queries.push(*command);
                self.pending = Some(*command);
                Ok(())
            }
            frame if frame.len() == 1040 => {
                let (Some(head), Some(body), Some(tail)) = (frame.get(..8), frame.get(8..1032), frame.get(1032..))
                else {
                    return Err(UpdateError::transport("frame", "truncated"));
                };
                let [0x06, 0xD0, 0xCC, 0xCC, lo, hi, 0xCC, 0xCC] = *head else {
                    return Err(UpdateError::transport("frame", format!("bad header {head:02x?}")));
                };
                if tail != [0xEE, 0xD2, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC] {
                    return Err(UpdateError::transport("frame", format!("bad trailer {tail:02x?}")));
                }
                self.frames.push((u16::from_le_bytes([lo, hi]), body.to_vec()));
                Ok(())
            }
            other => Err(UpdateError::transport(
                "set feature report",
                format!("unexpected report of {} bytes", other.len()),
            )),
        }
    }

    fn get_report(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize> {
        if report_id != 0x05 {
            return Err(UpdateError::transport("get feature report", format!("report {report_id}")));
        }
        let code = match self.pending.take() {
            // the erase result is reported once, unprompted
            None if self.erase_reported => {
                return Err(UpdateError::transport("get feature report", "timed out"));
            }
            None => {
                self.erase_reported = true;
                if self.erase_fails { 0xD2 } else { 0xE2 }
            }
            Some(0xF4) if self.verify_failures > 0 => {
                self.verify_failures -= 1;
                0xD4
            }
            Some(0xF4) => 0xE4,
            Some(0xF7) => 0xE7,
            Some(0xF5) if self.checksum_fails => 0xD5,
            Some(0xF5) => 0xE5,
            Some(0xF6) => 0x00,
            Some(_) => 0xFB,
        };
        buf.fill(0);
        if let Some(head) = buf.get_mut(..2) {
            head.copy_from_slice(&[0x05, code]);
        }
        Ok(buf.len())
    }
}

/// Binder recording its calls into a shared log.
#[derive(Debug, Clone, Default)]
pub struct SharedBinder {
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl DriverBinder for SharedBinder {
    fn unbind(&mut self) -> Result<()> {
        self.calls.lock().push("unbind".to_owned());
        Ok(())
    }

    fn bind(&mut self, driver: &str) -> Result<()> {
        self.calls.lock().push(format!("bind {driver}"));
        Ok(())
    }
}

/// Replug waiter that returns at once and records what it was asked.
#[derive(Debug, Clone, Default)]
pub struct RecordingWaiter {
    pub waits: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl ReplugWaiter for RecordingWaiter {
    fn wait(&mut self, device_id: &str, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        cancel.check("waiting for re-enumeration")?;
        self.waits.lock().push((device_id.to_owned(), delay));
        Ok(())
    }
}

/// Engine settings with every sleep removed.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        transfer: fast_transfer_config(),
        ..EngineConfig::default()
    }
}

/// Descriptor of a BCM57xx NIC exposing all three BARs.
pub fn bcm_descriptor() -> DeviceDescriptor {
    DeviceDescriptor::new(
        "0000:03:00.0",
        BCM_PROTOCOL,
        TransportKind::Mmio {
            regions: registers::BARS.to_vec(),
        },
        BROADCOM_VENDOR_ID,
        0x1657,
    )
}

/// A BCM57xx register model with `size` bytes of NVM, and a handle onto
/// the NVM contents.
pub fn bcm_model(size: usize, grant: bool) -> (RegisterModel, Arc<Mutex<Vec<u8>>>) {
    build_bcm_model(size, grant, false)
}

/// A BCM57xx whose NVM engine accepts commands but never completes them.
pub fn stalled_bcm_model(size: usize) -> RegisterModel {
    build_bcm_model(size, true, true).0
}

fn build_bcm_model(size: usize, grant: bool, stalled: bool) -> (RegisterModel, Arc<Mutex<Vec<u8>>>) {
    let mut engine = NvmEngineBehavior::new(
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
    if stalled {
        engine = engine.stalled();
    }
    let storage = engine.storage();
    let mut arbiter = ArbitrationBehavior::new(
        BAR_DEVICE,
        NVM_SOFTWARE_ARBITRATION.offset,
        arbitration::REQ_SET1.bit(),
        arbitration::REQ_CLR1.bit(),
        arbitration::ARB_WON1.bit(),
    );
    if !grant {
        arbiter = arbiter.never_grant();
    }
    let model = RegisterModel::new(&[(0, 0x8000), (1, 0x20000), (2, 0x1000)])
        .with_behavior(arbiter)
        .with_behavior(AccessGateBehavior::new(
            (BAR_DEVICE, NVM_ACCESS.offset),
            nvm_access::ENABLE.bit(),
            BAR_DEVICE,
            0x7000..0x7020,
        ))
        .with_behavior(engine);
    (model, storage)
}
