//! Chunk transport over the BCM57xx NVM command engine.
//!
//! The engine moves one 32-bit word per command: program the address (and
//! the data word for writes), clear `Done`, issue `Doit`, then poll until
//! `Done` is set again. Data words travel big-endian, so the image bytes
//! land in NVM in their original order.
//!
//! Writes are bracketed per page by the engine's write-enable and
//! write-disable commands and carry `First`/`Last` markers on the first and
//! last word of each page.

use std::time::{Duration, Instant};

use hostflash_engine::chunk::Chunk;
use hostflash_engine::mmio::MappedRegions;
use hostflash_engine::transfer::ChunkTransport;
use hostflash_errors::{Result, UpdateError};
use tracing::{debug, trace};

use super::registers::{NVM_ADDR, NVM_COMMAND, NVM_READ, NVM_WRITE, nvm_command};

/// NVM page size in bytes.
pub const NVM_PAGE_SIZE: usize = 256;

/// Bytes moved per NVM command.
pub const NVM_WORD: usize = 4;

/// Default deadline for one NVM command to report `Done`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(100);

/// [`ChunkTransport`] driving the NVM engine through mapped registers.
///
/// The caller must hold the NVM arbitration lock with access enabled for
/// the lifetime of the transport.
#[derive(Debug)]
pub struct NvmTransport<'r> {
    regions: &'r mut MappedRegions,
    command_timeout: Duration,
    commands: u64,
}

impl<'r> NvmTransport<'r> {
    /// A transport over already mapped and unlocked registers.
    pub fn new(regions: &'r mut MappedRegions) -> Self {
        Self {
            regions,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            commands: 0,
        }
    }

    /// Override the per-command deadline.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Commands issued so far.
    pub fn commands(&self) -> u64 {
        self.commands
    }

    fn address(offset: usize) -> Result<u32> {
        u32::try_from(offset).map_err(|_| UpdateError::out_of_bounds("NVM", offset, NVM_WORD, u32::MAX as usize))
    }

    /// Issue one command and wait for `Done`.
    fn execute(&mut self, command: u32) -> Result<()> {
        self.regions.write_reg(&NVM_COMMAND, nvm_command::DONE.bit())?;
        self.regions.write_reg(&NVM_COMMAND, command | nvm_command::DOIT.bit())?;
        self.commands = self.commands.saturating_add(1);

        let started = Instant::now();
        loop {
            let status = self.regions.read_reg(&NVM_COMMAND)?;
            if nvm_command::DONE.is_set(status) {
                return Ok(());
            }
            if started.elapsed() > self.command_timeout {
                return Err(UpdateError::timeout(
                    format!("NVM command {}", NVM_COMMAND.decode(command)),
                    self.command_timeout,
                ));
            }
            std::hint::spin_loop();
        }
    }

    fn write_word(&mut self, offset: usize, word: [u8; NVM_WORD], markers: u32) -> Result<()> {
        trace!(offset, "nvm write word");
        self.regions.write_reg(&NVM_WRITE, u32::from_be_bytes(word))?;
        self.regions.write_reg(&NVM_ADDR, Self::address(offset)?)?;
        self.execute(nvm_command::WR.bit() | markers)
    }

    fn read_word(&mut self, offset: usize) -> Result<[u8; NVM_WORD]> {
        self.regions.write_reg(&NVM_ADDR, Self::address(offset)?)?;
        self.execute(nvm_command::FIRST.bit() | nvm_command::LAST.bit())?;
        Ok(self.regions.read_reg(&NVM_READ)?.to_be_bytes())
    }

    /// Write `data` starting at `offset`, padding a short trailing word with
    /// erased bytes.
    fn write_span(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let words = data.chunks(NVM_WORD);
        let count = words.len();
        for (i, bytes) in words.enumerate() {
            let at = offset + i * NVM_WORD;
            let mut markers = 0;
            if i == 0 || at % NVM_PAGE_SIZE == 0 {
                markers |= nvm_command::FIRST.bit();
            }
            if i + 1 == count || (at + NVM_WORD) % NVM_PAGE_SIZE == 0 {
                markers |= nvm_command::LAST.bit();
            }
            let mut word = [0xFF; NVM_WORD];
            if let Some(dst) = word.get_mut(..bytes.len()) {
                dst.copy_from_slice(bytes);
            }
            self.write_word(at, word, markers)?;
        }
        Ok(())
    }
}

impl ChunkTransport for NvmTransport<'_> {
    fn begin_write(&mut self, total_len: usize) -> Result<()> {
        Self::address(total_len)?;
        debug!(total_len, "nvm write start");
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk<'_>) -> Result<()> {
        if chunk.offset() % NVM_WORD != 0 {
            return Err(UpdateError::out_of_bounds("NVM", chunk.offset(), chunk.len(), NVM_WORD));
        }
        self.execute(nvm_command::WRITE_ENABLE_COMMAND.bit())?;
        let written = self.write_span(chunk.offset(), chunk.data());
        let disabled = self.execute(nvm_command::WRITE_DISABLE_COMMAND.bit());
        written.and(disabled)?;
        debug!(index = chunk.index(), offset = chunk.offset(), len = chunk.len(), "nvm chunk written");
        Ok(())
    }

    fn read_chunk(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        if offset % NVM_WORD != 0 {
            return Err(UpdateError::out_of_bounds("NVM", offset, buf.len(), NVM_WORD));
        }
        for (i, dst) in buf.chunks_mut(NVM_WORD).enumerate() {
            let word = self.read_word(offset + i * NVM_WORD)?;
            if let Some(src) = word.get(..dst.len()) {
                dst.copy_from_slice(src);
            }
        }
        Ok(buf.len())
    }
}
