//! Chunked firmware transfer with handshakes, retry and read-back.
//!
//! A transfer has up to five phases:
//!
//! 1. prepare: status handshakes the device must pass before data is sent,
//!    run once per transfer
//! 2. write: a start message declaring the total length, then every chunk in
//!    ascending offset order, each followed by a pause and an optional
//!    acknowledgement handshake
//! 3. restore: chunks whose payload a [`PatchHook`] altered during the bulk
//!    pass are sent again unaltered, each after a fresh start message
//! 4. finalize: post-write status handshakes
//! 5. verify: the written range is read back and compared byte for byte
//!
//! Phases 2 to 4 form the write phase, which is repeated from the start on
//! transport failure up to `write_attempts` times, or fewer when the plan
//! caps it for a device that cannot take the image twice. Prepare handshakes
//! are not repeated, since a device reports erase completion only once.
//! Verification is repeated up to `read_attempts` times on transport
//! failure. A handshake that never passes and a read-back mismatch are fatal.

mod patch;
mod session;

use std::num::NonZeroUsize;
use std::ops::Range;
use std::time::Duration;

use hostflash_errors::{Result, UpdateError};

use crate::cancel::CancellationToken;
use crate::chunk::Chunk;
use crate::config::{ArbitrationConfig, TransferConfig};
use crate::progress::ProgressSink;

pub use patch::{FirstBytePatch, NoPatch, PatchHook};
pub use session::{TransferReport, TransferSession};

/// The device side of a chunked transfer.
pub trait ChunkTransport {
    /// Send the start message declaring `total_len` bytes.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the message cannot be sent.
    fn begin_write(&mut self, total_len: usize) -> Result<()>;

    /// Send one chunk as a separate transport transaction.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the chunk cannot be sent.
    fn write_chunk(&mut self, chunk: &Chunk<'_>) -> Result<()>;

    /// Prepare to read back `total_len` bytes.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the request cannot be sent.
    fn begin_read(&mut self, total_len: usize) -> Result<()> {
        let _ = total_len;
        Ok(())
    }

    /// Read `buf.len()` bytes starting at image offset `offset`, returning
    /// the number of bytes read.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the read fails, `UnsupportedOperation` if the
    /// device cannot be read back.
    fn read_chunk(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let _ = (offset, buf);
        Err(UpdateError::unsupported("read-back"))
    }

    /// Query a status code. `Ok(None)` means the response was not a status
    /// report.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the query cannot be exchanged,
    /// `UnsupportedOperation` if the device has no status channel.
    fn query_status(&mut self, command: u8) -> Result<Option<u8>> {
        let _ = command;
        Err(UpdateError::unsupported("status query"))
    }
}

impl<T: ChunkTransport + ?Sized> ChunkTransport for &mut T {
    fn begin_write(&mut self, total_len: usize) -> Result<()> {
        (**self).begin_write(total_len)
    }

    fn write_chunk(&mut self, chunk: &Chunk<'_>) -> Result<()> {
        (**self).write_chunk(chunk)
    }

    fn begin_read(&mut self, total_len: usize) -> Result<()> {
        (**self).begin_read(total_len)
    }

    fn read_chunk(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        (**self).read_chunk(offset, buf)
    }

    fn query_status(&mut self, command: u8) -> Result<Option<u8>> {
        (**self).query_status(command)
    }
}

/// A status handshake: query `command` until the device reports `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusQuery {
    /// Name used in logs
    pub label: &'static str,
    /// Status type sent with the query
    pub command: u8,
    /// Code that signals success
    pub expected: u8,
}

impl StatusQuery {
    /// A handshake named `label`.
    pub const fn new(label: &'static str, command: u8, expected: u8) -> Self {
        Self {
            label,
            command,
            expected,
        }
    }
}

/// End-to-end verification after the write phase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// No read-back
    Skip,
    /// Read back the whole image and compare every byte
    #[default]
    ReadBack,
    /// Read back and compare everything outside the range
    ReadBackExcluding(Range<usize>),
}

impl VerifyPolicy {
    /// Range left out of the comparison.
    pub fn excluded(&self) -> Option<Range<usize>> {
        match self {
            VerifyPolicy::ReadBackExcluding(r) => Some(r.clone()),
            _ => None,
        }
    }
}

/// How a device wants an image transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    chunk_size: NonZeroUsize,
    chunk_delay: Option<Duration>,
    prepare: Vec<StatusQuery>,
    chunk_ack: Option<StatusQuery>,
    finalize: Vec<StatusQuery>,
    verify: VerifyPolicy,
    max_write_attempts: Option<u32>,
}

impl TransferPlan {
    /// A plan sending chunks of at most `chunk_size` bytes, verified by a
    /// full read-back.
    pub fn new(chunk_size: NonZeroUsize) -> Self {
        Self {
            chunk_size,
            chunk_delay: None,
            prepare: Vec::new(),
            chunk_ack: None,
            finalize: Vec::new(),
            verify: VerifyPolicy::ReadBack,
            max_write_attempts: None,
        }
    }

    /// Pause after each chunk, overriding the configured inter-chunk delay.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Add a handshake that must pass before the start message. Prepare
    /// handshakes run once, ahead of every write attempt.
    #[must_use]
    pub fn with_prepare(mut self, query: StatusQuery) -> Self {
        self.prepare.push(query);
        self
    }

    /// Acknowledge every chunk with a handshake.
    #[must_use]
    pub fn with_chunk_ack(mut self, query: StatusQuery) -> Self {
        self.chunk_ack = Some(query);
        self
    }

    /// Add a handshake that must pass after the last chunk.
    #[must_use]
    pub fn with_finalize(mut self, query: StatusQuery) -> Self {
        self.finalize.push(query);
        self
    }

    /// Set the verification policy.
    #[must_use]
    pub fn with_verify(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    /// Never run the write phase more than `limit` times, whatever the
    /// configuration allows.
    #[must_use]
    pub fn with_max_write_attempts(mut self, limit: u32) -> Self {
        self.max_write_attempts = Some(limit);
        self
    }

    /// Maximum chunk size.
    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Handshakes before the start message.
    pub fn prepare(&self) -> &[StatusQuery] {
        &self.prepare
    }

    /// Per-chunk acknowledgement.
    pub fn chunk_ack(&self) -> Option<&StatusQuery> {
        self.chunk_ack.as_ref()
    }

    /// Handshakes after the last chunk.
    pub fn finalize(&self) -> &[StatusQuery] {
        &self.finalize
    }

    /// Verification policy.
    pub fn verify(&self) -> &VerifyPolicy {
        &self.verify
    }

    fn chunk_delay(&self, config: &TransferConfig) -> Duration {
        self.chunk_delay.unwrap_or_else(|| config.inter_chunk_delay())
    }

    fn write_attempts(&self, config: &TransferConfig) -> u32 {
        let configured = config.write_attempts;
        self.max_write_attempts.map_or(configured, |cap| configured.min(cap)).max(1)
    }
}

/// Per-update context handed to a device's write operation.
#[derive(Debug, Clone, Default)]
pub struct TransferContext {
    /// Transfer settings
    pub config: TransferConfig,
    /// Arbitration settings for devices that lock a shared resource
    pub arbitration: ArbitrationConfig,
    /// Cancellation, observed between chunks and phases
    pub cancel: CancellationToken,
    /// Progress events
    pub progress: ProgressSink,
}

impl TransferContext {
    /// A context with the given settings and no progress sink.
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Use the given arbitration settings.
    #[must_use]
    pub fn with_arbitration(mut self, arbitration: ArbitrationConfig) -> Self {
        self.arbitration = arbitration;
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach a progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }
}
