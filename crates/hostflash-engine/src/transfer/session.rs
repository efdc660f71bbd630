//! Drives one image through a [`ChunkTransport`].

use std::thread;
use std::time::{Duration, Instant};

use hostflash_errors::{HandshakeMismatch, ReadBackMismatch, Result, UpdateError};
use tracing::{debug, error, info, trace, warn};

use super::{ChunkTransport, NoPatch, PatchHook, StatusQuery, TransferContext, TransferPlan, VerifyPolicy};
use crate::chunk::{Chunk, chunk_at, chunk_count};
use crate::image::FirmwareImage;
use crate::progress::{TransferPhase, TransferProgress};

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Image length in bytes
    pub total_bytes: usize,
    /// Chunks in the image
    pub chunks: usize,
    /// Chunk transactions sent, across all attempts
    pub chunks_sent: usize,
    /// Write-phase attempts used
    pub write_attempts: u32,
    /// Read-back attempts used, 0 when verification was skipped
    pub read_attempts: u32,
    /// Status handshakes passed
    pub handshakes: usize,
    /// Chunks re-sent unaltered after the bulk pass
    pub restored: usize,
    /// Whether the read-back comparison ran and passed
    pub verified: bool,
    /// Wall time of the whole transfer
    pub elapsed: Duration,
}

/// One transfer of one image.
///
/// The session holds the progress state (attempt counters, handshake and
/// chunk totals) and is consumed by [`TransferSession::run`].
pub struct TransferSession<'a> {
    plan: &'a TransferPlan,
    ctx: &'a TransferContext,
    patch: &'a dyn PatchHook,
    report: TransferReport,
}

impl std::fmt::Debug for TransferSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("plan", self.plan)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<'a> TransferSession<'a> {
    /// A session following `plan` under `ctx`, without payload patching.
    pub fn new(plan: &'a TransferPlan, ctx: &'a TransferContext) -> Self {
        Self {
            plan,
            ctx,
            patch: &NoPatch,
            report: TransferReport::default(),
        }
    }

    /// Patch payloads during the bulk pass.
    #[must_use]
    pub fn with_patch(mut self, patch: &'a dyn PatchHook) -> Self {
        self.patch = patch;
        self
    }

    /// Transfer `image`: write phase with retry, then read-back verification.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the context's token is set at a cancellation point
    /// - `TransportFailure` once the attempt bound of a phase is exhausted
    /// - `VerificationFailed` if a handshake never passes or the read-back
    ///   differs from the image
    pub fn run<T: ChunkTransport + ?Sized>(
        mut self,
        transport: &mut T,
        image: &FirmwareImage,
    ) -> Result<TransferReport> {
        let started = Instant::now();
        self.report.total_bytes = image.len();
        self.report.chunks = chunk_count(image.len(), self.plan.chunk_size());
        info!(
            bytes = image.len(),
            chunks = self.report.chunks,
            chunk_size = self.plan.chunk_size().get(),
            "starting transfer"
        );

        self.ctx.cancel.check("before write")?;
        for query in self.plan.prepare() {
            self.emit(TransferPhase::Prepare, 1, 0, image.len());
            self.handshake(transport, query)?;
        }

        self.write_phase(transport, image)?;

        if self.ctx.config.verify_readback && *self.plan.verify() != VerifyPolicy::Skip {
            self.verify_phase(transport, image)?;
            self.report.verified = true;
        } else {
            debug!("read-back verification skipped");
        }

        self.report.elapsed = started.elapsed();
        info!(
            write_attempts = self.report.write_attempts,
            read_attempts = self.report.read_attempts,
            verified = self.report.verified,
            elapsed_ms = u64::try_from(self.report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "transfer complete"
        );
        Ok(self.report)
    }

    fn write_phase<T: ChunkTransport + ?Sized>(&mut self, transport: &mut T, image: &FirmwareImage) -> Result<()> {
        let limit = self.plan.write_attempts(&self.ctx.config);
        let mut attempt = 1;
        loop {
            self.report.write_attempts = attempt;
            match self.write_once(transport, image, attempt) {
                Ok(restored) => {
                    self.report.restored = restored;
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < limit => {
                    warn!(attempt, limit, error = %e, "write phase failed, restarting");
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempt, error = %e, "write phase failed");
                    return Err(e);
                }
            }
        }
    }

    fn write_once<T: ChunkTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        image: &FirmwareImage,
        attempt: u32,
    ) -> Result<usize> {
        let total = image.len();
        let size = self.plan.chunk_size();
        let delay = self.plan.chunk_delay(&self.ctx.config);

        self.ctx.cancel.check(&format!("before write attempt {attempt}"))?;
        transport.begin_write(total)?;
        for chunk in image.chunks(size) {
            self.ctx.cancel.check(&format!("before chunk {}", chunk.index()))?;
            let end = chunk.end();
            let chunk = self.patch.before(chunk);
            self.send_chunk(transport, &chunk, delay)?;
            self.emit(TransferPhase::Write, attempt, end, total);
        }

        let mut restored = 0;
        for &index in self.patch.restore_chunks() {
            let Some(chunk) = chunk_at(image.as_bytes(), size, index) else {
                continue;
            };
            self.ctx.cancel.check(&format!("before restoring chunk {index}"))?;
            debug!(index, offset = chunk.offset(), "restoring patched chunk");
            transport.begin_write(total)?;
            let end = chunk.end();
            self.send_chunk(transport, &chunk, delay)?;
            restored += 1;
            self.emit(TransferPhase::Restore, attempt, end, total);
        }

        for query in self.plan.finalize() {
            self.ctx.cancel.check("before finalize")?;
            self.handshake(transport, query)?;
            self.emit(TransferPhase::Finalize, attempt, total, total);
        }
        Ok(restored)
    }

    fn send_chunk<T: ChunkTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        chunk: &Chunk<'_>,
        delay: Duration,
    ) -> Result<()> {
        trace!(index = chunk.index(), offset = chunk.offset(), len = chunk.len(), "chunk");
        transport.write_chunk(chunk)?;
        self.report.chunks_sent += 1;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(ack) = self.plan.chunk_ack() {
            self.handshake(transport, ack)?;
        }
        Ok(())
    }

    fn handshake<T: ChunkTransport + ?Sized>(&mut self, transport: &mut T, query: &StatusQuery) -> Result<()> {
        let settings = self.ctx.config.handshake;
        let limit = settings.attempts.max(1);
        let interval = settings.interval();
        let mut last = None;

        for n in 1..=limit {
            self.ctx.cancel.check(query.label)?;
            if !interval.is_zero() {
                thread::sleep(interval);
            }
            let status = transport.query_status(query.command)?;
            trace!(handshake = query.label, attempt = n, "status {status:02x?}");
            if status == Some(query.expected) {
                debug!(handshake = query.label, attempts = n, "handshake passed");
                self.report.handshakes += 1;
                return Ok(());
            }
            if status.is_some() {
                last = status;
            }
        }

        let mismatch = HandshakeMismatch {
            command: query.command,
            expected: query.expected,
            received: last,
            attempts: limit,
        };
        warn!(handshake = query.label, "{mismatch}");
        Err(UpdateError::handshake_mismatch(mismatch))
    }

    fn verify_phase<T: ChunkTransport + ?Sized>(&mut self, transport: &mut T, image: &FirmwareImage) -> Result<()> {
        let limit = self.ctx.config.read_attempts.max(1);
        let mut attempt = 1;
        let actual = loop {
            self.report.read_attempts = attempt;
            match self.read_once(transport, image, attempt) {
                Ok(buf) => break buf,
                Err(e) if e.is_retryable() && attempt < limit => {
                    warn!(attempt, limit, error = %e, "read-back failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempt, error = %e, "read-back failed");
                    return Err(e);
                }
            }
        };

        match ReadBackMismatch::compare(image.as_bytes(), &actual, self.plan.verify().excluded()) {
            None => {
                debug!(bytes = actual.len(), "read-back matches image");
                Ok(())
            }
            Some(mismatch) => {
                error!(
                    mismatches = mismatch.mismatch_count,
                    first = ?mismatch.first_offset(),
                    "read-back differs from image"
                );
                for sample in &mismatch.samples {
                    debug!("{sample}");
                }
                Err(UpdateError::read_back_mismatch(mismatch))
            }
        }
    }

    fn read_once<T: ChunkTransport + ?Sized>(
        &self,
        transport: &mut T,
        image: &FirmwareImage,
        attempt: u32,
    ) -> Result<Vec<u8>> {
        let total = image.len();
        let size = self.plan.chunk_size().get();

        self.ctx.cancel.check("before read-back")?;
        transport.begin_read(total)?;

        let mut buf = vec![0u8; total];
        let mut offset = 0usize;
        for block in buf.chunks_mut(size) {
            self.ctx.cancel.check(&format!("before reading offset {offset:#x}"))?;
            let want = block.len();
            let got = transport.read_chunk(offset, block)?;
            if got < want {
                return Err(UpdateError::transport(
                    format!("read back at {offset:#x}"),
                    format!("short read of {got} of {want} bytes"),
                ));
            }
            offset = offset.saturating_add(want);
            self.emit(TransferPhase::Verify, attempt, offset, total);
        }
        Ok(buf)
    }

    fn emit(&self, phase: TransferPhase, attempt: u32, bytes_done: usize, total_bytes: usize) {
        self.ctx.progress.emit(TransferProgress {
            phase,
            attempt,
            bytes_done,
            total_bytes,
        });
    }
}
