//! In-memory chunk transport with failure injection.

use std::collections::{BTreeMap, VecDeque};

use hostflash_engine::cancel::CancellationToken;
use hostflash_engine::chunk::Chunk;
use hostflash_engine::transfer::ChunkTransport;
use hostflash_errors::{Result, UpdateError};

/// One chunk as the device received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedChunk {
    /// Write-phase attempt, starting at 1 with the first start message
    pub attempt: u32,
    /// Chunk index
    pub index: usize,
    /// Image offset
    pub offset: usize,
    /// Payload as received
    pub data: Vec<u8>,
}

/// A device storing chunks in memory.
#[derive(Debug, Default)]
pub struct MemoryChunkDevice {
    memory: Vec<u8>,
    received: Vec<ReceivedChunk>,
    starts: u32,
    write_failures: BTreeMap<usize, u32>,
    read_failures: u32,
    corrupt: Option<usize>,
    statuses: VecDeque<Option<u8>>,
    idle_status: Option<u8>,
    status_queries: Vec<u8>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MemoryChunkDevice {
    /// An empty device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail chunk `index` the next `times` it is written.
    #[must_use]
    pub fn fail_chunk(mut self, index: usize, times: u32) -> Self {
        self.write_failures.insert(index, times);
        self
    }

    /// Fail the next `times` read-back requests.
    #[must_use]
    pub fn fail_reads(mut self, times: u32) -> Self {
        self.read_failures = times;
        self
    }

    /// Flip the stored byte at `offset` on every read-back.
    #[must_use]
    pub fn corrupt_at(mut self, offset: usize) -> Self {
        self.corrupt = Some(offset);
        self
    }

    /// Answer status queries with `script`, then with `idle`.
    #[must_use]
    pub fn with_statuses(mut self, script: impl IntoIterator<Item = Option<u8>>, idle: Option<u8>) -> Self {
        self.statuses = script.into_iter().collect();
        self.idle_status = idle;
        self
    }

    /// Cancel `token` once chunk `index` has been received.
    #[must_use]
    pub fn cancel_after(mut self, index: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((index, token));
        self
    }

    /// Device memory.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Every chunk received, in order.
    pub fn received(&self) -> &[ReceivedChunk] {
        &self.received
    }

    /// Chunks received during one write-phase attempt.
    pub fn received_in(&self, attempt: u32) -> Vec<&ReceivedChunk> {
        self.received.iter().filter(|c| c.attempt == attempt).collect()
    }

    /// Number of start messages seen.
    pub fn starts(&self) -> u32 {
        self.starts
    }

    /// Status commands queried, in order.
    pub fn status_queries(&self) -> &[u8] {
        &self.status_queries
    }
}

impl ChunkTransport for MemoryChunkDevice {
    fn begin_write(&mut self, total_len: usize) -> Result<()> {
        self.starts += 1;
        self.memory.resize(total_len, 0xFF);
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk<'_>) -> Result<()> {
        if let Some(left) = self.write_failures.get_mut(&chunk.index())
            && *left > 0
        {
            *left -= 1;
            return Err(UpdateError::transport(format!("write chunk {}", chunk.index()), "injected failure"));
        }
        let dst = self
            .memory
            .get_mut(chunk.offset()..chunk.end())
            .ok_or_else(|| UpdateError::out_of_bounds("device memory", chunk.offset(), chunk.len(), 0))?;
        dst.copy_from_slice(chunk.data());
        self.received.push(ReceivedChunk {
            attempt: self.starts,
            index: chunk.index(),
            offset: chunk.offset(),
            data: chunk.data().to_vec(),
        });
        if let Some((after, token)) = &self.cancel_after
            && *after == chunk.index()
        {
            token.cancel();
        }
        Ok(())
    }

    fn begin_read(&mut self, _total_len: usize) -> Result<()> {
        if self.read_failures > 0 {
            self.read_failures -= 1;
            return Err(UpdateError::transport("begin read", "injected failure"));
        }
        Ok(())
    }

    fn read_chunk(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let end = offset.saturating_add(buf.len());
        let src = self
            .memory
            .get(offset..end)
            .ok_or_else(|| UpdateError::out_of_bounds("device memory", offset, buf.len(), self.memory.len()))?;
        buf.copy_from_slice(src);
        if let Some(bad) = self.corrupt
            && (offset..end).contains(&bad)
            && let Some(b) = buf.get_mut(bad - offset)
        {
            *b ^= 0xFF;
        }
        Ok(buf.len())
    }

    fn query_status(&mut self, command: u8) -> Result<Option<u8>> {
        self.status_queries.push(command);
        Ok(self.statuses.pop_front().unwrap_or(self.idle_status))
    }
}
