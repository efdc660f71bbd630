//! Transfer progress events.

use std::fmt;

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Phase of a firmware transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferPhase {
    /// Waiting on status handshakes before data is sent
    Prepare,
    /// Sending chunks
    Write,
    /// Re-sending chunks whose payload was patched during the bulk pass
    Restore,
    /// Post-write status handshakes
    Finalize,
    /// Reading back and comparing
    Verify,
}

impl TransferPhase {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TransferPhase::Prepare => "prepare",
            TransferPhase::Write => "write",
            TransferPhase::Restore => "restore",
            TransferPhase::Finalize => "finalize",
            TransferPhase::Verify => "verify",
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Current phase
    pub phase: TransferPhase,
    /// Attempt number of the current phase, starting at 1
    pub attempt: u32,
    /// Bytes completed in this phase
    pub bytes_done: usize,
    /// Total bytes in this phase
    pub total_bytes: usize,
}

impl TransferProgress {
    /// Completion percentage, 100 for an empty phase.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = self.bytes_done.saturating_mul(100) / self.total_bytes;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

/// Optional progress sink; sending never blocks the transfer.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<Sender<TransferProgress>>,
}

impl ProgressSink {
    /// A sink that drops every event.
    pub fn none() -> Self {
        Self::default()
    }

    /// A sink feeding `tx`.
    pub fn channel(tx: Sender<TransferProgress>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Publish an event. A disconnected receiver is not an error.
    pub fn emit(&self, event: TransferProgress) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.try_send(event).is_err() {
            debug!(phase = %event.phase, "progress receiver unavailable, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let mut p = TransferProgress {
            phase: TransferPhase::Write,
            attempt: 1,
            bytes_done: 1024,
            total_bytes: 4096,
        };
        assert_eq!(p.percent(), 25);
        p.total_bytes = 0;
        assert_eq!(p.percent(), 100);
    }

    #[test]
    fn test_sink_delivers_and_tolerates_disconnect() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = ProgressSink::channel(tx);
        let event = TransferProgress {
            phase: TransferPhase::Verify,
            attempt: 2,
            bytes_done: 0,
            total_bytes: 10,
        };
        sink.emit(event);
        assert_eq!(rx.try_recv().ok(), Some(event));
        drop(rx);
        sink.emit(event);
    }
}
