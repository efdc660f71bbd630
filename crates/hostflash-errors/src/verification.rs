//! Structured diagnostics attached to verification failures.

use core::fmt;
use core::ops::Range;

/// One byte that differs between the source image and what was read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteMismatch {
    /// Offset into the image
    pub offset: usize,
    /// Byte in the source image
    pub expected: u8,
    /// Byte read back, `None` if the read-back was shorter than the image
    pub actual: Option<u8>,
}

impl fmt::Display for ByteMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(
                f,
                "0x{:04x}: expected 0x{:02x}, read 0x{:02x}",
                self.offset, self.expected, actual
            ),
            None => write!(
                f,
                "0x{:04x}: expected 0x{:02x}, read nothing",
                self.offset, self.expected
            ),
        }
    }
}

/// Result of a byte-for-byte comparison that found differences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBackMismatch {
    /// Number of bytes that took part in the comparison
    pub compared: usize,
    /// Number of differing bytes
    pub mismatch_count: usize,
    /// The first differing bytes, in ascending offset order
    pub samples: Vec<ByteMismatch>,
}

impl ReadBackMismatch {
    /// Maximum number of sample mismatches kept for diagnostics.
    pub const MAX_SAMPLES: usize = 16;

    /// Compare `expected` against `actual`, skipping offsets inside `excluded`.
    ///
    /// Returns `None` when every compared byte matches. Bytes missing from a
    /// short `actual` count as mismatches.
    pub fn compare(expected: &[u8], actual: &[u8], excluded: Option<Range<usize>>) -> Option<Self> {
        let mut compared = 0usize;
        let mut mismatch_count = 0usize;
        let mut samples = Vec::new();

        for (offset, &want) in expected.iter().enumerate() {
            if excluded.as_ref().is_some_and(|r| r.contains(&offset)) {
                continue;
            }
            compared += 1;
            let got = actual.get(offset).copied();
            if got == Some(want) {
                continue;
            }
            mismatch_count += 1;
            if samples.len() < Self::MAX_SAMPLES {
                samples.push(ByteMismatch {
                    offset,
                    expected: want,
                    actual: got,
                });
            }
        }

        if mismatch_count == 0 {
            None
        } else {
            Some(Self {
                compared,
                mismatch_count,
                samples,
            })
        }
    }

    /// Offset of the first differing byte.
    pub fn first_offset(&self) -> Option<usize> {
        self.samples.first().map(|m| m.offset)
    }

    /// Offsets of all sampled mismatches.
    pub fn offsets(&self) -> Vec<usize> {
        self.samples.iter().map(|m| m.offset).collect()
    }
}

impl fmt::Display for ReadBackMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} bytes differ",
            self.mismatch_count, self.compared
        )?;
        if let Some(first) = self.samples.first() {
            write!(f, ", first at {first}")?;
        }
        Ok(())
    }
}

/// A status handshake that never returned the expected code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeMismatch {
    /// Status command that was queried
    pub command: u8,
    /// Code that signals success
    pub expected: u8,
    /// Last code the device returned, `None` if no response was received
    pub received: Option<u8>,
    /// Number of queries made
    pub attempts: u32,
}

impl fmt::Display for HandshakeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.received {
            Some(code) => write!(
                f,
                "handshake 0x{:02x} expected 0x{:02x}, last received 0x{:02x} after {} attempts",
                self.command, self.expected, code, self.attempts
            ),
            None => write!(
                f,
                "handshake 0x{:02x} expected 0x{:02x}, no response after {} attempts",
                self.command, self.expected, self.attempts
            ),
        }
    }
}

/// Why verification failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The read-back pass found differing bytes
    ReadBack(ReadBackMismatch),
    /// A status handshake did not return its pass code
    Handshake(HandshakeMismatch),
}

impl VerificationFailure {
    /// First diverging image offset, for read-back failures.
    pub fn first_offset(&self) -> Option<usize> {
        match self {
            VerificationFailure::ReadBack(m) => m.first_offset(),
            VerificationFailure::Handshake(_) => None,
        }
    }
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationFailure::ReadBack(m) => write!(f, "read-back mismatch: {m}"),
            VerificationFailure::Handshake(m) => write!(f, "{m}"),
        }
    }
}
