//! Immutable firmware payloads.

use std::num::NonZeroUsize;
use std::sync::Arc;

use hostflash_errors::{Result, UpdateError};

use crate::chunk::Chunks;

/// An immutable firmware byte sequence with its declared length.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Arc<[u8]>,
}

impl std::fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl FirmwareImage {
    /// Wrap image bytes whose length is the declared length.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Wrap image bytes supplied together with a declared length.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the byte count and the declared length disagree.
    pub fn with_declared_len(bytes: impl Into<Arc<[u8]>>, declared_len: usize) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() != declared_len {
            return Err(UpdateError::out_of_bounds(
                "firmware image",
                0,
                declared_len,
                bytes.len(),
            ));
        }
        Ok(Self { bytes })
    }

    /// Image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Fail unless the image fits a device buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` naming `target` when the image is larger than `capacity`.
    pub fn ensure_fits(&self, target: &str, capacity: usize) -> Result<()> {
        if self.len() > capacity {
            return Err(UpdateError::out_of_bounds(target, 0, self.len(), capacity));
        }
        Ok(())
    }

    /// The first `len` bytes as a new image, or a clone when already shorter.
    #[must_use]
    pub fn truncated(&self, len: usize) -> Self {
        match self.bytes.get(..len) {
            Some(prefix) if prefix.len() < self.bytes.len() => Self::new(prefix),
            _ => self.clone(),
        }
    }

    /// Lazily split the image into chunks of at most `size` bytes.
    pub fn chunks(&self, size: NonZeroUsize) -> Chunks<'_> {
        Chunks::new(&self.bytes, size)
    }
}

impl From<Vec<u8>> for FirmwareImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for FirmwareImage {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}
