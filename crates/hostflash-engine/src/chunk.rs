//! Bounded-size chunks of a firmware image.
//!
//! Chunking is lazy and restartable: chunk `i` is always
//! `data[i*size .. min((i+1)*size, len)]`, so any chunk can be regenerated
//! from its index without walking the ones before it.

use std::borrow::Cow;
use std::num::NonZeroUsize;

/// A contiguous slice of an image, the unit of transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    index: usize,
    offset: usize,
    data: Cow<'a, [u8]>,
}

impl<'a> Chunk<'a> {
    /// A chunk borrowing its payload from the image.
    pub fn new(index: usize, offset: usize, data: &'a [u8]) -> Self {
        Self {
            index,
            offset,
            data: Cow::Borrowed(data),
        }
    }

    /// Position in the chunk sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte offset of the chunk within the image.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte of the chunk.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.data.len())
    }

    /// Whether the payload has been replaced by a patched copy.
    pub fn is_patched(&self) -> bool {
        matches!(self.data, Cow::Owned(_))
    }

    /// The same chunk with a replacement payload.
    #[must_use]
    pub fn with_payload(self, data: Vec<u8>) -> Self {
        Self {
            data: Cow::Owned(data),
            ..self
        }
    }
}

/// Number of chunks of at most `size` bytes needed to cover `len` bytes.
pub fn chunk_count(len: usize, size: NonZeroUsize) -> usize {
    len.div_ceil(size.get())
}

/// Regenerate chunk `index` of `data`.
pub fn chunk_at(data: &[u8], size: NonZeroUsize, index: usize) -> Option<Chunk<'_>> {
    let offset = index.checked_mul(size.get())?;
    if offset >= data.len() {
        return None;
    }
    let end = offset.saturating_add(size.get()).min(data.len());
    data.get(offset..end)
        .map(|bytes| Chunk::new(index, offset, bytes))
}

/// Iterator over the chunks of a byte sequence, in ascending offset order.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    data: &'a [u8],
    size: NonZeroUsize,
    next: usize,
}

impl<'a> Chunks<'a> {
    /// Chunks of at most `size` bytes over `data`.
    pub fn new(data: &'a [u8], size: NonZeroUsize) -> Self {
        Self {
            data,
            size,
            next: 0,
        }
    }

    /// Maximum chunk size.
    pub fn chunk_size(&self) -> NonZeroUsize {
        self.size
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = chunk_at(self.data, self.size, self.next)?;
        self.next = self.next.saturating_add(1);
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = chunk_count(self.data.len(), self.size).saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

impl std::iter::FusedIterator for Chunks<'_> {}
