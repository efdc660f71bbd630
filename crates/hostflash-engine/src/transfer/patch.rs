//! Payload patching during the bulk write pass.

use crate::chunk::Chunk;

/// Alters chunks on their way to the device and names the ones that must be
/// re-sent unaltered afterwards.
pub trait PatchHook: Send + Sync {
    /// The chunk to send in place of `chunk` during the bulk pass.
    fn before<'a>(&self, chunk: Chunk<'a>) -> Chunk<'a>;

    /// Indices of chunks to re-send with their original payload after the
    /// bulk pass, each preceded by a fresh start message.
    fn restore_chunks(&self) -> &[usize];
}

/// Sends every chunk as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPatch;

impl PatchHook for NoPatch {
    fn before<'a>(&self, chunk: Chunk<'a>) -> Chunk<'a> {
        chunk
    }

    fn restore_chunks(&self) -> &[usize] {
        &[]
    }
}

/// Replaces the first byte of the image with a placeholder during the bulk
/// pass and writes chunk 0 again with the real byte once everything else is
/// on the device.
///
/// Some boot loaders treat a valid first byte as "image present" and will
/// boot a half-written image if the transfer is interrupted.
#[derive(Debug, Clone, Copy)]
pub struct FirstBytePatch {
    placeholder: u8,
}

impl FirstBytePatch {
    const RESTORE: [usize; 1] = [0];

    /// Patch with `placeholder` in place of the first byte.
    pub const fn new(placeholder: u8) -> Self {
        Self { placeholder }
    }

    /// Byte sent in place of the first byte during the bulk pass.
    pub fn placeholder(&self) -> u8 {
        self.placeholder
    }
}

impl Default for FirstBytePatch {
    fn default() -> Self {
        Self::new(0x00)
    }
}

impl PatchHook for FirstBytePatch {
    fn before<'a>(&self, chunk: Chunk<'a>) -> Chunk<'a> {
        if chunk.offset() != 0 || chunk.is_empty() {
            return chunk;
        }
        let mut data = chunk.data().to_vec();
        if let Some(first) = data.first_mut() {
            *first = self.placeholder;
        }
        chunk.with_payload(data)
    }

    fn restore_chunks(&self) -> &[usize] {
        &Self::RESTORE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_byte_patch_only_touches_offset_zero() {
        let data = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let patch = FirstBytePatch::default();

        let first = patch.before(Chunk::new(0, 0, &data[..2]));
        assert!(first.is_patched());
        assert_eq!(first.data(), &[0x00, 0xBB]);

        let second = patch.before(Chunk::new(1, 2, &data[2..]));
        assert!(!second.is_patched());
        assert_eq!(second.data(), &[0xCC, 0xDD]);
    }

    #[test]
    fn test_first_byte_patch_restores_chunk_zero() {
        assert_eq!(FirstBytePatch::new(0xFF).restore_chunks(), &[0]);
        assert!(NoPatch.restore_chunks().is_empty());
    }

    #[test]
    fn test_no_patch_passes_through() {
        let data = [1u8, 2, 3];
        let chunk = NoPatch.before(Chunk::new(0, 0, &data));
        assert!(!chunk.is_patched());
        assert_eq!(chunk.data(), &data);
    }
}
