//! Firmware image and configuration fixtures.

use std::num::NonZeroUsize;

use hostflash_engine::config::{HandshakeConfig, TransferConfig};
use hostflash_engine::image::FirmwareImage;
use hostflash_engine::transfer::TransferContext;

/// An image of `len` bytes with no zero bytes, so a neutralised byte is
/// always visible.
pub fn pattern_image(len: usize) -> FirmwareImage {
    FirmwareImage::new((0..len).map(|i| (i % 251) as u8 + 1).collect::<Vec<u8>>())
}

/// A pseudo-random image of `len` bytes, reproducible from `seed`.
pub fn seeded_image(seed: u64, len: usize) -> FirmwareImage {
    let mut state = seed | 1;
    let bytes: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect();
    FirmwareImage::new(bytes)
}

/// A non-zero chunk size. Zero maps to one.
pub fn chunk_size(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

/// Transfer settings with every sleep removed and four handshake queries.
pub fn fast_transfer_config() -> TransferConfig {
    TransferConfig {
        inter_chunk_delay_ms: 0,
        handshake: HandshakeConfig {
            attempts: 4,
            interval_ms: 0,
            settle_ms: 0,
        },
        ..TransferConfig::default()
    }
}

/// A context around [`fast_transfer_config`].
pub fn fast_context() -> TransferContext {
    TransferContext::new(fast_transfer_config())
}
