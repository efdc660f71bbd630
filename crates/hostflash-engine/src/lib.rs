//! Host-side firmware update engine.
//!
//! This crate moves firmware images onto hardware whose update protocol is
//! driven from the host:
//! - Scoped acquire/release brackets that release on every exit path
//! - Bounds-checked, barrier-ordered 32-bit register access over mapped
//!   PCI windows
//! - Request/grant arbitration over shared device resources with a bounded
//!   deadline
//! - Chunked transfer with status handshakes, whole-phase retry, payload
//!   patch hooks and read-back verification
//! - A device lifecycle state machine and an update runner on top of it
//!
//! # Architecture
//!
//! - [`locker`]: scoped acquire/release
//! - [`registers`]: named bit-field layouts per device family
//! - [`mmio`]: mapped regions and their backends
//! - [`arbitration`]: hardware arbitration and access gating
//! - [`image`], [`chunk`]: firmware payloads and their chunking
//! - [`transfer`]: the chunk transfer protocol
//! - [`transport`]: USB control-transfer transports
//! - [`device`], [`lifecycle`]: the per-device contract and its state machine
//! - [`runner`]: end-to-end update sequencing
//! - [`config`], [`cancel`], [`progress`]: settings, cancellation and progress
//!
//! # Concurrency
//!
//! Every operation is synchronous and blocking. Run one update per worker
//! thread; regions and transport handles are owned by the device being
//! updated and are never shared between workers.
//!
//! # Example
//!
//! ```
//! use hostflash_engine::prelude::*;
//!
//! let image = FirmwareImage::from(vec![0u8; 4096]);
//! let size = std::num::NonZeroUsize::new(1024).ok_or("zero chunk size")?;
//! let offsets: Vec<usize> = image.chunks(size).map(|c| c.offset()).collect();
//! assert_eq!(offsets, [0, 1024, 2048, 3072]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod arbitration;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod device;
pub mod image;
pub mod lifecycle;
pub mod locker;
pub mod mmio;
pub mod prelude;
pub mod progress;
pub mod registers;
pub mod runner;
pub mod transfer;
pub mod transport;

pub use arbitration::{AccessGate, AccessMode, ArbitrationLock};
pub use cancel::CancellationToken;
pub use chunk::{Chunk, Chunks};
pub use config::{ArbitrationConfig, EngineConfig, HandshakeConfig, LifecycleConfig, TransferConfig};
pub use device::{DeviceDescriptor, FirmwareDevice, Reenumeration, TransportKind};
pub use image::FirmwareImage;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use locker::{Locker, ReleasePolicy, with_lock};
pub use mmio::{MappedRegion, MappedRegions, MemoryRegion, RegionIo, RegionProvider, SysfsPciProvider};
pub use progress::{ProgressSink, TransferPhase, TransferProgress};
pub use registers::{BitField, RegisterLayout, RegisterTable};
pub use runner::{ReplugWaiter, SleepWaiter, UpdateReport, UpdateRunner};
pub use transfer::{
    ChunkTransport, FirstBytePatch, NoPatch, PatchHook, StatusQuery, TransferContext, TransferPlan,
    TransferReport, TransferSession, VerifyPolicy,
};
pub use transport::{ControlTransport, UsbProvider};

pub use hostflash_errors::{ErrorKind, Result, UpdateError};
