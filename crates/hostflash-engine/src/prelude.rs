//! Convenience re-exports for driving an update

pub use crate::arbitration::{AccessGate, AccessMode, ArbitrationLock};
pub use crate::cancel::CancellationToken;
pub use crate::chunk::{Chunk, Chunks};
pub use crate::config::{EngineConfig, TransferConfig};
pub use crate::device::{DeviceDescriptor, FirmwareDevice, Reenumeration, TransportKind};
pub use crate::image::FirmwareImage;
pub use crate::lifecycle::{Lifecycle, LifecycleState};
pub use crate::locker::Locker;
pub use crate::mmio::{MappedRegions, RegionProvider};
pub use crate::progress::{ProgressSink, TransferPhase, TransferProgress};
pub use crate::registers::{BitField, RegisterLayout};
pub use crate::runner::{UpdateReport, UpdateRunner};
pub use crate::transfer::{
    ChunkTransport, FirstBytePatch, PatchHook, StatusQuery, TransferContext, TransferPlan,
    TransferReport, TransferSession, VerifyPolicy,
};
pub use crate::transport::{ControlTransport, UsbProvider};
pub use hostflash_errors::{ErrorKind, Result, UpdateError};
