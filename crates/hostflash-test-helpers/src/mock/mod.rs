//! Mock implementations of the engine's hardware seams.
//!
//! - [`RegisterModel`]: mapped regions over a shared register file with
//!   pluggable device behaviour
//! - [`ScriptedUsb`]: USB provider and control transport forwarding to a
//!   [`ReportDevice`] emulator
//! - [`MemoryChunkDevice`]: chunk transport over host memory

mod chunk;
mod control;
mod registers;

pub use chunk::{MemoryChunkDevice, ReceivedChunk};
pub use control::{EchoDevice, Exchange, ReportDevice, ScriptedUsb};
pub use registers::{
    Access, AccessGateBehavior, AccessKind, ArbitrationBehavior, NvmEngineBehavior, NvmEngineLayout,
    RegisterBehavior, RegisterFile, RegisterModel,
};
