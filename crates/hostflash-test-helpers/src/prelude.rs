//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use hostflash_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_fail, must_some, must_with};
pub use crate::{assert_error_kind, assert_in_order, assert_monotonic};

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{chunk_size, fast_context, fast_transfer_config, pattern_image, seeded_image};

#[cfg(feature = "mock")]
pub use crate::mock::{
    AccessGateBehavior, ArbitrationBehavior, EchoDevice, Exchange, MemoryChunkDevice, NvmEngineBehavior,
    NvmEngineLayout, RegisterBehavior, RegisterModel, ReportDevice, ScriptedUsb,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
