//! Shared test utilities for hostflash.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`assertions`] - Assertion macros for error kinds and ordering
//! - [`mock`] - Register models, scripted control transports and an
//!   in-memory chunk device
//! - [`fixtures`] - Firmware image and configuration fixtures
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! hostflash-test-helpers = { workspace = true }
//! ```
//!
//! ```rust,ignore
//! use hostflash_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod assertions;
pub mod must;
pub mod prelude;

#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod mock;

#[cfg(feature = "fixtures")]
#[cfg_attr(docsrs, doc(cfg(feature = "fixtures")))]
pub mod fixtures;

pub use must::*;
