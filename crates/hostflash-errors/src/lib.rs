//! Error kinds for the hostflash firmware update engine.
//!
//! Every failure the engine can surface maps to one [`UpdateError`] variant.
//! Callers that only need to branch on the failure class use
//! [`UpdateError::kind`], which returns a `Copy` [`ErrorKind`].
//!
//! # Modules
//!
//! - [`error`]: the [`UpdateError`] enum and its constructors
//! - [`kind`]: [`ErrorKind`] and [`ErrorSeverity`] classification
//! - [`verification`]: structured diagnostics for read-back and handshake failures
//!
//! # Example
//!
//! ```
//! use hostflash_errors::prelude::*;
//!
//! fn check_window(offset: usize, len: usize) -> Result<()> {
//!     if offset + 4 > len {
//!         return Err(UpdateError::out_of_bounds("BAR[0]", offset, 4, len));
//!     }
//!     Ok(())
//! }
//!
//! let err = check_window(0x100, 0x100).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::OutOfBounds);
//! assert!(err.is_defect());
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod kind;
pub mod prelude;
pub mod verification;

pub use error::UpdateError;
pub use kind::{ErrorKind, ErrorSeverity};
pub use verification::{ByteMismatch, HandshakeMismatch, ReadBackMismatch, VerificationFailure};

/// A specialized `Result` type for update engine operations.
pub type Result<T> = std::result::Result<T, UpdateError>;
