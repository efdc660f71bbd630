//! Prelude module for convenient error handling imports.
//!
//! # Example
//!
//! ```
//! use hostflash_errors::prelude::*;
//!
//! fn require_mapped(mapped: bool) -> Result<()> {
//!     if !mapped {
//!         return Err(UpdateError::not_mapped("BAR[1]"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_mapped(true).is_ok());
//! assert_eq!(
//!     require_mapped(false).map_err(|e| e.kind()),
//!     Err(ErrorKind::NotMapped)
//! );
//! ```

pub use crate::{
    ByteMismatch, ErrorKind, ErrorSeverity, HandshakeMismatch, ReadBackMismatch, Result,
    UpdateError, VerificationFailure,
};
