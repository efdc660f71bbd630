//! The update engine error type.

use std::time::Duration;

use crate::kind::{ErrorKind, ErrorSeverity};
use crate::verification::{HandshakeMismatch, ReadBackMismatch, VerificationFailure};

/// Errors that can occur while updating a device.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Register access on a region whose mapping is absent
    #[error("{target} is not mapped")]
    NotMapped {
        /// Region name, e.g. `BAR[0]`
        target: String,
    },

    /// Access outside a region or device buffer
    #[error("Access of {width} bytes at offset {offset:#x} exceeds {target} of {len:#x} bytes")]
    OutOfBounds {
        /// Region or buffer name
        target: String,
        /// Offset of the access
        offset: usize,
        /// Width of the access in bytes
        width: usize,
        /// Length of the region or buffer
        len: usize,
    },

    /// A bounded deadline expired
    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// The deadline in milliseconds
        timeout_ms: u64,
    },

    /// Control transfer or mapping failure
    #[error("Transport failure during {operation}: {message}")]
    TransportFailure {
        /// Operation in progress
        operation: String,
        /// Failure detail from the transport
        message: String,
    },

    /// Read-back mismatch or handshake code mismatch
    #[error("Verification failed: {0}")]
    VerificationFailed(Box<VerificationFailure>),

    /// The platform or device lacks a required capability
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The caller cancelled the update
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A lifecycle operation was requested from a state that does not allow it
    #[error("Cannot {operation} while device is {state}")]
    InvalidTransition {
        /// Requested operation
        operation: &'static str,
        /// Current lifecycle state
        state: &'static str,
    },

    /// Probe rejected the device
    #[error("Device mismatch: {0}")]
    DeviceMismatch(String),

    /// Configuration out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error from the operating system
    #[error("I/O error during {operation}: {source}")]
    Io {
        /// Operation in progress
        operation: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl UpdateError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::NotMapped { .. } => ErrorKind::NotMapped,
            UpdateError::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            UpdateError::Timeout { .. } => ErrorKind::Timeout,
            UpdateError::TransportFailure { .. } | UpdateError::Io { .. } => {
                ErrorKind::TransportFailure
            }
            UpdateError::VerificationFailed(_) => ErrorKind::VerificationFailed,
            UpdateError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            UpdateError::Cancelled(_) => ErrorKind::Cancelled,
            UpdateError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            UpdateError::DeviceMismatch(_) => ErrorKind::DeviceMismatch,
            UpdateError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::NotMapped | ErrorKind::OutOfBounds => ErrorSeverity::Critical,
            ErrorKind::VerificationFailed => ErrorSeverity::Critical,
            ErrorKind::Timeout => ErrorSeverity::Warning,
            ErrorKind::Cancelled => ErrorSeverity::Info,
            ErrorKind::TransportFailure
            | ErrorKind::UnsupportedOperation
            | ErrorKind::InvalidTransition
            | ErrorKind::DeviceMismatch
            | ErrorKind::InvalidConfig => ErrorSeverity::Error,
        }
    }

    /// Check if repeating the failed phase might succeed.
    ///
    /// Only transport failures qualify; timeouts and verification failures
    /// are surfaced once the protocol's own bound is exhausted.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransportFailure
    }

    /// Check if this error indicates a programming defect rather than a
    /// device or transport condition.
    pub fn is_defect(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotMapped | ErrorKind::OutOfBounds)
    }

    /// Verification diagnostics, if this is a verification failure.
    pub fn verification_failure(&self) -> Option<&VerificationFailure> {
        match self {
            UpdateError::VerificationFailed(v) => Some(v),
            _ => None,
        }
    }

    /// Create a not-mapped error.
    pub fn not_mapped(target: impl Into<String>) -> Self {
        UpdateError::NotMapped {
            target: target.into(),
        }
    }

    /// Create an out-of-bounds error.
    pub fn out_of_bounds(target: impl Into<String>, offset: usize, width: usize, len: usize) -> Self {
        UpdateError::OutOfBounds {
            target: target.into(),
            offset,
            width,
            len,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        UpdateError::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a transport failure.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        UpdateError::TransportFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        UpdateError::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a verification failure from structured diagnostics.
    pub fn verification(failure: VerificationFailure) -> Self {
        UpdateError::VerificationFailed(Box::new(failure))
    }

    /// Create a read-back verification failure.
    pub fn read_back_mismatch(mismatch: ReadBackMismatch) -> Self {
        Self::verification(VerificationFailure::ReadBack(mismatch))
    }

    /// Create a handshake verification failure.
    pub fn handshake_mismatch(mismatch: HandshakeMismatch) -> Self {
        Self::verification(VerificationFailure::Handshake(mismatch))
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        UpdateError::UnsupportedOperation(msg.into())
    }

    /// Create a cancellation error.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        UpdateError::Cancelled(msg.into())
    }

    /// Create an invalid-transition error.
    pub fn invalid_transition(operation: &'static str, state: &'static str) -> Self {
        UpdateError::InvalidTransition { operation, state }
    }

    /// Create a device mismatch error.
    pub fn device_mismatch(msg: impl Into<String>) -> Self {
        UpdateError::DeviceMismatch(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        UpdateError::InvalidConfig(msg.into())
    }
}
