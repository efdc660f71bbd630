//! Error classification.

use core::fmt;

/// Discriminant of an [`UpdateError`](crate::UpdateError).
///
/// I/O errors are reported as [`ErrorKind::TransportFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Register access on a region that is not mapped
    NotMapped = 1,
    /// Access outside a region or buffer
    OutOfBounds = 2,
    /// A bounded deadline expired
    Timeout = 3,
    /// Control transfer, mapping or file I/O failed
    TransportFailure = 4,
    /// Read-back or handshake verification failed
    VerificationFailed = 5,
    /// The platform or device lacks a required capability
    UnsupportedOperation = 6,
    /// The caller cancelled the update
    Cancelled = 7,
    /// A lifecycle operation was called from the wrong state
    InvalidTransition = 8,
    /// Probe rejected the device
    DeviceMismatch = 9,
    /// Configuration values are out of range
    InvalidConfig = 10,
}

impl ErrorKind {
    /// Stable name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotMapped => "NotMapped",
            ErrorKind::OutOfBounds => "OutOfBounds",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::TransportFailure => "TransportFailure",
            ErrorKind::VerificationFailed => "VerificationFailed",
            ErrorKind::UnsupportedOperation => "UnsupportedOperation",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InvalidTransition => "InvalidTransition",
            ErrorKind::DeviceMismatch => "DeviceMismatch",
            ErrorKind::InvalidConfig => "InvalidConfig",
        }
    }

    /// Numeric code of the kind.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a kind by numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorKind::NotMapped),
            2 => Some(ErrorKind::OutOfBounds),
            3 => Some(ErrorKind::Timeout),
            4 => Some(ErrorKind::TransportFailure),
            5 => Some(ErrorKind::VerificationFailed),
            6 => Some(ErrorKind::UnsupportedOperation),
            7 => Some(ErrorKind::Cancelled),
            8 => Some(ErrorKind::InvalidTransition),
            9 => Some(ErrorKind::DeviceMismatch),
            10 => Some(ErrorKind::InvalidConfig),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ErrorSeverity {
    /// Informational, no action required
    Info = 0,
    /// Warning, may require attention
    Warning = 1,
    /// Error, operation failed
    Error = 2,
    /// Critical, device contents or host state may be inconsistent
    Critical = 3,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}
