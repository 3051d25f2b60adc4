// SPDX-License-Identifier: GPL-3.0-only

//! Error types shared by every backend

use crate::constants::error_codes;
use std::fmt;

/// Result type alias using CamError
pub type CamResult<T> = Result<T, CamError>;

/// Every failure a backend, the registry or a context can report
#[derive(Debug, Clone, PartialEq)]
pub enum CamError {
    /// No frame arrived within the requested timeout
    FrameTimeout,
    /// The frame was delivered but part of its data is missing
    FrameDataMissing,
    /// The frame was delivered but the transport dropped data
    FrameDataLost,
    /// Destination buffer or stride too small for the frame
    BufferOverflow(String),
    /// A wait was interrupted by a signal
    InterruptedSyscall,
    /// The camera lacks the requested feature
    HardwareFeatureNotAvailable(String),
    /// The backend does not provide this operation
    NotImplemented(&'static str),
    /// Handle does not refer to a live context
    InvalidContext,
    /// Call made before startup, or startup repeated
    Lifecycle(String),
    /// Index, mode or value outside of the accepted range
    InvalidArgument(String),
    /// Device number not owned by any backend
    DeviceNotFound(String),
    /// A backend could not be loaded
    BackendUnavailable(String),
    /// Vendor layer reported a failure
    Backend(String),
    /// Configuration could not be read
    Config(String),
    /// I/O failure talking to a device
    Io(String),
    /// Anything else
    Other(String),
}

/// Per-frame quality flags returned together with a valid frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    DataMissing,
    DataLost,
}

impl CamError {
    /// Integer code of this error on the error channel
    pub fn code(&self) -> i32 {
        match self {
            CamError::FrameTimeout => error_codes::FRAME_TIMEOUT,
            CamError::FrameDataMissing => error_codes::FRAME_DATA_MISSING,
            CamError::FrameDataLost => error_codes::FRAME_DATA_LOST,
            CamError::BufferOverflow(_) => error_codes::BUFFER_OVERFLOW,
            CamError::InterruptedSyscall => error_codes::FRAME_INTERRUPTED_SYSCALL,
            CamError::HardwareFeatureNotAvailable(_) => {
                error_codes::HARDWARE_FEATURE_NOT_AVAILABLE
            }
            CamError::Other(_) => error_codes::OTHER_ERROR,
            _ => error_codes::GENERIC,
        }
    }

    /// Per-frame conditions the caller may simply retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CamError::FrameTimeout
                | CamError::FrameDataMissing
                | CamError::FrameDataLost
                | CamError::InterruptedSyscall
        )
    }
}

impl fmt::Display for CamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CamError::FrameTimeout => write!(f, "timeout exceeded"),
            CamError::FrameDataMissing => write!(f, "frame data missing"),
            CamError::FrameDataLost => write!(f, "frame data lost"),
            CamError::BufferOverflow(msg) => write!(f, "buffer overflow: {}", msg),
            CamError::InterruptedSyscall => write!(f, "interrupted system call"),
            CamError::HardwareFeatureNotAvailable(msg) => {
                write!(f, "hardware feature not available: {}", msg)
            }
            CamError::NotImplemented(op) => write!(f, "Function not implemented: {}", op),
            CamError::InvalidContext => write!(f, "no such camera context"),
            CamError::Lifecycle(msg) => write!(f, "{}", msg),
            CamError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CamError::DeviceNotFound(msg) => write!(f, "device not found: {}", msg),
            CamError::BackendUnavailable(msg) => write!(f, "backend unavailable: {}", msg),
            CamError::Backend(msg) => write!(f, "backend error: {}", msg),
            CamError::Config(msg) => write!(f, "configuration error: {}", msg),
            CamError::Io(msg) => write!(f, "I/O error: {}", msg),
            CamError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CamError {}

impl From<std::io::Error> for CamError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::Interrupted => CamError::InterruptedSyscall,
            std::io::ErrorKind::TimedOut => CamError::FrameTimeout,
            _ => CamError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CamError {
    fn from(err: serde_json::Error) -> Self {
        CamError::Config(err.to_string())
    }
}

impl From<Advisory> for CamError {
    fn from(advisory: Advisory) -> Self {
        match advisory {
            Advisory::DataMissing => CamError::FrameDataMissing,
            Advisory::DataLost => CamError::FrameDataLost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(CamError::BufferOverflow(String::new()).code(), -392081);
        assert_eq!(CamError::FrameDataMissing.code(), -392073);
        assert_eq!(CamError::FrameTimeout.code(), -392074);
        assert_eq!(CamError::FrameDataLost.code(), -392075);
        assert_eq!(
            CamError::HardwareFeatureNotAvailable(String::new()).code(),
            -392076
        );
        assert_eq!(CamError::Other(String::new()).code(), -392077);
        assert_eq!(CamError::InterruptedSyscall.code(), -392078);
        assert_eq!(CamError::InvalidContext.code(), -1);
        assert_eq!(CamError::NotImplemented("grab").code(), -1);
    }

    #[test]
    fn test_io_error_mapping() {
        let interrupted = std::io::Error::from(std::io::ErrorKind::Interrupted);
        assert_eq!(CamError::from(interrupted), CamError::InterruptedSyscall);

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(CamError::from(denied), CamError::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CamError::FrameTimeout.is_transient());
        assert!(CamError::from(Advisory::DataLost).is_transient());
        assert!(!CamError::InvalidContext.is_transient());
    }
}
