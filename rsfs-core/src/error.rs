//! Error types for RSFS
//!
//! Provides a unified error type for all RSFS client operations, plus the
//! coarse `ErrorKind` reported to SDK callers alongside the message.

use crate::types::StatusCode;
use thiserror::Error;

/// Result type alias for RSFS operations
pub type Result<T> = std::result::Result<T, RsfsError>;

/// Coarse error classification surfaced to SDK callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    NotFound,
    BadParam,
    System,
    Timeout,
    Busy,
    NoQuota,
    NoAuth,
    Unknown,
    NotImpl,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Ok => "OK",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::BadParam => "Bad Parameter",
            ErrorKind::System => "SystemError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Busy => "SystemBusy",
            ErrorKind::NoQuota => "UserNoQuota",
            ErrorKind::NoAuth => "UserUnauthorized",
            ErrorKind::Unknown => "UnknownError",
            ErrorKind::NotImpl => "Not Implement",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for RSFS
#[derive(Error, Debug)]
pub enum RsfsError {
    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Incomplete slice: have {present} data blocks, need {required}")]
    IncompleteSlice { present: usize, required: usize },

    #[error("Unrecoverable slice: {missing} blocks missing, at most {tolerated} can be rebuilt")]
    Unrecoverable { missing: usize, tolerated: usize },

    #[error("Invalid block ordinal: {ordinal} (max: {max})")]
    InvalidBlockOrdinal { ordinal: usize, max: usize },

    #[error("Block size mismatch: expected at most {expected}, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    // ===== Addressing Errors =====
    #[error("Offset {offset} out of range (file size: {file_size})")]
    OutOfRange { offset: i64, file_size: u64 },

    // ===== Data Path Errors =====
    #[error("Data loss in slice #{slice}: {failed} blocks unavailable, at most {tolerated} tolerated")]
    DataLoss {
        slice: u64,
        failed: usize,
        tolerated: usize,
    },

    #[error("Tail slice #{slice} lost: no replica round answered for all {blocks} blocks")]
    TailLost { slice: u64, blocks: usize },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Open failed: {opened}/{required} block streams opened")]
    OpenFailed { opened: usize, required: usize },

    #[error("Illegal session state: {0}")]
    IllegalState(String),

    // ===== Master Errors =====
    #[error("Master rejected {op}: {status}")]
    Master { op: &'static str, status: StatusCode },

    #[error("File not found: {0}")]
    NotFound(String),

    // ===== Network Errors =====
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // ===== Parameter / Configuration Errors =====
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RsfsError {
    /// Coarse kind reported to SDK callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            RsfsError::NotFound(_) => ErrorKind::NotFound,
            RsfsError::BadParameter(_)
            | RsfsError::OutOfRange { .. }
            | RsfsError::InvalidBlockOrdinal { .. }
            | RsfsError::BlockSizeMismatch { .. }
            | RsfsError::Configuration(_) => ErrorKind::BadParam,
            RsfsError::Timeout(_) => ErrorKind::Timeout,
            RsfsError::Master { status, .. } if status.is_master_retryable() => ErrorKind::Busy,
            RsfsError::Master {
                status: StatusCode::NotFound,
                ..
            } => ErrorKind::NotFound,
            RsfsError::Master {
                status: StatusCode::IllegalAccess | StatusCode::NotPermission,
                ..
            } => ErrorKind::NoAuth,
            RsfsError::Internal(_) => ErrorKind::Unknown,
            _ => ErrorKind::System,
        }
    }
}

impl From<reed_solomon_erasure::Error> for RsfsError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        match err {
            reed_solomon_erasure::Error::TooFewShardsPresent => RsfsError::ErasureCoding(
                "too few blocks present to reconstruct the slice".to_string(),
            ),
            other => RsfsError::ErasureCoding(format!("{other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RsfsError::DataLoss {
            slice: 3,
            failed: 5,
            tolerated: 4,
        };
        assert_eq!(
            err.to_string(),
            "Data loss in slice #3: 5 blocks unavailable, at most 4 tolerated"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RsfsError = io_err.into();
        assert!(matches!(err, RsfsError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::System);
    }

    #[test]
    fn test_error_kinds() {
        let busy = RsfsError::Master {
            op: "OpenFile",
            status: StatusCode::IsBusy,
        };
        assert_eq!(busy.kind(), ErrorKind::Busy);

        let missing = RsfsError::Master {
            op: "OpenFile",
            status: StatusCode::NotFound,
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let range = RsfsError::OutOfRange {
            offset: 10,
            file_size: 4,
        };
        assert_eq!(range.kind(), ErrorKind::BadParam);
        assert_eq!(range.kind().to_string(), "Bad Parameter");
    }
}
