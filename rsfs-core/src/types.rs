//! Shared wire-level types
//!
//! Status codes returned by the master and storage nodes, stream modes and
//! the file metadata record exchanged with the master.

use crate::error::{Result, RsfsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code carried in every master and storage-node response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Undefined,
    Ok,

    // master / storage node lifecycle
    NotInited,
    IsBusy,
    IsIniting,
    IsSecondary,
    IsReadonly,
    NotAlloc,
    InvalidSequenceId,
    NotFound,

    // storage node streams
    NotStream,
    ErrStream,

    // ACL & system
    IoError,
    BadParameter,
    IllegalAccess,
    NotPermission,
}

impl StatusCode {
    /// Numeric value used on the wire
    pub fn as_i32(self) -> i32 {
        match self {
            StatusCode::Undefined => 0,
            StatusCode::Ok => 1,
            StatusCode::NotInited => 10,
            StatusCode::IsBusy => 11,
            StatusCode::IsIniting => 12,
            StatusCode::IsSecondary => 13,
            StatusCode::IsReadonly => 14,
            StatusCode::NotAlloc => 15,
            StatusCode::InvalidSequenceId => 16,
            StatusCode::NotFound => 20,
            StatusCode::NotStream => 30,
            StatusCode::ErrStream => 31,
            StatusCode::IoError => 40,
            StatusCode::BadParameter => 41,
            StatusCode::IllegalAccess => 42,
            StatusCode::NotPermission => 43,
        }
    }

    /// Decode a wire value; unknown values map to `Undefined`
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => StatusCode::Ok,
            10 => StatusCode::NotInited,
            11 => StatusCode::IsBusy,
            12 => StatusCode::IsIniting,
            13 => StatusCode::IsSecondary,
            14 => StatusCode::IsReadonly,
            15 => StatusCode::NotAlloc,
            16 => StatusCode::InvalidSequenceId,
            20 => StatusCode::NotFound,
            30 => StatusCode::NotStream,
            31 => StatusCode::ErrStream,
            40 => StatusCode::IoError,
            41 => StatusCode::BadParameter,
            42 => StatusCode::IllegalAccess,
            43 => StatusCode::NotPermission,
            _ => StatusCode::Undefined,
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Master statuses that mean "try again later"
    pub fn is_master_retryable(self) -> bool {
        matches!(
            self,
            StatusCode::NotInited | StatusCode::IsBusy | StatusCode::IsSecondary
        )
    }

    /// Storage-node statuses that mean "try again later"
    pub fn is_storage_retryable(self) -> bool {
        matches!(
            self,
            StatusCode::NotInited | StatusCode::IsBusy | StatusCode::IsIniting
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Undefined => "kUnDefined",
            StatusCode::Ok => "kOk",
            StatusCode::NotInited => "kNotInited",
            StatusCode::IsBusy => "kIsBusy",
            StatusCode::IsIniting => "kIsIniting",
            StatusCode::IsSecondary => "kIsSecondary",
            StatusCode::IsReadonly => "kIsReadonly",
            StatusCode::NotAlloc => "kNotAlloc",
            StatusCode::InvalidSequenceId => "kInvalidSequenceId",
            StatusCode::NotFound => "kNotFound",
            StatusCode::NotStream => "kNotStream",
            StatusCode::ErrStream => "kErrStream",
            StatusCode::IoError => "kIOError",
            StatusCode::BadParameter => "kBadParameter",
            StatusCode::IllegalAccess => "kIllegalAccess",
            StatusCode::NotPermission => "kNotPermission",
        };
        f.write_str(name)
    }
}

/// File open mode requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    /// Parse the classic `"r"` / `"w"` mode strings
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            other => Err(RsfsError::BadParameter(format!(
                "unsupported open mode: {other:?}"
            ))),
        }
    }
}

/// Mode of a block stream opened on a storage node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadType {
    SeqRead,
    RandomRead,
    Append,
}

/// File record kept by the master
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMeta {
    pub fid: u64,
    pub name: String,
    /// Bytes of file content (data blocks only, never parity)
    pub file_size: u64,
    /// Slice left open at close, `-1` when there is none
    pub tail_slice: i64,
    /// Data blocks written in the tail slice
    pub tail_num: u32,
    /// Slice with the worst observed failure count, `-1` when none
    pub crash_slice: i64,
    /// Failed blocks observed in `crash_slice`
    pub crash_num: u32,
}
