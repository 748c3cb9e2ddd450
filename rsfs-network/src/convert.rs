//! Conversions between wire messages and client types

use rsfs_client::rpc::{ChannelErrorKind, RpcError};
use rsfs_core::{FileMeta, OpenMode, ReadType, StatusCode};
use rsfs_protocol::{master, snode};
use std::time::Duration;
use tonic::{Code, Status};

pub fn stream_mode(mode: ReadType) -> snode::StreamMode {
    match mode {
        ReadType::SeqRead => snode::StreamMode::SeqRead,
        ReadType::RandomRead => snode::StreamMode::RandomRead,
        ReadType::Append => snode::StreamMode::Append,
    }
}

pub fn read_type(wire: i32) -> Result<ReadType, Status> {
    match snode::StreamMode::try_from(wire) {
        Ok(snode::StreamMode::SeqRead) => Ok(ReadType::SeqRead),
        Ok(snode::StreamMode::RandomRead) => Ok(ReadType::RandomRead),
        Ok(snode::StreamMode::Append) => Ok(ReadType::Append),
        Err(_) => Err(Status::invalid_argument(format!("unknown stream mode {wire}"))),
    }
}

pub fn open_type(mode: OpenMode) -> master::OpenType {
    match mode {
        OpenMode::Write => master::OpenType::Write,
        OpenMode::Read => master::OpenType::RandomRead,
    }
}

pub fn open_mode(wire: i32) -> Result<OpenMode, Status> {
    match master::OpenType::try_from(wire) {
        Ok(master::OpenType::Write) => Ok(OpenMode::Write),
        Ok(master::OpenType::RandomRead) => Ok(OpenMode::Read),
        Err(_) => Err(Status::invalid_argument(format!("unknown open type {wire}"))),
    }
}

pub fn meta_to_wire(meta: &FileMeta) -> master::FileMeta {
    master::FileMeta {
        fid: meta.fid,
        name: meta.name.clone(),
        file_size: meta.file_size,
        tail_slice: meta.tail_slice,
        tail_num: meta.tail_num,
        crash_slice: meta.crash_slice,
        crash_num: meta.crash_num,
    }
}

pub fn meta_from_wire(wire: master::FileMeta) -> FileMeta {
    FileMeta {
        fid: wire.fid,
        name: wire.name,
        file_size: wire.file_size,
        tail_slice: wire.tail_slice,
        tail_num: wire.tail_num,
        crash_slice: wire.crash_slice,
        crash_num: wire.crash_num,
    }
}

/// Status carried in a response body; anything but OK becomes an error
pub fn check_status(wire: i32) -> Result<(), RpcError> {
    match StatusCode::from_i32(wire) {
        StatusCode::Ok => Ok(()),
        status => Err(RpcError::Status(status)),
    }
}

/// Classify a failed gRPC call
pub fn status_error(status: Status, request_timeout: Duration) -> RpcError {
    match status.code() {
        Code::Unavailable => RpcError::channel(ChannelErrorKind::ServerUnavailable, status.message()),
        Code::Cancelled | Code::Aborted => {
            RpcError::channel(ChannelErrorKind::ConnectionClosed, status.message())
        }
        Code::DeadlineExceeded => RpcError::Timeout(request_timeout),
        code => RpcError::Other(format!("{code:?}: {}", status.message())),
    }
}

/// Server side: status to put in the response body, or a gRPC error
pub fn reply_status(result: Result<(), RpcError>) -> Result<i32, Status> {
    match result {
        Ok(()) => Ok(StatusCode::Ok.as_i32()),
        Err(RpcError::Status(status)) => Ok(status.as_i32()),
        Err(RpcError::Channel { message, .. }) => Err(Status::unavailable(message)),
        Err(RpcError::Timeout(after)) => {
            Err(Status::deadline_exceeded(format!("backend timed out after {after:?}")))
        }
        Err(RpcError::Other(message)) => Err(Status::internal(message)),
    }
}
