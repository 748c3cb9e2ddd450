//! In-process master and storage nodes
//!
//! `MemoryMaster` keeps the file table in a `BTreeMap`; `MemoryStorage`
//! keeps one map of block files per node address. Both honor the same
//! status codes as the real services and expose fault injection hooks for
//! tests and local experiments.

use crate::rpc::{
    ChannelErrorKind, CloseDataRequest, CloseFileRequest, ListFileReply, ListFileRequest,
    MasterRpc, OpenDataRequest, OpenFileReply, OpenFileRequest, ReadDataRequest, RpcError,
    StorageNodeRpc, WriteDataRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rsfs_core::{BlockId, FileMeta, OpenMode, ReadType, StatusCode};
use std::collections::{BTreeMap, HashMap};

// ===== Storage nodes =====

#[derive(Debug, Default)]
struct BlockFile {
    data: Vec<u8>,
    stream: Option<ReadType>,
    read_pos: usize,
}

#[derive(Debug, Default)]
struct NodeState {
    files: HashMap<u64, BlockFile>,
    down: bool,
    fail_reads: bool,
    fail_next: Option<(u32, RpcError)>,
}

impl NodeState {
    fn check_faults(&mut self, addr: &str) -> Result<(), RpcError> {
        if self.down {
            return Err(RpcError::channel(
                ChannelErrorKind::ServerUnreachable,
                format!("{addr} is down"),
            ));
        }
        if let Some((remaining, err)) = self.fail_next.as_mut() {
            let err = err.clone();
            *remaining -= 1;
            if *remaining == 0 {
                self.fail_next = None;
            }
            return Err(err);
        }
        Ok(())
    }

    fn stream(&mut self, block_id: BlockId) -> Result<&mut BlockFile, RpcError> {
        self.files
            .get_mut(&block_id.raw())
            .ok_or(RpcError::Status(StatusCode::NotFound))
    }
}

/// Storage nodes held in memory, addressed `mem-node-<i>`
#[derive(Debug)]
pub struct MemoryStorage {
    addrs: Vec<String>,
    nodes: Mutex<HashMap<String, NodeState>>,
}

impl MemoryStorage {
    pub fn with_nodes(count: usize) -> Self {
        let addrs: Vec<String> = (0..count).map(|i| format!("mem-node-{i}")).collect();
        let nodes = addrs
            .iter()
            .map(|addr| (addr.clone(), NodeState::default()))
            .collect();
        Self {
            addrs,
            nodes: Mutex::new(nodes),
        }
    }

    pub fn node_addrs(&self) -> Vec<String> {
        self.addrs.clone()
    }

    /// Every call to `addr` fails with an unreachable-server channel error
    pub fn set_down(&self, addr: &str, down: bool) {
        self.with_node(addr, |node| node.down = down);
    }

    /// Every read from `addr` fails with `kIOError`
    pub fn fail_reads(&self, addr: &str, fail: bool) {
        self.with_node(addr, |node| node.fail_reads = fail);
    }

    /// The next `count` calls to `addr` fail with `err`
    pub fn fail_next(&self, addr: &str, count: u32, err: RpcError) {
        self.with_node(addr, |node| {
            node.fail_next = (count > 0).then_some((count, err));
        });
    }

    /// Contents of a block file
    pub fn block(&self, addr: &str, block_id: BlockId) -> Option<Bytes> {
        let nodes = self.nodes.lock();
        nodes
            .get(addr)?
            .files
            .get(&block_id.raw())
            .map(|file| Bytes::copy_from_slice(&file.data))
    }

    /// Block files currently open as streams, across all nodes
    pub fn open_stream_count(&self) -> usize {
        let nodes = self.nodes.lock();
        nodes
            .values()
            .flat_map(|node| node.files.values())
            .filter(|file| file.stream.is_some())
            .count()
    }

    fn with_node(&self, addr: &str, f: impl FnOnce(&mut NodeState)) {
        if let Some(node) = self.nodes.lock().get_mut(addr) {
            f(node);
        }
    }

    fn call<T>(
        &self,
        addr: &str,
        f: impl FnOnce(&mut NodeState) -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(addr).ok_or_else(|| {
            RpcError::channel(ChannelErrorKind::ServerUnreachable, format!("unknown node {addr}"))
        })?;
        node.check_faults(addr)?;
        f(node)
    }
}

#[async_trait]
impl StorageNodeRpc for MemoryStorage {
    async fn open_data(&self, addr: &str, request: OpenDataRequest) -> Result<(), RpcError> {
        self.call(addr, |node| {
            let file = match request.mode {
                ReadType::Append => node.files.entry(request.block_id.raw()).or_default(),
                ReadType::SeqRead | ReadType::RandomRead => node.stream(request.block_id)?,
            };
            file.stream = Some(request.mode);
            file.read_pos = 0;
            Ok(())
        })
    }

    async fn close_data(&self, addr: &str, request: CloseDataRequest) -> Result<(), RpcError> {
        self.call(addr, |node| {
            node.stream(request.block_id)?.stream = None;
            Ok(())
        })
    }

    async fn write_data(&self, addr: &str, request: WriteDataRequest) -> Result<(), RpcError> {
        self.call(addr, |node| {
            let file = node.stream(request.block_id)?;
            if file.stream != Some(ReadType::Append) {
                return Err(RpcError::Status(StatusCode::NotStream));
            }
            file.data.extend_from_slice(&request.payload);
            Ok(())
        })
    }

    async fn read_data(&self, addr: &str, request: ReadDataRequest) -> Result<Bytes, RpcError> {
        self.call(addr, |node| {
            if node.fail_reads {
                return Err(RpcError::Status(StatusCode::IoError));
            }
            let file = node.stream(request.block_id)?;
            let start = match (file.stream, request.mode) {
                (Some(ReadType::RandomRead), ReadType::RandomRead) => request.offset as usize,
                (Some(ReadType::SeqRead), ReadType::SeqRead) => file.read_pos,
                _ => return Err(RpcError::Status(StatusCode::NotStream)),
            };
            if start > file.data.len() {
                return Err(RpcError::Status(StatusCode::IoError));
            }
            let end = (start + request.payload_size as usize).min(file.data.len());
            if request.mode == ReadType::SeqRead {
                file.read_pos = end;
            }
            Ok(Bytes::copy_from_slice(&file.data[start..end]))
        })
    }
}

// ===== Master =====

#[derive(Debug)]
struct FileRecord {
    meta: FileMeta,
    nodes: Vec<String>,
}

#[derive(Debug)]
struct MasterState {
    next_fid: u64,
    files: BTreeMap<String, FileRecord>,
    busy_remaining: u32,
    list_calls: u32,
}

/// Approximate encoded size of one listed entry
fn entry_size(meta: &FileMeta) -> u64 {
    meta.name.len() as u64 + 40
}

/// File table held in memory
#[derive(Debug)]
pub struct MemoryMaster {
    nodes: Vec<String>,
    state: Mutex<MasterState>,
}

impl MemoryMaster {
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            nodes,
            state: Mutex::new(MasterState {
                next_fid: 1,
                files: BTreeMap::new(),
                busy_remaining: 0,
                list_calls: 0,
            }),
        }
    }

    /// The next `count` requests are answered with `kIsBusy`
    pub fn inject_busy(&self, count: u32) {
        self.state.lock().busy_remaining = count;
    }

    pub fn file(&self, name: &str) -> Option<FileMeta> {
        self.state.lock().files.get(name).map(|r| r.meta.clone())
    }

    /// Node list assigned to `name`
    pub fn file_nodes(&self, name: &str) -> Option<Vec<String>> {
        self.state.lock().files.get(name).map(|r| r.nodes.clone())
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().list_calls
    }

    fn check_busy(state: &mut MasterState) -> Result<(), RpcError> {
        if state.busy_remaining > 0 {
            state.busy_remaining -= 1;
            return Err(RpcError::Status(StatusCode::IsBusy));
        }
        Ok(())
    }

    /// `count` distinct nodes, rotated by file id
    fn allocate(&self, fid: u64, count: usize) -> Result<Vec<String>, RpcError> {
        if count == 0 || count > self.nodes.len() {
            return Err(RpcError::Status(StatusCode::NotAlloc));
        }
        let start = fid as usize % self.nodes.len();
        Ok((0..count)
            .map(|i| self.nodes[(start + i) % self.nodes.len()].clone())
            .collect())
    }
}

#[async_trait]
impl MasterRpc for MemoryMaster {
    async fn open_file(&self, request: OpenFileRequest) -> Result<OpenFileReply, RpcError> {
        let mut state = self.state.lock();
        Self::check_busy(&mut state)?;
        match request.mode {
            OpenMode::Write => {
                let fid = state.next_fid;
                let nodes = self.allocate(fid, request.node_num as usize)?;
                state.next_fid += 1;
                let meta = FileMeta {
                    fid,
                    name: request.file_name.clone(),
                    file_size: 0,
                    tail_slice: -1,
                    tail_num: 0,
                    crash_slice: -1,
                    crash_num: 0,
                };
                state.files.insert(
                    request.file_name,
                    FileRecord {
                        meta: meta.clone(),
                        nodes: nodes.clone(),
                    },
                );
                Ok(OpenFileReply { meta, nodes })
            }
            OpenMode::Read => {
                let record = state
                    .files
                    .get(&request.file_name)
                    .ok_or(RpcError::Status(StatusCode::NotFound))?;
                Ok(OpenFileReply {
                    meta: record.meta.clone(),
                    nodes: record.nodes.clone(),
                })
            }
        }
    }

    async fn close_file(&self, request: CloseFileRequest) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        Self::check_busy(&mut state)?;
        let record = state
            .files
            .get_mut(&request.meta.name)
            .ok_or(RpcError::Status(StatusCode::NotFound))?;
        if record.meta.fid != request.meta.fid {
            return Err(RpcError::Status(StatusCode::BadParameter));
        }
        record.meta = request.meta;
        Ok(())
    }

    async fn list_file(&self, request: ListFileRequest) -> Result<ListFileReply, RpcError> {
        let mut state = self.state.lock();
        Self::check_busy(&mut state)?;
        state.list_calls += 1;
        if request.path_start > request.path_end {
            return Err(RpcError::Status(StatusCode::BadParameter));
        }

        let mut reply = ListFileReply::default();
        let mut used = 0;
        for (name, record) in state
            .files
            .range(request.path_start.clone()..request.path_end.clone())
        {
            let size = entry_size(&record.meta);
            if !reply.metas.is_empty() && used + size > request.size_limit {
                reply.last_one = name.clone();
                break;
            }
            used += size;
            reply.metas.push(record.meta.clone());
        }
        Ok(reply)
    }
}
