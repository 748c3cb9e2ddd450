//! Tail slice replication
//!
//! A slice closed before all M data blocks were written has no parity.
//! Each of its blocks is copied to `tail_backup_count` extra nodes so a
//! reader can still find it when the primary node is down.
//!
//! Round `r` of tail block `i` lives on node `(i + r * stride) % N` in a
//! dedicated block file `BlockId::tail_replica(fid, N, r, i)` at offset 0,
//! where `stride` is the smallest value `>= tail_num` coprime with `N`. The
//! rounds of one block therefore land on distinct nodes as long as there
//! are fewer than `N` of them. Round 0 is the primary copy inside the
//! node's append stream.

use crate::rpc::{CloseDataRequest, OpenDataRequest, ReadDataRequest, RpcError, WriteDataRequest};
use crate::session::SessionContext;
use bytes::Bytes;
use rsfs_core::{BlockId, ErasureEngine, ReadType, Result, RsfsError};
use std::sync::Arc;
use tracing::{debug, warn};

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Distance in nodes between consecutive replica rounds of one block
pub fn replica_stride(tail_num: usize, node_count: usize) -> usize {
    let mut stride = tail_num.max(1);
    // node_count + 1 is always coprime with node_count
    while gcd(stride, node_count) != 1 {
        stride += 1;
    }
    stride
}

/// Node holding replica `round` of tail block `index`
pub fn replica_node(tail_num: usize, node_count: usize, round: usize, index: usize) -> usize {
    (index + round * replica_stride(tail_num, node_count)) % node_count
}

#[derive(Clone)]
struct ReplicaCall {
    addr: String,
    block_id: BlockId,
    /// open, transfer, close
    sequence_ids: [u64; 3],
    payload: Bytes,
}

impl SessionContext {
    fn replica_call(
        &mut self,
        tail_num: usize,
        round: usize,
        index: usize,
        payload: Bytes,
    ) -> ReplicaCall {
        let node = replica_node(tail_num, self.node_count(), round, index);
        ReplicaCall {
            addr: self.nodes[node].clone(),
            block_id: BlockId::tail_replica(self.file_id, self.node_count(), round, index),
            sequence_ids: [
                self.next_sequence_id(),
                self.next_sequence_id(),
                self.next_sequence_id(),
            ],
            payload,
        }
    }
}

/// Write every extra replica round of the tail `blocks`
pub(crate) async fn replicate(ctx: &mut SessionContext, slice: u64, blocks: &[Bytes]) -> Result<()> {
    let tail_num = blocks.len();
    let mut calls = Vec::with_capacity(tail_num * ctx.tail_backup_count);
    for round in 1..=ctx.tail_backup_count {
        for (index, block) in blocks.iter().enumerate() {
            calls.push(ctx.replica_call(tail_num, round, index, block.clone()));
        }
    }
    if calls.is_empty() {
        return Ok(());
    }

    let storage = Arc::clone(&ctx.storage);
    let outcome = ctx
        .broker
        .run(calls, ctx.write_retry, move |call: ReplicaCall| {
            let storage = Arc::clone(&storage);
            async move {
                let [open_seq, write_seq, close_seq] = call.sequence_ids;
                storage
                    .open_data(
                        &call.addr,
                        OpenDataRequest {
                            sequence_id: open_seq,
                            block_id: call.block_id,
                            mode: ReadType::Append,
                        },
                    )
                    .await?;
                storage
                    .write_data(
                        &call.addr,
                        WriteDataRequest {
                            sequence_id: write_seq,
                            block_id: call.block_id,
                            payload: call.payload,
                        },
                    )
                    .await?;
                storage
                    .close_data(
                        &call.addr,
                        CloseDataRequest {
                            sequence_id: close_seq,
                            block_id: call.block_id,
                        },
                    )
                    .await
            }
        })
        .await;

    if !outcome.all_succeeded() {
        let reason = outcome.first_error().unwrap_or_default();
        warn!(
            file = %ctx.name,
            slice,
            failed = outcome.failed_count(),
            total = outcome.len(),
            error = %reason,
            "Tail replication incomplete"
        );
        return Err(RsfsError::WriteFailed(format!(
            "tail replication of slice #{slice}: {} of {} replicas failed ({reason})",
            outcome.failed_count(),
            outcome.len()
        )));
    }
    debug!(slice, tail_num, rounds = ctx.tail_backup_count, "Tail replicated");
    Ok(())
}

/// Result of loading a tail slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TailLoad {
    /// Rounds in which at least one requested block failed
    pub failed_rounds: u32,
    /// Blocks no round could supply
    pub missing: Vec<usize>,
}

/// Load the `tail_num` data blocks of `slice` into `engine`
///
/// Round 0 reads the primary streams; every later round asks only for the
/// blocks still missing.
pub(crate) async fn load(
    ctx: &mut SessionContext,
    engine: &mut ErasureEngine,
    slice: u64,
    tail_num: usize,
) -> Result<TailLoad> {
    let mut missing: Vec<usize> = (0..tail_num).collect();
    let mut failed_rounds = 0;

    for round in 0..=ctx.tail_backup_count {
        if missing.is_empty() {
            break;
        }
        let mut outcome = if round == 0 {
            ctx.read_blocks(slice, &missing).await
        } else {
            read_replicas(ctx, round, tail_num, &missing).await
        };

        let mut still_missing = Vec::new();
        for (k, &index) in missing.iter().enumerate() {
            match outcome.take(k) {
                Some(payload) => engine.add_block(index, &payload)?,
                None => still_missing.push(index),
            }
        }
        if !still_missing.is_empty() {
            failed_rounds += 1;
            debug!(
                slice,
                round,
                missing = ?still_missing,
                error = %outcome.first_error().unwrap_or_default(),
                "Tail round incomplete"
            );
        }
        missing = still_missing;
    }

    Ok(TailLoad {
        failed_rounds,
        missing,
    })
}

async fn read_replicas(
    ctx: &mut SessionContext,
    round: usize,
    tail_num: usize,
    indices: &[usize],
) -> crate::broker::FanOutOutcome<Bytes> {
    let block_size = ctx.erasure.block_size as u32;
    let calls: Vec<ReplicaCall> = indices
        .iter()
        .map(|&index| ctx.replica_call(tail_num, round, index, Bytes::new()))
        .collect();
    let storage = Arc::clone(&ctx.storage);
    ctx.broker
        .run(calls, ctx.read_retry, move |call: ReplicaCall| {
            let storage = Arc::clone(&storage);
            async move {
                let [open_seq, read_seq, close_seq] = call.sequence_ids;
                storage
                    .open_data(
                        &call.addr,
                        OpenDataRequest {
                            sequence_id: open_seq,
                            block_id: call.block_id,
                            mode: ReadType::RandomRead,
                        },
                    )
                    .await?;
                let payload = storage
                    .read_data(
                        &call.addr,
                        ReadDataRequest {
                            sequence_id: read_seq,
                            block_id: call.block_id,
                            mode: ReadType::RandomRead,
                            payload_size: block_size,
                            offset: 0,
                        },
                    )
                    .await?;
                let closed = storage
                    .close_data(
                        &call.addr,
                        CloseDataRequest {
                            sequence_id: close_seq,
                            block_id: call.block_id,
                        },
                    )
                    .await;
                if let Err(e) = closed {
                    debug!(block = %call.block_id, error = %e, "Replica stream close failed");
                }
                Ok::<_, RpcError>(payload)
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_rounds_use_distinct_nodes() {
        // every layout with at least one parity block, every tail length,
        // every accepted backup count
        for node_count in 2..=32 {
            for data_blocks in 1..node_count {
                for tail_num in 1..data_blocks {
                    for index in 0..tail_num {
                        let nodes: Vec<usize> = (0..node_count)
                            .map(|r| replica_node(tail_num, node_count, r, index))
                            .collect();
                        let mut unique = nodes.clone();
                        unique.sort_unstable();
                        unique.dedup();
                        assert_eq!(
                            unique.len(),
                            node_count,
                            "block {index} of {tail_num} on {node_count} nodes reuses a node"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_stride_skips_shared_factors() {
        assert_eq!(replica_stride(3, 14), 3);
        assert_eq!(replica_stride(7, 14), 9);
        assert_eq!(replica_stride(2, 6), 5);
        assert_eq!(replica_stride(3, 6), 5);
        assert_eq!(replica_stride(0, 6), 1);

        assert_eq!(replica_node(3, 14, 1, 0), 3);
        assert_eq!(replica_node(9, 14, 2, 4), 8);
        let block0: Vec<usize> = (0..=3).map(|r| replica_node(7, 14, r, 0)).collect();
        assert_eq!(block0, [0, 9, 4, 13]);
    }

    #[test]
    fn test_round_blocks_use_distinct_nodes() {
        for round in 0..4 {
            let mut nodes: Vec<usize> = (0..7).map(|i| replica_node(7, 14, round, i)).collect();
            nodes.sort_unstable();
            nodes.dedup();
            assert_eq!(nodes.len(), 7);
        }
    }

    #[test]
    fn test_round_zero_is_primary() {
        for index in 0..9 {
            assert_eq!(replica_node(9, 14, 0, index), index);
        }
    }
}
