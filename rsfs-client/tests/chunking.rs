//! Property tests: arbitrary write/read chunking over a small layout
//!
//! A 4+2 layout with 64-byte blocks puts every few hundred bytes on a new
//! slice, so random files cross many slice and tail boundaries.
//!
//! Run with: cargo test -p rsfs-client --test chunking

use proptest::prelude::*;
use rsfs_client::memory::{MemoryMaster, MemoryStorage};
use rsfs_client::{ClientConfig, RsfsClient};
use std::sync::Arc;

fn small_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.erasure.data_blocks = 4;
    config.erasure.parity_blocks = 2;
    config.erasure.block_size = 64;
    config.rpc.retry_period_ms = 1;
    config.wait.poll_interval_ms = 20;
    config
}

/// Write `data` in `write_chunk` pieces, read it back in `read_chunk` pieces,
/// with the nodes in `failed` refusing reads
async fn round_trip(
    data: &[u8],
    write_chunk: usize,
    read_chunk: usize,
    failed: &[usize],
) -> rsfs_core::Result<Vec<u8>> {
    let storage = Arc::new(MemoryStorage::with_nodes(6));
    let master = Arc::new(MemoryMaster::new(storage.node_addrs()));
    let client = RsfsClient::new(small_config(), master.clone(), storage.clone())?;

    let mut file = client.open("/rsfs/prop.bin", "w").await?;
    for piece in data.chunks(write_chunk) {
        file.write(piece).await?;
    }
    file.close().await?;

    let nodes = master.file_nodes("/rsfs/prop.bin").unwrap_or_default();
    for &ordinal in failed {
        storage.fail_reads(&nodes[ordinal], true);
    }

    let mut file = client.open("/rsfs/prop.bin", "r").await?;
    let mut out = Vec::with_capacity(data.len());
    let mut buf = vec![0u8; read_chunk];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    file.close().await?;
    Ok(out)
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_chunking_round_trips(
        data in prop::collection::vec(any::<u8>(), 0..2_000),
        write_chunk in 1usize..300,
        read_chunk in 1usize..300,
    ) {
        let out = block_on(round_trip(&data, write_chunk, read_chunk, &[])).unwrap();
        prop_assert_eq!(out, data);
    }

    /// Files of whole slices survive any two nodes refusing reads
    #[test]
    fn prop_sealed_slices_survive_two_failures(
        slices in 1usize..6,
        first in 0usize..6,
        second in 0usize..6,
    ) {
        let data: Vec<u8> = (0..slices * 256).map(|i| (i * 7 % 253) as u8).collect();
        let out = block_on(round_trip(&data, 100, 77, &[first, second])).unwrap();
        prop_assert_eq!(out, data);
    }
}

#[test]
fn test_random_chunking_smoke() {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..5_000).map(|_| rng.gen()).collect();
    let write_chunk = rng.gen_range(1..500);
    let read_chunk = rng.gen_range(1..500);
    let out = block_on(round_trip(&data, write_chunk, read_chunk, &[])).unwrap();
    assert_eq!(out, data);
}
