use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use utxod_chainstate::context::{
    BlockHeaderSource, BlockId, ChainStore, ChainWork, ChainWorkSource, LookupError,
    MedianTimeSource, SegmentId,
};
use utxod_chainstate::metadata::{ChainMetadataCache, MedianTimeCache, SharedMedianTimeCache};
use utxod_chainstate::store::KvChainStore;
use utxod_chainstate::time::{MedianTimePast, MedianTimeWindow};
use utxod_consensus::Hash256;
use utxod_pow::{block_proof, U256};
use utxod_primitives::block::BlockHeader;
use utxod_storage::memory::MemoryStore;
use utxod_storage::StoreError;

const BITS: u32 = 0x207f_ffff;

fn header(prev_block: [u8; 32], time: u32) -> BlockHeader {
    BlockHeader {
        version: 4,
        prev_block,
        merkle_root: [0u8; 32],
        time,
        bits: BITS,
        nonce: 0,
    }
}

/// Indexes a chain whose timestamps wander so medians differ from the tip time.
fn build_chain(
    length: usize,
) -> (Arc<KvChainStore<MemoryStore>>, Vec<BlockId>, Vec<BlockHeader>) {
    let store = Arc::new(KvChainStore::new(MemoryStore::new()));
    let mut prev = [0u8; 32];
    let mut ids = Vec::new();
    let mut headers = Vec::new();
    for height in 0..length {
        let jitter = if height % 3 == 0 { 400 } else { 0 };
        let header = header(prev, 1_600_000_000 + height as u32 * 150 + jitter);
        ids.push(store.insert_block(0, height as i32, &header).expect("insert"));
        prev = header.hash();
        headers.push(header);
    }
    (store, ids, headers)
}

/// Counts every read that reaches the wrapped store.
struct CountingStore {
    inner: Arc<KvChainStore<MemoryStore>>,
    reads: AtomicUsize,
}

impl CountingStore {
    fn new(inner: Arc<KvChainStore<MemoryStore>>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl ChainStore for CountingStore {
    fn block_id_at_height(
        &self,
        segment: SegmentId,
        height: i32,
    ) -> Result<Option<BlockId>, StoreError> {
        self.count();
        self.inner.block_id_at_height(segment, height)
    }

    fn block_id_for_hash(&self, hash: &Hash256) -> Result<Option<BlockId>, StoreError> {
        self.count();
        self.inner.block_id_for_hash(hash)
    }

    fn block_header(&self, block: BlockId) -> Result<Option<BlockHeader>, StoreError> {
        self.count();
        self.inner.block_header(block)
    }

    fn median_time_past(&self, block: BlockId) -> Result<Option<MedianTimePast>, StoreError> {
        self.count();
        self.inner.median_time_past(block)
    }

    fn calculate_median_time_past(
        &self,
        block: BlockId,
    ) -> Result<Option<MedianTimeWindow>, StoreError> {
        self.count();
        self.inner.calculate_median_time_past(block)
    }

    fn chain_work(&self, block: BlockId) -> Result<Option<ChainWork>, StoreError> {
        self.count();
        self.inner.chain_work(block)
    }
}

#[test]
fn metadata_cache_resolves_through_store() {
    let (store, ids, headers) = build_chain(30);
    let cache = ChainMetadataCache::new(Arc::clone(&store), 0);

    assert_eq!(cache.block_id(12).expect("id"), ids[12]);
    assert_eq!(cache.block_header(12).expect("header"), headers[12]);
    assert_eq!(
        cache.median_time_past(12).expect("mtp"),
        store.median_time_past(ids[12]).expect("read").expect("stored")
    );
    let proof = block_proof(BITS).expect("proof");
    assert_eq!(cache.chain_work(4).expect("work"), proof * U256::from(5u64));

    let err = cache.block_header(99).expect_err("beyond tip");
    assert!(matches!(err, LookupError::NotFound(_)));
}

#[test]
fn load_blocks_folds_forward_to_stored_values() {
    let (store, ids, headers) = build_chain(40);
    let start = 17;
    let cache = ChainMetadataCache::new(Arc::clone(&store), 0);
    cache
        .load_blocks(start as i32, &ids[start..], &headers[start..])
        .expect("load blocks");

    for height in start..ids.len() {
        let id = ids[height];
        assert_eq!(
            cache.median_time_past(height as i32).expect("mtp"),
            store.median_time_past(id).expect("read").expect("stored"),
            "median time at height {height}"
        );
        assert_eq!(
            cache.chain_work(height as i32).expect("work"),
            store.chain_work(id).expect("read").expect("stored"),
        );
        assert_eq!(cache.block_id(height as i32).expect("id"), id);
    }
}

#[test]
fn load_blocks_ignores_mismatched_lists() {
    let (store, ids, headers) = build_chain(5);
    let cache = ChainMetadataCache::new(store, 7);
    cache
        .load_blocks(0, &ids, &headers[..2])
        .expect("mismatch is not an error");
    // Segment 7 was never indexed, so nothing resolves.
    assert!(cache.median_time_past(1).is_err());
}

#[test]
fn load_block_seeds_single_height() {
    let (store, ids, headers) = build_chain(5);
    let cache = ChainMetadataCache::new(Arc::clone(&store), 3);
    cache
        .load_block(2, ids[2], headers[2].clone())
        .expect("load block");
    assert_eq!(cache.block_header(2).expect("header"), headers[2]);
    assert_eq!(cache.block_id(2).expect("id"), ids[2]);
}

#[test]
fn median_time_cache_is_segment_scoped() {
    let (store, ids, _) = build_chain(12);
    let main = MedianTimeCache::new(Arc::clone(&store), 0);
    let expected = store.median_time_past(ids[11]).expect("read").expect("stored");
    assert_eq!(main.median_time_past(11).expect("mtp"), expected);

    let other = MedianTimeCache::new(Arc::clone(&store), 1);
    assert!(matches!(
        other.median_time_past(11),
        Err(LookupError::NotFound(_))
    ));
    store.assign_height(1, 11, ids[11]).expect("assign");
    assert_eq!(other.median_time_past(11).expect("mtp"), expected);
}

#[test]
fn shared_cache_serves_concurrent_readers() {
    let (store, ids, headers) = build_chain(20);
    let shared = SharedMedianTimeCache::with_capacity(Arc::clone(&store), 4);

    let expected: Vec<MedianTimePast> = ids
        .iter()
        .map(|id| store.median_time_past(*id).expect("read").expect("stored"))
        .collect();

    thread::scope(|scope| {
        for worker in 0..4 {
            let shared = &shared;
            let expected = &expected;
            let headers = &headers;
            scope.spawn(move || {
                let by_height = shared.for_segment(0);
                for height in (worker..20).step_by(3) {
                    assert_eq!(
                        by_height.median_time_past(height as i32).expect("mtp"),
                        expected[height]
                    );
                    assert_eq!(
                        shared
                            .median_time_past_for_hash(&headers[height].hash())
                            .expect("mtp"),
                        expected[height]
                    );
                }
            });
        }
    });

    assert!(shared.cached_len() <= 4);
    assert!(shared.median_time_past_for_hash(&[0xaa; 32]).is_err());
}

#[test]
fn segment_view_hits_skip_the_store() {
    let (store, ids, _) = build_chain(8);
    let counting = Arc::new(CountingStore::new(Arc::clone(&store)));
    let shared = SharedMedianTimeCache::new(Arc::clone(&counting));
    let by_height = shared.for_segment(0);

    let first = by_height.median_time_past(3).expect("mtp");
    assert_eq!(
        first,
        store.median_time_past(ids[3]).expect("read").expect("stored")
    );
    let after_miss = counting.reads();
    assert!(after_miss > 0);

    assert_eq!(by_height.median_time_past(3).expect("mtp"), first);
    assert_eq!(counting.reads(), after_miss);

    // Another segment sharing the block still resolves its own height once.
    store.assign_height(1, 3, ids[3]).expect("assign");
    assert_eq!(shared.for_segment(1).median_time_past(3).expect("mtp"), first);
    assert!(counting.reads() > after_miss);
}

#[test]
fn shared_cache_evicts_least_recently_used() {
    let (store, _, headers) = build_chain(3);
    let counting = Arc::new(CountingStore::new(store));
    let shared = SharedMedianTimeCache::with_capacity(Arc::clone(&counting), 2);
    let [a, b, c] = [0, 1, 2].map(|height| headers[height].hash());

    shared.median_time_past_for_hash(&a).expect("a");
    shared.median_time_past_for_hash(&b).expect("b");
    let reads = counting.reads();
    shared.median_time_past_for_hash(&a).expect("a again");
    assert_eq!(counting.reads(), reads);

    shared.median_time_past_for_hash(&c).expect("c");
    let reads = counting.reads();
    shared.median_time_past_for_hash(&a).expect("a kept");
    assert_eq!(counting.reads(), reads);
    shared.median_time_past_for_hash(&b).expect("b evicted");
    assert!(counting.reads() > reads);
    assert_eq!(shared.cached_len(), 2);
}
