//! Memoizing read-through caches over [`ChainStore`].
//!
//! The height-keyed caches are scoped to one chain segment and confined to a
//! single thread. [`SharedMedianTimeCache`] is keyed by block hash and may be
//! shared by any number of validators.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use utxod_consensus::Hash256;
use utxod_pow::next_chain_work;
use utxod_primitives::block::BlockHeader;
use utxod_primitives::hash::hash256_to_hex;
use utxod_storage::StoreError;

use crate::context::{
    BlockHeaderSource, BlockId, ChainStore, ChainWork, ChainWorkSource, LookupError,
    MedianTimeSource, SegmentId,
};
use crate::store::ChainIndexError;
use crate::time::MedianTimePast;

pub const SHARED_MEDIAN_TIME_CAPACITY: usize = 64;

fn resolve_block_id<C: ChainStore + ?Sized>(
    store: &C,
    segment: SegmentId,
    height: i32,
) -> Result<BlockId, LookupError> {
    store
        .block_id_at_height(segment, height)?
        .ok_or_else(|| LookupError::not_found(format!("block at height {height}")))
}

fn resolve_median_time_past<C: ChainStore + ?Sized>(
    store: &C,
    block_id: BlockId,
) -> Result<MedianTimePast, LookupError> {
    store
        .median_time_past(block_id)?
        .ok_or_else(|| LookupError::not_found(format!("median time past of block {block_id}")))
}

/// Height-keyed median time past for one segment.
pub struct MedianTimeCache<C> {
    store: C,
    segment: SegmentId,
    block_ids: RefCell<HashMap<i32, BlockId>>,
    median_times: RefCell<HashMap<i32, MedianTimePast>>,
}

impl<C: ChainStore> MedianTimeCache<C> {
    pub fn new(store: C, segment: SegmentId) -> Self {
        Self {
            store,
            segment,
            block_ids: RefCell::new(HashMap::new()),
            median_times: RefCell::new(HashMap::new()),
        }
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn block_id(&self, height: i32) -> Result<BlockId, LookupError> {
        if let Some(id) = self.block_ids.borrow().get(&height) {
            return Ok(*id);
        }
        let id = resolve_block_id(&self.store, self.segment, height)?;
        self.block_ids.borrow_mut().insert(height, id);
        Ok(id)
    }
}

impl<C: ChainStore> MedianTimeSource for MedianTimeCache<C> {
    fn median_time_past(&self, height: i32) -> Result<MedianTimePast, LookupError> {
        if let Some(mtp) = self.median_times.borrow().get(&height) {
            return Ok(*mtp);
        }
        let id = self.block_id(height)?;
        let mtp = resolve_median_time_past(&self.store, id)?;
        self.median_times.borrow_mut().insert(height, mtp);
        Ok(mtp)
    }
}

#[derive(Default)]
struct MetadataEntries {
    block_ids: HashMap<i32, BlockId>,
    headers: HashMap<i32, BlockHeader>,
    median_times: HashMap<i32, MedianTimePast>,
    chain_works: HashMap<i32, ChainWork>,
}

/// Height-keyed block id, header, median time past and chain work for one segment.
pub struct ChainMetadataCache<C> {
    store: C,
    segment: SegmentId,
    entries: RefCell<MetadataEntries>,
}

impl<C: ChainStore> ChainMetadataCache<C> {
    pub fn new(store: C, segment: SegmentId) -> Self {
        Self {
            store,
            segment,
            entries: RefCell::new(MetadataEntries::default()),
        }
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn block_id(&self, height: i32) -> Result<BlockId, LookupError> {
        if let Some(id) = self.entries.borrow().block_ids.get(&height) {
            return Ok(*id);
        }
        let id = resolve_block_id(&self.store, self.segment, height)?;
        self.entries.borrow_mut().block_ids.insert(height, id);
        Ok(id)
    }

    /// Seeds the cache for one block whose id and header the caller already holds.
    pub fn load_block(
        &self,
        height: i32,
        block_id: BlockId,
        header: BlockHeader,
    ) -> Result<(), LookupError> {
        let mtp = resolve_median_time_past(&self.store, block_id)?;
        let work = self
            .store
            .chain_work(block_id)?
            .ok_or_else(|| LookupError::not_found(format!("chain work of block {block_id}")))?;
        let mut entries = self.entries.borrow_mut();
        entries.block_ids.insert(height, block_id);
        entries.headers.insert(height, header);
        entries.median_times.insert(height, mtp);
        entries.chain_works.insert(height, work);
        Ok(())
    }

    /// Seeds a contiguous run of heights starting at `start_height`.
    ///
    /// Only the first block's timestamp window and chain work are read from
    /// the store; the rest are folded forward from the supplied headers.
    pub fn load_blocks(
        &self,
        start_height: i32,
        block_ids: &[BlockId],
        headers: &[BlockHeader],
    ) -> Result<(), ChainIndexError> {
        if block_ids.is_empty() {
            return Ok(());
        }
        if block_ids.len() != headers.len() {
            utxod_log::log_warn!(
                "load_blocks ignored: {} block ids but {} headers",
                block_ids.len(),
                headers.len()
            );
            return Ok(());
        }

        let first = block_ids[0];
        let mut window = self
            .store
            .calculate_median_time_past(first)?
            .ok_or(ChainIndexError::MissingBlock(first))?;
        let mut work = self
            .store
            .chain_work(first)?
            .ok_or(ChainIndexError::MissingBlock(first))?;

        let mut entries = self.entries.borrow_mut();
        for (offset, (block_id, header)) in block_ids.iter().zip(headers).enumerate() {
            if offset > 0 {
                window.push(i64::from(header.time));
                work = next_chain_work(work, header.bits)?;
            }
            let height = start_height + offset as i32;
            let mtp = window.median().ok_or(ChainIndexError::MissingBlock(*block_id))?;
            entries.block_ids.insert(height, *block_id);
            entries.headers.insert(height, header.clone());
            entries.median_times.insert(height, mtp);
            entries.chain_works.insert(height, work);
        }
        Ok(())
    }
}

impl<C: ChainStore> MedianTimeSource for ChainMetadataCache<C> {
    fn median_time_past(&self, height: i32) -> Result<MedianTimePast, LookupError> {
        if let Some(mtp) = self.entries.borrow().median_times.get(&height) {
            return Ok(*mtp);
        }
        let id = self.block_id(height)?;
        let mtp = resolve_median_time_past(&self.store, id)?;
        self.entries.borrow_mut().median_times.insert(height, mtp);
        Ok(mtp)
    }
}

impl<C: ChainStore> BlockHeaderSource for ChainMetadataCache<C> {
    fn block_header(&self, height: i32) -> Result<BlockHeader, LookupError> {
        if let Some(header) = self.entries.borrow().headers.get(&height) {
            return Ok(header.clone());
        }
        let id = self.block_id(height)?;
        let header = self
            .store
            .block_header(id)?
            .ok_or_else(|| LookupError::not_found(format!("header of block {id}")))?;
        self.entries
            .borrow_mut()
            .headers
            .insert(height, header.clone());
        Ok(header)
    }
}

impl<C: ChainStore> ChainWorkSource for ChainMetadataCache<C> {
    fn chain_work(&self, height: i32) -> Result<ChainWork, LookupError> {
        if let Some(work) = self.entries.borrow().chain_works.get(&height) {
            return Ok(*work);
        }
        let id = self.block_id(height)?;
        let work = self
            .store
            .chain_work(id)?
            .ok_or_else(|| LookupError::not_found(format!("chain work of block {id}")))?;
        self.entries.borrow_mut().chain_works.insert(height, work);
        Ok(work)
    }
}

/// Most recently used entries sit at the back; eviction takes the front.
struct MedianTimeRing {
    entries: VecDeque<(Hash256, MedianTimePast)>,
    capacity: usize,
    /// Segment heights already resolved to a cached hash.
    heights: HashMap<(SegmentId, i32), Hash256>,
}

impl MedianTimeRing {
    fn get(&mut self, hash: &Hash256) -> Option<MedianTimePast> {
        let position = self.entries.iter().position(|(cached, _)| cached == hash)?;
        let entry = self.entries.remove(position)?;
        self.entries.push_back(entry);
        Some(entry.1)
    }

    fn get_at(&mut self, segment: SegmentId, height: i32) -> Option<MedianTimePast> {
        let hash = *self.heights.get(&(segment, height))?;
        let mtp = self.get(&hash);
        if mtp.is_none() {
            self.heights.remove(&(segment, height));
        }
        mtp
    }

    fn insert(&mut self, hash: Hash256, mtp: MedianTimePast) {
        if self.get(&hash).is_some() {
            return;
        }
        self.entries.push_back((hash, mtp));
        while self.entries.len() > self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                self.heights.retain(|_, cached| *cached != evicted);
            }
        }
    }
}

/// Hash-keyed median time past behind one lock.
pub struct SharedMedianTimeCache<C> {
    store: C,
    ring: Mutex<MedianTimeRing>,
}

impl<C: ChainStore> SharedMedianTimeCache<C> {
    pub fn new(store: C) -> Self {
        Self::with_capacity(store, SHARED_MEDIAN_TIME_CAPACITY)
    }

    pub fn with_capacity(store: C, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            ring: Mutex::new(MedianTimeRing {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                heights: HashMap::new(),
            }),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.ring
            .lock()
            .map(|ring| ring.entries.len())
            .unwrap_or_default()
    }

    pub fn median_time_past_for_hash(&self, hash: &Hash256) -> Result<MedianTimePast, LookupError> {
        self.lookup(hash, || {
            self.store
                .block_id_for_hash(hash)?
                .ok_or_else(|| LookupError::not_found(format!("block {}", hash256_to_hex(hash))))
        })
    }

    /// Height-keyed view over this cache for one segment.
    pub fn for_segment(&self, segment: SegmentId) -> SegmentMedianTimes<'_, C> {
        SegmentMedianTimes {
            cache: self,
            segment,
        }
    }

    fn lookup(
        &self,
        hash: &Hash256,
        block_id: impl FnOnce() -> Result<BlockId, LookupError>,
    ) -> Result<MedianTimePast, LookupError> {
        if let Some(mtp) = self.ring.lock().map_err(|_| poisoned())?.get(hash) {
            return Ok(mtp);
        }
        let mtp = resolve_median_time_past(&self.store, block_id()?)?;
        self.ring.lock().map_err(|_| poisoned())?.insert(*hash, mtp);
        Ok(mtp)
    }
}

/// [`SharedMedianTimeCache`] seen through one segment's heights.
pub struct SegmentMedianTimes<'a, C> {
    cache: &'a SharedMedianTimeCache<C>,
    segment: SegmentId,
}

impl<C: ChainStore> MedianTimeSource for SegmentMedianTimes<'_, C> {
    fn median_time_past(&self, height: i32) -> Result<MedianTimePast, LookupError> {
        let cache = self.cache;
        if let Some(mtp) = cache
            .ring
            .lock()
            .map_err(|_| poisoned())?
            .get_at(self.segment, height)
        {
            return Ok(mtp);
        }
        let id = resolve_block_id(&cache.store, self.segment, height)?;
        let header = cache
            .store
            .block_header(id)?
            .ok_or_else(|| LookupError::not_found(format!("header of block {id}")))?;
        let hash = header.hash();
        let mtp = cache.lookup(&hash, || Ok(id))?;
        let mut ring = cache.ring.lock().map_err(|_| poisoned())?;
        if ring.entries.iter().any(|(cached, _)| *cached == hash) {
            ring.heights.insert((self.segment, height), hash);
        }
        Ok(mtp)
    }
}

fn poisoned() -> LookupError {
    LookupError::Store(StoreError::Backend(
        "median time cache lock poisoned".to_string(),
    ))
}
