//! [`ChainStore`] over a [`KeyValueStore`].

use std::fmt;

use utxod_consensus::constants::MEDIAN_TIME_SPAN;
use utxod_consensus::Hash256;
use utxod_pow::difficulty::{hash_to_u256, u256_to_hash};
use utxod_pow::{block_proof, next_chain_work, CompactError};
use utxod_primitives::block::BlockHeader;
use utxod_primitives::encoding::{decode, encode};
use utxod_primitives::hash::hash256_to_hex;
use utxod_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::context::{BlockId, ChainStore, ChainWork, SegmentId};
use crate::time::{MedianTimePast, MedianTimeWindow};

const NEXT_BLOCK_ID_KEY: &[u8] = b"next_block_id";

#[derive(Debug)]
pub enum ChainIndexError {
    Store(StoreError),
    MissingBlock(BlockId),
    MissingParent(Hash256),
    Compact(CompactError),
}

impl fmt::Display for ChainIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainIndexError::Store(err) => write!(f, "{err}"),
            ChainIndexError::MissingBlock(id) => write!(f, "block {id} not indexed"),
            ChainIndexError::MissingParent(hash) => {
                write!(f, "parent block {} not indexed", hash256_to_hex(hash))
            }
            ChainIndexError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChainIndexError {}

impl From<StoreError> for ChainIndexError {
    fn from(err: StoreError) -> Self {
        ChainIndexError::Store(err)
    }
}

impl From<CompactError> for ChainIndexError {
    fn from(err: CompactError) -> Self {
        ChainIndexError::Compact(err)
    }
}

fn height_key(segment: SegmentId, height: i32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&segment.to_be_bytes());
    key[8..].copy_from_slice(&height.to_be_bytes());
    key
}

fn decode_block_id(bytes: &[u8]) -> Result<BlockId, StoreError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("invalid block id length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

fn decode_i64(bytes: &[u8]) -> Result<i64, StoreError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("invalid median time length {}", bytes.len())))?;
    Ok(i64::from_le_bytes(array))
}

fn decode_work(bytes: &[u8]) -> Result<ChainWork, StoreError> {
    let array: Hash256 = bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("invalid chain work length {}", bytes.len())))?;
    Ok(hash_to_u256(&array))
}

/// Block metadata index.
///
/// Blocks get sequential ids. Writes are not synchronized with each other;
/// `insert_block` and `assign_height` must come from one thread.
pub struct KvChainStore<S> {
    store: S,
}

impl<S: KeyValueStore> KvChainStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Indexes `header` at `height` of `segment` and derives its median time
    /// past and chain work from its parent. A header whose parent is the zero
    /// hash starts a new chain.
    pub fn insert_block(
        &self,
        segment: SegmentId,
        height: i32,
        header: &BlockHeader,
    ) -> Result<BlockId, ChainIndexError> {
        let hash = header.hash();
        if let Some(existing) = self.block_id_for_hash(&hash)? {
            self.assign_height(segment, height, existing)?;
            return Ok(existing);
        }

        let (mut window, work) = if header.is_genesis() {
            (MedianTimeWindow::new(), block_proof(header.bits)?)
        } else {
            let parent = self
                .block_id_for_hash(&header.prev_block)?
                .ok_or(ChainIndexError::MissingParent(header.prev_block))?;
            let window = self
                .calculate_median_time_past(parent)?
                .ok_or(ChainIndexError::MissingBlock(parent))?;
            let parent_work = self
                .chain_work(parent)?
                .ok_or(ChainIndexError::MissingBlock(parent))?;
            (window, next_chain_work(parent_work, header.bits)?)
        };
        window.push(i64::from(header.time));
        let mtp = window
            .median()
            .map(MedianTimePast::seconds)
            .unwrap_or(i64::from(header.time));

        let id = self.next_block_id()?;
        let id_key = id.to_be_bytes();
        let mut batch = WriteBatch::new();
        batch.put(Column::HeightIndex, height_key(segment, height), id_key);
        batch.put(Column::HashIndex, hash, id_key);
        batch.put(Column::BlockHeader, id_key, encode(header));
        batch.put(Column::MedianTime, id_key, mtp.to_le_bytes());
        batch.put(Column::ChainWork, id_key, u256_to_hash(work));
        batch.put(Column::Meta, NEXT_BLOCK_ID_KEY, (id + 1).to_be_bytes());
        self.store.write_batch(&batch)?;

        utxod_log::log_trace!(
            "indexed block {} as {} at height {} of segment {}",
            hash256_to_hex(&hash),
            id,
            height,
            segment
        );
        Ok(id)
    }

    /// Makes an already indexed block visible at `height` of another segment.
    pub fn assign_height(
        &self,
        segment: SegmentId,
        height: i32,
        block: BlockId,
    ) -> Result<(), StoreError> {
        self.store.put(
            Column::HeightIndex,
            &height_key(segment, height),
            &block.to_be_bytes(),
        )
    }

    fn next_block_id(&self) -> Result<BlockId, StoreError> {
        match self.store.get(Column::Meta, NEXT_BLOCK_ID_KEY)? {
            Some(bytes) => decode_block_id(&bytes),
            None => Ok(1),
        }
    }
}

impl<S: KeyValueStore> ChainStore for KvChainStore<S> {
    fn block_id_at_height(
        &self,
        segment: SegmentId,
        height: i32,
    ) -> Result<Option<BlockId>, StoreError> {
        self.store
            .get(Column::HeightIndex, &height_key(segment, height))?
            .map(|bytes| decode_block_id(&bytes))
            .transpose()
    }

    fn block_id_for_hash(&self, hash: &Hash256) -> Result<Option<BlockId>, StoreError> {
        self.store
            .get(Column::HashIndex, hash)?
            .map(|bytes| decode_block_id(&bytes))
            .transpose()
    }

    fn block_header(&self, block: BlockId) -> Result<Option<BlockHeader>, StoreError> {
        let Some(bytes) = self.store.get(Column::BlockHeader, &block.to_be_bytes())? else {
            return Ok(None);
        };
        decode::<BlockHeader>(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(format!("block {block} header: {err}")))
    }

    fn median_time_past(&self, block: BlockId) -> Result<Option<MedianTimePast>, StoreError> {
        self.store
            .get(Column::MedianTime, &block.to_be_bytes())?
            .map(|bytes| decode_i64(&bytes).map(MedianTimePast))
            .transpose()
    }

    fn calculate_median_time_past(
        &self,
        block: BlockId,
    ) -> Result<Option<MedianTimeWindow>, StoreError> {
        let Some(mut header) = self.block_header(block)? else {
            return Ok(None);
        };
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        loop {
            times.push(i64::from(header.time));
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            let Some(parent) = self.block_id_for_hash(&header.prev_block)? else {
                break;
            };
            match self.block_header(parent)? {
                Some(parent_header) => header = parent_header,
                None => break,
            }
        }
        Ok(Some(MedianTimeWindow::from_times(times.into_iter().rev())))
    }

    fn chain_work(&self, block: BlockId) -> Result<Option<ChainWork>, StoreError> {
        self.store
            .get(Column::ChainWork, &block.to_be_bytes())?
            .map(|bytes| decode_work(&bytes))
            .transpose()
    }
}
