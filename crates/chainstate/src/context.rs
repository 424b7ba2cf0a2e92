//! Narrow read seams over chain metadata and UTXO state.
//!
//! Stores answer `Ok(None)` for missing rows; the validator-facing sources
//! normalize that into [`LookupError::NotFound`].

use std::fmt;
use std::sync::Arc;

use primitive_types::U256;
use utxod_consensus::Hash256;
use utxod_primitives::block::BlockHeader;
use utxod_primitives::outpoint::OutPoint;
use utxod_storage::StoreError;

use crate::time::{MedianTimePast, MedianTimeWindow};
use crate::utxo::UtxoEntry;

pub type BlockId = u64;
/// One contiguous branch of the block tree; heights are only unique within a segment.
pub type SegmentId = u64;
pub type ChainWork = U256;

#[derive(Debug)]
pub enum LookupError {
    NotFound(String),
    Store(StoreError),
    /// Deferred work could not be applied; `tasks` remain queued.
    Pending { tasks: usize },
}

impl LookupError {
    pub fn not_found(what: impl Into<String>) -> Self {
        LookupError::NotFound(what.into())
    }
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::NotFound(what) => write!(f, "{what} not found"),
            LookupError::Store(err) => write!(f, "store failure: {err}"),
            LookupError::Pending { tasks } => {
                write!(f, "{tasks} deferred utxo tasks could not be applied")
            }
        }
    }
}

impl std::error::Error for LookupError {}

impl From<StoreError> for LookupError {
    fn from(err: StoreError) -> Self {
        LookupError::Store(err)
    }
}

pub trait ChainStore: Send + Sync {
    fn block_id_at_height(
        &self,
        segment: SegmentId,
        height: i32,
    ) -> Result<Option<BlockId>, StoreError>;
    fn block_id_for_hash(&self, hash: &Hash256) -> Result<Option<BlockId>, StoreError>;
    fn block_header(&self, block: BlockId) -> Result<Option<BlockHeader>, StoreError>;
    /// The stored median time past of `block`.
    fn median_time_past(&self, block: BlockId) -> Result<Option<MedianTimePast>, StoreError>;
    /// Recomputes the timestamp window ending at `block` from its ancestors' headers.
    fn calculate_median_time_past(
        &self,
        block: BlockId,
    ) -> Result<Option<MedianTimeWindow>, StoreError>;
    fn chain_work(&self, block: BlockId) -> Result<Option<ChainWork>, StoreError>;
}

impl<T: ChainStore + ?Sized> ChainStore for Arc<T> {
    fn block_id_at_height(
        &self,
        segment: SegmentId,
        height: i32,
    ) -> Result<Option<BlockId>, StoreError> {
        self.as_ref().block_id_at_height(segment, height)
    }

    fn block_id_for_hash(&self, hash: &Hash256) -> Result<Option<BlockId>, StoreError> {
        self.as_ref().block_id_for_hash(hash)
    }

    fn block_header(&self, block: BlockId) -> Result<Option<BlockHeader>, StoreError> {
        self.as_ref().block_header(block)
    }

    fn median_time_past(&self, block: BlockId) -> Result<Option<MedianTimePast>, StoreError> {
        self.as_ref().median_time_past(block)
    }

    fn calculate_median_time_past(
        &self,
        block: BlockId,
    ) -> Result<Option<MedianTimeWindow>, StoreError> {
        self.as_ref().calculate_median_time_past(block)
    }

    fn chain_work(&self, block: BlockId) -> Result<Option<ChainWork>, StoreError> {
        self.as_ref().chain_work(block)
    }
}

/// Persisted UTXO source.
pub trait UtxoStore {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError>;

    /// Batch form of [`UtxoStore::unspent_output`], results in request order.
    fn unspent_outputs(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<Vec<Option<UtxoEntry>>, StoreError> {
        outpoints
            .iter()
            .map(|outpoint| self.unspent_output(outpoint))
            .collect()
    }

    /// Output data regardless of whether it has since been spent.
    fn find_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError>;
}

impl<T: UtxoStore + ?Sized> UtxoStore for &T {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        (**self).unspent_output(outpoint)
    }

    fn unspent_outputs(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<Vec<Option<UtxoEntry>>, StoreError> {
        (**self).unspent_outputs(outpoints)
    }

    fn find_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        (**self).find_output(outpoint)
    }
}

/// What the validator treats as currently spendable.
pub trait UnspentOutputContext {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, LookupError>;
}

pub trait MedianTimeSource {
    /// Median time past of the block at `height`.
    fn median_time_past(&self, height: i32) -> Result<MedianTimePast, LookupError>;
}

pub trait BlockHeaderSource {
    fn block_header(&self, height: i32) -> Result<BlockHeader, LookupError>;
}

pub trait ChainWorkSource {
    fn chain_work(&self, height: i32) -> Result<ChainWork, LookupError>;
}
