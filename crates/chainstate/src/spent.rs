//! Block-wide double-spend detection shared across validation workers.

use std::collections::hash_map::RandomState;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::sync::{Mutex, PoisonError};

use utxod_primitives::outpoint::OutPoint;

const SHARDS_PER_THREAD: usize = 4;

/// Concurrent set of outputs claimed during one validation pass.
///
/// Sharded by outpoint hash so workers marking different outputs rarely
/// contend. There is no removal; a tracker lives for exactly one pass.
pub struct SpentOutputTracker {
    shards: Vec<Mutex<HashSet<OutPoint>>>,
    hasher: RandomState,
}

impl SpentOutputTracker {
    pub fn new(estimated_outputs: usize, threads: usize) -> Self {
        let shard_count = (threads.max(1) * SHARDS_PER_THREAD).next_power_of_two();
        let per_shard = estimated_outputs.div_ceil(shard_count);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashSet::with_capacity(per_shard)))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, outpoint: &OutPoint) -> &Mutex<HashSet<OutPoint>> {
        let index = (self.hasher.hash_one(outpoint) as usize) & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// Claims `outpoint`; returns true when it had already been claimed.
    pub fn mark_spent(&self, outpoint: &OutPoint) -> bool {
        let mut shard = self
            .shard(outpoint)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        !shard.insert(outpoint.clone())
    }

    /// Point-in-time copy of every claimed outpoint.
    pub fn spent_outputs(&self) -> HashSet<OutPoint> {
        let mut all = HashSet::new();
        for shard in &self.shards {
            let shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            all.extend(shard.iter().cloned());
        }
        all
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
