//! Preloaded, block-scoped view of spendable outputs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use utxod_primitives::block::Block;
use utxod_primitives::hash::hash256_to_hex;
use utxod_primitives::outpoint::OutPoint;
use utxod_storage::StoreError;

use crate::context::{LookupError, UnspentOutputContext, UtxoStore};
use crate::undo::{UndoError, UtxoUndoLog};
use crate::utxo::{created_outpoints, created_outputs, UtxoEntry};

/// Cache of exactly the outputs a batch of blocks needs to spend.
///
/// Contents are speculative until the owning block is connected. Reads are
/// pure; `update` is the only mutator once loading is done and must not race
/// with readers.
#[derive(Clone, Debug, Default)]
pub struct UtxoView {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl UtxoView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches every distinct output spent by `block`'s non-coinbase inputs
    /// that the block does not create itself.
    ///
    /// Returns `Ok(false)` when any of them is unavailable or when two inputs
    /// of the block spend the same output. Loading continues past a miss so
    /// the view can be filled speculatively for blocks whose parents are still
    /// pending.
    pub fn load_outputs_for_block<U: UtxoStore + ?Sized>(
        &mut self,
        store: &U,
        block: &Block,
    ) -> Result<bool, StoreError> {
        let created = created_outpoints(block);
        let mut seen = HashSet::new();
        let mut required = Vec::new();
        let mut complete = true;

        for tx in block.transactions.iter().skip(1) {
            for input in &tx.vin {
                if !seen.insert(&input.prevout) {
                    utxod_log::log_debug!(
                        "block {} spends {} more than once",
                        hash256_to_hex(&block.hash()),
                        input.prevout
                    );
                    complete = false;
                    continue;
                }
                if created.contains(&input.prevout) || self.entries.contains_key(&input.prevout)
                {
                    continue;
                }
                required.push(input.prevout.clone());
            }
        }

        if required.is_empty() {
            return Ok(complete);
        }

        let fetched = store.unspent_outputs(&required)?;
        for (outpoint, entry) in required.into_iter().zip(fetched) {
            match entry {
                Some(entry) => {
                    self.entries.insert(outpoint, entry);
                }
                None => {
                    utxod_log::log_debug!("unspent output {} not available", outpoint);
                    complete = false;
                }
            }
        }
        Ok(complete)
    }

    /// Preloads for a block on a branch other than the one `base` reflects.
    ///
    /// `disconnected` runs from the current tip back to the fork point;
    /// `connected` runs from the fork point towards `block`.
    pub fn load_outputs_for_branch<U: UtxoStore>(
        &mut self,
        base: U,
        disconnected: &[&Block],
        connected: &[(&Block, i32)],
        block: &Block,
    ) -> Result<bool, UndoError> {
        let mut overlay = UtxoUndoLog::new(base);
        for undone in disconnected {
            overlay.undo_block(undone)?;
        }
        for (applied, height) in connected {
            overlay.apply_block(applied, *height);
        }
        Ok(self.load_outputs_for_block(&overlay, block)?)
    }

    /// Applies a connected block: spent outputs leave, created outputs enter.
    pub fn update(&mut self, block: &Block, height: i32) {
        let spent: HashSet<&OutPoint> = block
            .transactions
            .iter()
            .skip(1)
            .flat_map(|tx| tx.vin.iter().map(|input| &input.prevout))
            .collect();
        for outpoint in &spent {
            self.entries.remove(*outpoint);
        }
        for (outpoint, entry) in created_outputs(block, height) {
            if !spent.contains(&outpoint) {
                self.entries.insert(outpoint, entry);
            }
        }
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl UnspentOutputContext for UtxoView {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, LookupError> {
        Ok(self.get(outpoint).cloned())
    }
}

#[derive(Clone, Debug)]
pub enum PendingTask {
    Load(Arc<Block>),
    Update(Arc<Block>, i32),
}

#[derive(Default)]
struct DeferredState {
    view: UtxoView,
    queue: VecDeque<PendingTask>,
}

/// A [`UtxoView`] whose loads and updates are queued and replayed in order on
/// the first read.
///
/// A load that cannot resolve every output stops the replay with that task
/// still queued; reads then report [`LookupError::Pending`].
pub struct DeferredUtxoView<U> {
    store: U,
    state: RwLock<DeferredState>,
}

impl<U: UtxoStore> DeferredUtxoView<U> {
    pub fn new(store: U) -> Self {
        Self {
            store,
            state: RwLock::new(DeferredState::default()),
        }
    }

    pub fn queue_load(&self, block: Arc<Block>) -> Result<(), LookupError> {
        self.write()?.queue.push_back(PendingTask::Load(block));
        Ok(())
    }

    pub fn queue_update(&self, block: Arc<Block>, height: i32) -> Result<(), LookupError> {
        self.write()?
            .queue
            .push_back(PendingTask::Update(block, height));
        Ok(())
    }

    pub fn pending_tasks(&self) -> Result<usize, LookupError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.queue.len())
    }

    /// Replays queued tasks; returns the number still queued afterwards.
    pub fn flush(&self) -> Result<usize, LookupError> {
        let mut state = self.write()?;
        self.drain(&mut state)?;
        Ok(state.queue.len())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DeferredState>, LookupError> {
        self.state.write().map_err(|_| poisoned())
    }

    fn drain(&self, state: &mut DeferredState) -> Result<(), StoreError> {
        let DeferredState { view, queue } = state;
        while let Some(task) = queue.front() {
            match task {
                PendingTask::Load(block) => {
                    if !view.load_outputs_for_block(&self.store, block)? {
                        utxod_log::log_debug!(
                            "deferred load of block {} incomplete, {} tasks left queued",
                            hash256_to_hex(&block.hash()),
                            queue.len()
                        );
                        return Ok(());
                    }
                }
                PendingTask::Update(block, height) => view.update(block, *height),
            }
            queue.pop_front();
        }
        Ok(())
    }
}

impl<U: UtxoStore> UnspentOutputContext for DeferredUtxoView<U> {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, LookupError> {
        {
            let state = self.state.read().map_err(|_| poisoned())?;
            if state.queue.is_empty() {
                return Ok(state.view.get(outpoint).cloned());
            }
        }

        let mut state = self.write()?;
        self.drain(&mut state)?;
        if !state.queue.is_empty() {
            return Err(LookupError::Pending {
                tasks: state.queue.len(),
            });
        }
        Ok(state.view.get(outpoint).cloned())
    }
}

fn poisoned() -> LookupError {
    LookupError::Store(StoreError::Backend("utxo view lock poisoned".to_string()))
}
