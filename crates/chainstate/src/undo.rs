//! Reversible overlay over a UTXO store for walking a chain reorganization.

use std::collections::{HashMap, HashSet};
use std::fmt;

use utxod_primitives::block::Block;
use utxod_primitives::hash::hash256_to_hex;
use utxod_primitives::outpoint::OutPoint;
use utxod_storage::StoreError;

use crate::context::UtxoStore;
use crate::utxo::{created_outpoints, created_outputs, UtxoEntry};

#[derive(Debug)]
pub enum UndoError {
    /// An output the undone block spent could not be found in the base store.
    MissingOutput(OutPoint),
    Store(StoreError),
}

impl fmt::Display for UndoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoError::MissingOutput(outpoint) => {
                write!(f, "spent output {outpoint} missing from store")
            }
            UndoError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for UndoError {}

impl From<StoreError> for UndoError {
    fn from(err: StoreError) -> Self {
        UndoError::Store(err)
    }
}

/// Lookups consult `uncreated` first, then `re_available`, then the base store.
///
/// Single writer only: undo/redo/apply must be serialized by the caller.
pub struct UtxoUndoLog<U> {
    base: U,
    re_available: HashMap<OutPoint, UtxoEntry>,
    uncreated: HashSet<OutPoint>,
    /// Outputs spent by an applied block and released again by its undo.
    reopened: HashSet<OutPoint>,
}

impl<U> UtxoUndoLog<U> {
    pub fn new(base: U) -> Self {
        Self {
            base,
            re_available: HashMap::new(),
            uncreated: HashSet::new(),
            reopened: HashSet::new(),
        }
    }

    pub fn base(&self) -> &U {
        &self.base
    }

    pub fn re_available_count(&self) -> usize {
        self.re_available.len()
    }

    pub fn uncreated_count(&self) -> usize {
        self.uncreated.len()
    }
}

impl<U: UtxoStore> UtxoUndoLog<U> {
    /// Walks `block` backwards: outputs it spent become spendable again and
    /// outputs it created stop existing. Blocks must be undone tip first.
    pub fn undo_block(&mut self, block: &Block) -> Result<(), UndoError> {
        let created = created_outpoints(block);
        let mut restored = Vec::new();
        for tx in block.transactions.iter().skip(1) {
            for input in &tx.vin {
                if created.contains(&input.prevout) {
                    continue;
                }
                let entry = self
                    .find_output(&input.prevout)?
                    .ok_or_else(|| UndoError::MissingOutput(input.prevout.clone()))?;
                restored.push((input.prevout.clone(), entry));
            }
        }

        let restored_count = restored.len();
        for (outpoint, entry) in restored {
            if self.uncreated.remove(&outpoint) {
                self.reopened.insert(outpoint.clone());
            }
            self.re_available.insert(outpoint, entry);
        }
        let created_count = created.len();
        self.uncreated.extend(created);
        utxod_log::log_debug!(
            "undo block {}: {} outputs restored, {} uncreated",
            hash256_to_hex(&block.hash()),
            restored_count,
            created_count
        );
        Ok(())
    }

    /// Exact inverse of [`UtxoUndoLog::undo_block`]; nothing is re-fetched.
    pub fn redo_block(&mut self, block: &Block) {
        let created = created_outpoints(block);
        for tx in block.transactions.iter().skip(1) {
            for input in &tx.vin {
                if created.contains(&input.prevout) {
                    continue;
                }
                self.re_available.remove(&input.prevout);
                if self.reopened.remove(&input.prevout) {
                    self.uncreated.insert(input.prevout.clone());
                }
            }
        }
        for outpoint in &created {
            self.uncreated.remove(outpoint);
        }
        utxod_log::log_debug!("redo block {}", hash256_to_hex(&block.hash()));
    }

    /// Walks `block` forward onto the branch being switched to.
    pub fn apply_block(&mut self, block: &Block, height: i32) {
        let mut spent = HashSet::new();
        for tx in block.transactions.iter().skip(1) {
            for input in &tx.vin {
                self.re_available.remove(&input.prevout);
                self.reopened.remove(&input.prevout);
                self.uncreated.insert(input.prevout.clone());
                spent.insert(input.prevout.clone());
            }
        }
        for (outpoint, entry) in created_outputs(block, height) {
            if spent.contains(&outpoint) {
                continue;
            }
            self.uncreated.remove(&outpoint);
            self.re_available.insert(outpoint, entry);
        }
        utxod_log::log_debug!(
            "apply block {} at height {}",
            hash256_to_hex(&block.hash()),
            height
        );
    }

    pub fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        if self.uncreated.contains(outpoint) {
            return Ok(None);
        }
        if let Some(entry) = self.re_available.get(outpoint) {
            return Ok(Some(entry.clone()));
        }
        self.base.unspent_output(outpoint)
    }
}

impl<U: UtxoStore> UtxoStore for UtxoUndoLog<U> {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        UtxoUndoLog::unspent_output(self, outpoint)
    }

    fn find_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        if let Some(entry) = self.re_available.get(outpoint) {
            return Ok(Some(entry.clone()));
        }
        self.base.find_output(outpoint)
    }
}
