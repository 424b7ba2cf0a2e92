//! Outputs created inside the block currently being validated.

use std::collections::HashMap;

use rayon::prelude::*;
use utxod_consensus::Hash256;
use utxod_primitives::block::Block;
use utxod_primitives::outpoint::OutPoint;
use utxod_primitives::transaction::{Transaction, TxOut};

/// Immutable index of every output a block creates, coinbase included.
///
/// Lets later transactions of a block resolve outputs of earlier ones before
/// anything is persisted. Built once per validation pass and shared read-only.
#[derive(Clone, Debug, Default)]
pub struct BlockOutputs {
    outputs: HashMap<OutPoint, TxOut>,
    coinbase_txid: Option<Hash256>,
}

impl BlockOutputs {
    pub fn from_block(block: &Block) -> Self {
        Self::from_transactions(&block.transactions)
    }

    /// The first transaction is taken to be the coinbase.
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let txids: Vec<Hash256> = transactions.par_iter().map(Transaction::txid).collect();
        let capacity = transactions.iter().map(|tx| tx.vout.len()).sum();
        let mut outputs = HashMap::with_capacity(capacity);
        for (tx, txid) in transactions.iter().zip(&txids) {
            for (index, output) in tx.vout.iter().enumerate() {
                outputs.insert(OutPoint::new(*txid, index as u32), output.clone());
            }
        }
        Self {
            outputs,
            coinbase_txid: txids.first().copied(),
        }
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.outputs.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.outputs.contains_key(outpoint)
    }

    /// `None` when the block does not create `outpoint`.
    pub fn is_coinbase_output(&self, outpoint: &OutPoint) -> Option<bool> {
        if !self.outputs.contains_key(outpoint) {
            return None;
        }
        Some(self.coinbase_txid == Some(outpoint.hash))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
