//! Seam to the external script interpreter.

use utxod_primitives::transaction::{Transaction, TxOut};

use crate::time::MedianTimePast;

/// Per-input state handed to the interpreter.
///
/// The interpreter reports the signature operations it performed through
/// [`ScriptContext::add_signature_operations`].
#[derive(Debug)]
pub struct ScriptContext<'a> {
    pub block_height: i32,
    pub median_time_past: MedianTimePast,
    pub transaction: &'a Transaction,
    pub input_index: usize,
    pub spent_output: TxOut,
    signature_operations: u32,
}

impl<'a> ScriptContext<'a> {
    pub fn new(
        block_height: i32,
        median_time_past: MedianTimePast,
        transaction: &'a Transaction,
        input_index: usize,
        spent_output: TxOut,
    ) -> Self {
        Self {
            block_height,
            median_time_past,
            transaction,
            input_index,
            spent_output,
            signature_operations: 0,
        }
    }

    pub fn add_signature_operations(&mut self, count: u32) {
        self.signature_operations = self.signature_operations.saturating_add(count);
    }

    pub fn signature_operations(&self) -> u32 {
        self.signature_operations
    }
}

pub trait ScriptExecutor: Send + Sync {
    /// Returns `false` when the unlocking script does not satisfy the locking script.
    fn run(
        &self,
        locking_script: &[u8],
        unlocking_script: &[u8],
        context: &mut ScriptContext<'_>,
    ) -> bool;
}
