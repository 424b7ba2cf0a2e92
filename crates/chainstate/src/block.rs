//! Parallel validation of every transaction in a block.

use rayon::prelude::*;
use utxod_consensus::Hash256;
use utxod_primitives::block::Block;
use utxod_primitives::hash::hash256_to_hex;

use crate::context::{LookupError, MedianTimeSource, UnspentOutputContext};
use crate::expenditure::{total_expenditure, ExpenditureResult};
use crate::factory::TransactionValidatorFactory;
use crate::outputs::BlockOutputs;
use crate::spent::SpentOutputTracker;
use crate::validator::ValidationResult;

#[derive(Debug, Default)]
pub struct BlockValidationSummary {
    /// Transactions that did not validate, with their verdicts, in block order.
    pub rejected: Vec<(Hash256, ValidationResult)>,
    pub signature_operations: u64,
    pub expenditure: ExpenditureResult,
}

impl BlockValidationSummary {
    pub fn is_valid(&self) -> bool {
        self.rejected.is_empty() && self.expenditure.is_valid()
    }

    /// True when every rejection was an unresolved lookup rather than a rule violation.
    pub fn is_unresolved(&self) -> bool {
        !self.rejected.is_empty()
            && self
                .rejected
                .iter()
                .all(|(_, result)| matches!(result, ValidationResult::Unresolved(_)))
    }
}

/// Validates the non-coinbase transactions of `block` at `height`.
///
/// `view` must already hold every output the block spends from earlier
/// blocks. Transactions run on the rayon pool, one validator per task.
pub fn validate_block_transactions<M, V>(
    factory: &TransactionValidatorFactory,
    block: &Block,
    height: i32,
    median_times: &M,
    view: &V,
) -> Result<BlockValidationSummary, LookupError>
where
    M: MedianTimeSource + Sync,
    V: UnspentOutputContext + Sync,
{
    let outputs = BlockOutputs::from_block(block);
    let tracker = SpentOutputTracker::new(outputs.len(), rayon::current_num_threads());

    let results: Vec<(Hash256, ValidationResult)> = block
        .transactions
        .par_iter()
        .skip(1)
        .map(|tx| {
            let validator = factory.new_validator(median_times, view, Some(&outputs));
            (tx.txid(), validator.validate_transaction(height, tx))
        })
        .collect();

    let mut summary = BlockValidationSummary::default();
    for (txid, result) in results {
        match result.signature_operation_count() {
            Some(count) => summary.signature_operations += u64::from(count),
            None => summary.rejected.push((txid, result)),
        }
    }

    summary.expenditure = total_expenditure(block, view, &outputs, &tracker)?;
    if !summary.is_valid() {
        utxod_log::log_debug!(
            "block {} at height {}: {} transactions rejected, {} overspent",
            hash256_to_hex(&block.hash()),
            height,
            summary.rejected.len(),
            summary.expenditure.invalid_transactions.len()
        );
    }
    Ok(summary)
}
