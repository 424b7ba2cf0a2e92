//! Block-wide fee accounting.

use rayon::prelude::*;
use utxod_consensus::Hash256;
use utxod_primitives::block::Block;
use utxod_primitives::hash::hash256_to_hex;
use utxod_primitives::transaction::Transaction;

use crate::context::{LookupError, UnspentOutputContext};
use crate::outputs::BlockOutputs;
use crate::spent::SpentOutputTracker;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExpenditureResult {
    /// Sum of the fees of every transaction that passed.
    pub total_fees: i64,
    pub invalid_transactions: Vec<Hash256>,
}

impl ExpenditureResult {
    pub fn is_valid(&self) -> bool {
        self.invalid_transactions.is_empty()
    }
}

/// Sums the fees of `block`'s non-coinbase transactions in parallel.
///
/// Every input is marked in `tracker` before it is resolved, so an output
/// spent by two transactions of the block invalidates whichever reaches it
/// second. Outputs resolve through `view` first and then `outputs`.
pub fn total_expenditure<V>(
    block: &Block,
    view: &V,
    outputs: &BlockOutputs,
    tracker: &SpentOutputTracker,
) -> Result<ExpenditureResult, LookupError>
where
    V: UnspentOutputContext + Sync + ?Sized,
{
    let fees: Vec<(Hash256, Option<i64>)> = block
        .transactions
        .par_iter()
        .skip(1)
        .map(|tx| Ok((tx.txid(), transaction_fee(tx, view, outputs, tracker)?)))
        .collect::<Result<_, LookupError>>()?;

    let mut result = ExpenditureResult::default();
    for (txid, fee) in fees {
        match fee.and_then(|fee| result.total_fees.checked_add(fee)) {
            Some(total) => result.total_fees = total,
            None => result.invalid_transactions.push(txid),
        }
    }
    Ok(result)
}

/// `None` when an input cannot be resolved or the outputs exceed the inputs.
fn transaction_fee<V>(
    tx: &Transaction,
    view: &V,
    outputs: &BlockOutputs,
    tracker: &SpentOutputTracker,
) -> Result<Option<i64>, LookupError>
where
    V: UnspentOutputContext + ?Sized,
{
    let mut input_value: i64 = 0;
    for input in &tx.vin {
        if tracker.mark_spent(&input.prevout) {
            utxod_log::log_debug!("output {} already spent within block", input.prevout);
            return Ok(None);
        }
        let value = match view.unspent_output(&input.prevout)? {
            Some(entry) => entry.value,
            None => match outputs.get(&input.prevout) {
                Some(output) => output.value,
                None => {
                    utxod_log::log_debug!(
                        "tx {} input {} not found",
                        hash256_to_hex(&tx.txid()),
                        input.prevout
                    );
                    return Ok(None);
                }
            },
        };
        let Some(total) = input_value.checked_add(value) else {
            return Ok(None);
        };
        input_value = total;
    }

    let Some(output_value) = tx.total_output_value() else {
        return Ok(None);
    };
    if output_value > input_value {
        return Ok(None);
    }
    Ok(Some(input_value - output_value))
}
