//! Diagnostic dump for rejected transactions.

use std::sync::Mutex;

use serde_json::{json, Value};
use utxod_primitives::encoding::encode;
use utxod_primitives::hash::{bytes_to_hex, hash256_to_hex};
use utxod_primitives::transaction::{Transaction, TxOut};

use crate::time::MedianTimePast;

static REPORT_LOCK: Mutex<()> = Mutex::new(());

/// What the validator knew at the point it gave up on a transaction.
#[derive(Debug, Default)]
pub(crate) struct Trace {
    pub median_time_past: Option<MedianTimePast>,
    pub input_index: Option<usize>,
    pub spent_output: Option<TxOut>,
    pub previous_outputs: Vec<TxOut>,
}

pub(crate) fn invalid_transaction_report(
    error_message: &str,
    transaction: &Transaction,
    block_height: i32,
    network_time: i64,
    trace: &Trace,
) -> Value {
    let input = trace
        .input_index
        .and_then(|index| transaction.vin.get(index));
    let spent = trace.spent_output.as_ref();
    json!({
        "errorMessage": error_message,
        "transactionHash": hash256_to_hex(&transaction.txid()),
        "inputIndex": trace.input_index,
        "transactionBytes": bytes_to_hex(&encode(transaction)),
        "inputBytes": input.map(|input| bytes_to_hex(&encode(input))),
        "previousOutputBytes": spent.map(|output| bytes_to_hex(&encode(output))),
        "blockHeight": block_height,
        "lockingScriptBytes": spent.map(|output| bytes_to_hex(&output.script_pubkey)),
        "unlockingScriptBytes": input.map(|input| bytes_to_hex(&input.script_sig)),
        "medianBlockTime": trace.median_time_past.map(MedianTimePast::seconds),
        "networkTime": network_time,
        "previousOutputs": trace
            .previous_outputs
            .iter()
            .map(|output| bytes_to_hex(&encode(output)))
            .collect::<Vec<_>>(),
    })
}

/// Writes one report as a single debug record. Concurrent validators never
/// interleave their dumps.
pub(crate) fn emit(report: &Value) {
    let _guard = REPORT_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    utxod_log::log_fields!(utxod_log::Level::Debug, report, "invalid transaction");
}
