use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use utxod_chainstate::block::validate_block_transactions;
use utxod_chainstate::context::{LookupError, MedianTimeSource};
use utxod_chainstate::expenditure::total_expenditure;
use utxod_chainstate::outputs::BlockOutputs;
use utxod_chainstate::script::{ScriptContext, ScriptExecutor};
use utxod_chainstate::spent::SpentOutputTracker;
use utxod_chainstate::time::{MedianTimePast, SystemNetworkTime};
use utxod_chainstate::utxo::UtxoSet;
use utxod_chainstate::validator::{RejectReason, ValidatorConfig};
use utxod_chainstate::view::UtxoView;
use utxod_chainstate::TransactionValidatorFactory;
use utxod_consensus::params::{consensus_params, Network};
use utxod_primitives::block::{Block, BlockHeader};
use utxod_primitives::outpoint::OutPoint;
use utxod_primitives::transaction::{Transaction, TxIn, TxOut};
use utxod_storage::memory::MemoryStore;
use utxod_storage::{KeyValueStore, WriteBatch};

struct Times;

impl MedianTimeSource for Times {
    fn median_time_past(&self, height: i32) -> Result<MedianTimePast, LookupError> {
        Ok(MedianTimePast(1_600_000_000 + i64::from(height) * 600))
    }
}

struct CountingScripts;

impl ScriptExecutor for CountingScripts {
    fn run(
        &self,
        _locking_script: &[u8],
        unlocking_script: &[u8],
        context: &mut ScriptContext<'_>,
    ) -> bool {
        context.add_signature_operations(1);
        unlocking_script.first() != Some(&0x00)
    }
}

fn coinbase_tx(height: i32, value: i64) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey: vec![0x51; 25],
        }],
        lock_time: 0,
    }
}

fn spend_tx(prevouts: &[OutPoint], values: &[i64], unlock: u8) -> Transaction {
    Transaction {
        version: 1,
        vin: prevouts
            .iter()
            .map(|prevout| TxIn {
                prevout: prevout.clone(),
                script_sig: vec![unlock; 72],
                sequence: u32::MAX,
            })
            .collect(),
        vout: values
            .iter()
            .map(|value| TxOut {
                value: *value,
                script_pubkey: vec![0x52; 25],
            })
            .collect(),
        lock_time: 0,
    }
}

fn make_block(transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 4,
            prev_block: [1u8; 32],
            merkle_root: [0u8; 32],
            time: 1_600_100_000,
            bits: 0x207f_ffff,
            nonce: 0,
        },
        transactions,
    }
}

fn factory() -> TransactionValidatorFactory {
    TransactionValidatorFactory::new(
        Arc::new(consensus_params(Network::Regtest)),
        Arc::new(SystemNetworkTime::new()),
        Arc::new(CountingScripts),
        ValidatorConfig {
            log_invalid_transactions: false,
        },
    )
}

/// A store holding one mature coinbase output worth 10_000 per funding tag.
fn funded_set(tags: &[i32]) -> (UtxoSet<MemoryStore>, Vec<OutPoint>) {
    let set = UtxoSet::new(MemoryStore::new());
    let mut outpoints = Vec::new();
    for tag in tags {
        let block = make_block(vec![coinbase_tx(*tag, 10_000)]);
        let mut batch = WriteBatch::new();
        set.connect_block(&mut batch, &block, 10).expect("connect");
        set.store().write_batch(&batch).expect("commit");
        outpoints.push(OutPoint::new(block.transactions[0].txid(), 0));
    }
    (set, outpoints)
}

#[test]
fn block_with_chained_spends_validates() {
    let (set, funds) = funded_set(&[1, 2]);
    let first = spend_tx(&[funds[0].clone()], &[9_000], 0x30);
    let chained = spend_tx(&[OutPoint::new(first.txid(), 0)], &[8_500], 0x30);
    let second = spend_tx(&[funds[1].clone()], &[10_000], 0x30);
    let block = make_block(vec![coinbase_tx(500, 1), first, chained, second]);

    let mut view = UtxoView::new();
    assert!(view.load_outputs_for_block(&set, &block).expect("load"));

    let summary =
        validate_block_transactions(&factory(), &block, 500, &Times, &view).expect("validate");
    assert!(summary.is_valid(), "{:?}", summary.rejected);
    assert_eq!(summary.signature_operations, 3);
    assert_eq!(summary.expenditure.total_fees, 1_000 + 500);
}

#[test]
fn script_failure_and_double_spend_are_reported() {
    let (set, funds) = funded_set(&[1, 2]);
    let failing = spend_tx(&[funds[0].clone()], &[9_000], 0x00);
    let spend_a = spend_tx(&[funds[1].clone()], &[9_000], 0x30);
    let spend_b = spend_tx(&[funds[1].clone()], &[8_000], 0x30);
    let failing_id = failing.txid();
    let block = make_block(vec![coinbase_tx(500, 1), failing, spend_a, spend_b]);

    let mut view = UtxoView::new();
    // Two transactions spend `funds[1]`, so preload already flags the block.
    assert!(!view.load_outputs_for_block(&set, &block).expect("load"));

    let summary =
        validate_block_transactions(&factory(), &block, 500, &Times, &view).expect("validate");
    assert!(!summary.is_valid());
    assert!(!summary.is_unresolved());
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].0, failing_id);
    assert_eq!(
        summary.rejected[0].1.reject_reason(),
        Some(&RejectReason::ScriptFailed { input_index: 0 })
    );
    // Only one of the conflicting spends can claim the output.
    assert_eq!(summary.expenditure.invalid_transactions.len(), 1);
}

#[test]
fn expenditure_flags_overspending_transaction() {
    let (set, funds) = funded_set(&[1]);
    let overspend = spend_tx(&[funds[0].clone()], &[10_001], 0x30);
    let overspend_id = overspend.txid();
    let block = make_block(vec![coinbase_tx(500, 1), overspend]);

    let mut view = UtxoView::new();
    view.load_outputs_for_block(&set, &block).expect("load");
    let outputs = BlockOutputs::from_block(&block);
    let tracker = SpentOutputTracker::new(outputs.len(), 2);

    let result = total_expenditure(&block, &view, &outputs, &tracker).expect("expenditure");
    assert!(!result.is_valid());
    assert_eq!(result.invalid_transactions, vec![overspend_id]);
    assert!(tracker.spent_outputs().contains(&funds[0]));
}

#[test]
fn tracker_admits_exactly_one_claim_per_output() {
    let tracker = SpentOutputTracker::new(64, 8);
    let contested = OutPoint::new([0x42; 32], 0);
    let winners: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = &tracker;
                let contested = &contested;
                scope.spawn(move || {
                    let mut won = 0usize;
                    for round in 0..50u32 {
                        if !tracker.mark_spent(contested) {
                            won += 1;
                        }
                        tracker.mark_spent(&OutPoint::new([worker as u8; 32], round + 1));
                    }
                    won
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker"))
            .sum()
    });

    assert_eq!(winners, 1);
    let spent: HashSet<OutPoint> = tracker.spent_outputs();
    assert!(spent.contains(&contested));
    assert_eq!(spent.len(), 1 + 8 * 50);
    assert_eq!(tracker.len(), spent.len());
}
