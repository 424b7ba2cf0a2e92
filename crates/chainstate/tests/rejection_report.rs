use std::collections::HashMap;
use std::sync::Arc;

use utxod_chainstate::context::{LookupError, MedianTimeSource, UnspentOutputContext};
use utxod_chainstate::script::{ScriptContext, ScriptExecutor};
use utxod_chainstate::time::{MedianTimePast, NetworkTime};
use utxod_chainstate::utxo::UtxoEntry;
use utxod_chainstate::validator::{RejectReason, ValidatorConfig};
use utxod_chainstate::TransactionValidatorFactory;
use utxod_consensus::params::{consensus_params, Network};
use utxod_log::{Format, Level, LogConfig};
use utxod_primitives::encoding::encode;
use utxod_primitives::hash::{bytes_to_hex, hash256_to_hex};
use utxod_primitives::outpoint::OutPoint;
use utxod_primitives::transaction::{Transaction, TxIn, TxOut};

const NETWORK_TIME: i64 = 1_700_000_000;

struct Times;

impl MedianTimeSource for Times {
    fn median_time_past(&self, height: i32) -> Result<MedianTimePast, LookupError> {
        Ok(MedianTimePast(1_600_000_000 + i64::from(height)))
    }
}

struct Clock;

impl NetworkTime for Clock {
    fn current_time(&self) -> i64 {
        NETWORK_TIME
    }
}

struct RejectAll;

impl ScriptExecutor for RejectAll {
    fn run(&self, _: &[u8], _: &[u8], _: &mut ScriptContext<'_>) -> bool {
        false
    }
}

struct Utxos(HashMap<OutPoint, UtxoEntry>);

impl UnspentOutputContext for Utxos {
    fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, LookupError> {
        Ok(self.0.get(outpoint).cloned())
    }
}

// Log configuration is process-wide, so everything lives in one test.
#[test]
fn rejected_transaction_is_dumped_once_per_rejection() {
    utxod_log::init(LogConfig {
        level: Level::Debug,
        format: Format::Json,
        timestamps: false,
    });
    utxod_log::set_stderr_enabled(false);
    utxod_log::enable_capture(32);

    let prevout = OutPoint::new([9u8; 32], 0);
    let spent = TxOut {
        value: 5_000,
        script_pubkey: vec![0x76, 0xa9, 0x14, 0x01, 0x88, 0xac],
    };
    let utxos = Utxos(HashMap::from([(
        prevout.clone(),
        UtxoEntry::new(&spent, 10, false),
    )]));
    let tx = Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout,
            script_sig: vec![0x47; 72],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 4_000,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    };

    let factory = TransactionValidatorFactory::new(
        Arc::new(consensus_params(Network::Regtest)),
        Arc::new(Clock),
        Arc::new(RejectAll),
        ValidatorConfig::default(),
    );
    let mut validator = factory.new_validator(&Times, &utxos, None);

    let result = validator.validate_transaction(300, &tx);
    assert_eq!(
        result.reject_reason(),
        Some(&RejectReason::ScriptFailed { input_index: 0 })
    );

    let records = utxod_log::capture_snapshot(32);
    let dumps: Vec<_> = records
        .iter()
        .filter_map(|record| record.fields.as_ref())
        .collect();
    assert_eq!(dumps.len(), 1);
    let report = dumps[0];
    assert_eq!(report["errorMessage"], result.error_message().unwrap_or_default());
    assert_eq!(report["transactionHash"], hash256_to_hex(&tx.txid()));
    assert_eq!(report["inputIndex"], 0);
    assert_eq!(report["blockHeight"], 300);
    assert_eq!(report["medianBlockTime"], 1_600_000_299i64);
    assert_eq!(report["networkTime"], NETWORK_TIME);
    assert_eq!(report["lockingScriptBytes"], "76a9140188ac");
    assert_eq!(report["unlockingScriptBytes"], bytes_to_hex(&[0x47; 72]));
    assert_eq!(report["previousOutputBytes"], bytes_to_hex(&encode(&spent)));
    assert_eq!(report["transactionBytes"], bytes_to_hex(&encode(&tx)));

    validator.set_logging_enabled(false);
    assert!(!validator.validate_transaction(300, &tx).is_valid());
    let quiet = utxod_log::capture_snapshot(32);
    assert_eq!(
        quiet.iter().filter(|record| record.fields.is_some()).count(),
        1
    );
}
