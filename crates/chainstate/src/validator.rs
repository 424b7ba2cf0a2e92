//! Contextual transaction validation.
//!
//! A [`TransactionValidator`] answers one question: may this transaction be
//! included in a block at a given height, given the outputs it spends and the
//! chain's recent timestamps? Structural and script-level checks beyond that
//! live elsewhere; scripts are run through the [`ScriptExecutor`] seam.

use std::collections::HashSet;
use std::fmt;

use utxod_consensus::constants::{
    LOCKTIME_THRESHOLD, MAX_TX_SIGCHECKS, MIN_TX_SIZE, MIN_TX_SIZE_LEGACY, SEQUENCE_FINAL,
    SEQUENCE_LOCKTIME_DISABLE_FLAG, SEQUENCE_LOCKTIME_GRANULARITY, SEQUENCE_LOCKTIME_MASK,
    SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use utxod_consensus::params::ConsensusParams;
use utxod_consensus::upgrades::{network_upgrade_active, UpgradeIndex};
use utxod_primitives::outpoint::OutPoint;
use utxod_primitives::transaction::{Transaction, TxOut};

use crate::context::{LookupError, MedianTimeSource, UnspentOutputContext};
use crate::outputs::BlockOutputs;
use crate::report::{self, Trace};
use crate::script::{ScriptContext, ScriptExecutor};
use crate::time::{MedianTimePast, NetworkTime};
use crate::utxo::UtxoEntry;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidatorConfig {
    /// Emit a JSON dump of every rejected transaction at debug level.
    pub log_invalid_transactions: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            log_invalid_transactions: true,
        }
    }
}

/// A definite consensus violation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RejectReason {
    TooSmall { size: usize, minimum: usize },
    UnsupportedVersion(i32),
    LockTimeNotReached { lock_time: u32, reference: i64 },
    SecondsLockNotReached { elapsed: i64, required: i64 },
    BlocksLockNotReached { elapsed: i64, required: i64 },
    NoInputs,
    DuplicateInput(OutPoint),
    ImmatureCoinbase { outpoint: OutPoint, depth: i64 },
    MissingOutput(OutPoint),
    InputValueOverflow,
    ScriptFailed { input_index: usize },
    NoOutputs,
    NegativeOutput { index: usize },
    OutputValueOverflow,
    InsufficientInputValue { input: i64, output: i64 },
    TooManySigChecks { count: u32, limit: u32 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TooSmall { size, minimum } => {
                write!(f, "invalid byte count: {size} < {minimum}")
            }
            RejectReason::UnsupportedVersion(version) => {
                write!(f, "invalid transaction version {version}")
            }
            RejectReason::LockTimeNotReached {
                lock_time,
                reference,
            } => write!(f, "lock time {lock_time} not reached at {reference}"),
            RejectReason::SecondsLockNotReached { elapsed, required } => {
                write!(f, "relative lock time not reached: {elapsed} < {required} seconds")
            }
            RejectReason::BlocksLockNotReached { elapsed, required } => {
                write!(f, "relative lock height not reached: {elapsed} < {required} blocks")
            }
            RejectReason::NoInputs => write!(f, "transaction has no inputs"),
            RejectReason::DuplicateInput(outpoint) => {
                write!(f, "transaction spends {outpoint} twice")
            }
            RejectReason::ImmatureCoinbase { outpoint, depth } => {
                write!(f, "coinbase output {outpoint} spent at depth {depth} before maturity")
            }
            RejectReason::MissingOutput(outpoint) => {
                write!(f, "transaction output {outpoint} does not exist or has been spent")
            }
            RejectReason::InputValueOverflow => write!(f, "total input value out of range"),
            RejectReason::ScriptFailed { input_index } => {
                write!(f, "input {input_index} failed to unlock its output")
            }
            RejectReason::NoOutputs => write!(f, "transaction has no outputs"),
            RejectReason::NegativeOutput { index } => {
                write!(f, "output {index} has a negative amount")
            }
            RejectReason::OutputValueOverflow => write!(f, "total output value out of range"),
            RejectReason::InsufficientInputValue { input, output } => {
                write!(f, "total input value {input} is less than output value {output}")
            }
            RejectReason::TooManySigChecks { count, limit } => {
                write!(f, "signature operation count {count} exceeds {limit}")
            }
        }
    }
}

#[derive(Debug)]
pub enum ValidationResult {
    Valid { signature_operations: u32 },
    Invalid(RejectReason),
    /// A required output or chain value could not be read; the caller decides
    /// whether to retry.
    Unresolved(LookupError),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            ValidationResult::Valid { .. } => None,
            ValidationResult::Invalid(reason) => Some(reason.to_string()),
            ValidationResult::Unresolved(err) => Some(err.to_string()),
        }
    }

    pub fn signature_operation_count(&self) -> Option<u32> {
        match self {
            ValidationResult::Valid {
                signature_operations,
            } => Some(*signature_operations),
            _ => None,
        }
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            ValidationResult::Invalid(reason) => Some(reason),
            _ => None,
        }
    }
}

enum Failure {
    Invalid(RejectReason),
    Unresolved(LookupError),
}

impl From<RejectReason> for Failure {
    fn from(reason: RejectReason) -> Self {
        Failure::Invalid(reason)
    }
}

impl From<LookupError> for Failure {
    fn from(err: LookupError) -> Self {
        Failure::Unresolved(err)
    }
}

pub fn is_final_sequence(tx: &Transaction) -> bool {
    tx.vin.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Seconds a time-typed sequence lock requires, or `None` for a block-typed lock.
pub fn sequence_lock_seconds(sequence: u32) -> Option<i64> {
    if sequence & SEQUENCE_LOCKTIME_TYPE_FLAG == 0 {
        return None;
    }
    Some(i64::from(sequence & SEQUENCE_LOCKTIME_MASK) << SEQUENCE_LOCKTIME_GRANULARITY)
}

/// Validates transactions against one chain context.
///
/// Cheap to build; block-level callers create one per worker.
pub struct TransactionValidator<'a> {
    params: &'a ConsensusParams,
    network_time: &'a dyn NetworkTime,
    scripts: &'a dyn ScriptExecutor,
    median_times: &'a dyn MedianTimeSource,
    utxos: &'a dyn UnspentOutputContext,
    block_outputs: Option<&'a BlockOutputs>,
    logging_enabled: bool,
}

impl<'a> TransactionValidator<'a> {
    pub fn new(
        params: &'a ConsensusParams,
        network_time: &'a dyn NetworkTime,
        scripts: &'a dyn ScriptExecutor,
        median_times: &'a dyn MedianTimeSource,
        utxos: &'a dyn UnspentOutputContext,
    ) -> Self {
        Self {
            params,
            network_time,
            scripts,
            median_times,
            utxos,
            block_outputs: None,
            logging_enabled: ValidatorConfig::default().log_invalid_transactions,
        }
    }

    /// Lets transactions spend outputs created earlier in the block under validation.
    pub fn with_block_outputs(mut self, block_outputs: &'a BlockOutputs) -> Self {
        self.block_outputs = Some(block_outputs);
        self
    }

    pub fn set_logging_enabled(&mut self, enabled: bool) {
        self.logging_enabled = enabled;
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }

    pub fn validate_transaction(&self, spend_height: i32, tx: &Transaction) -> ValidationResult {
        let mut trace = Trace::default();
        match self.evaluate(spend_height, tx, &mut trace) {
            Ok(signature_operations) => ValidationResult::Valid {
                signature_operations,
            },
            Err(Failure::Invalid(reason)) => {
                if self.logging_enabled && utxod_log::enabled(utxod_log::Level::Debug) {
                    let report = report::invalid_transaction_report(
                        &reason.to_string(),
                        tx,
                        spend_height,
                        self.network_time.current_time(),
                        &trace,
                    );
                    report::emit(&report);
                }
                ValidationResult::Invalid(reason)
            }
            Err(Failure::Unresolved(err)) => {
                utxod_log::log_debug!(
                    "transaction at height {} unresolved: {}",
                    spend_height,
                    err
                );
                ValidationResult::Unresolved(err)
            }
        }
    }

    fn upgrade_active(&self, height: i32, upgrade: UpgradeIndex) -> bool {
        network_upgrade_active(height, &self.params.upgrades, upgrade)
    }

    fn evaluate(
        &self,
        spend_height: i32,
        tx: &Transaction,
        trace: &mut Trace,
    ) -> Result<u32, Failure> {
        self.check_size(spend_height, tx)?;

        let mtp = self.median_times.median_time_past(spend_height - 1)?;
        trace.median_time_past = Some(mtp);

        if !is_final_sequence(tx) {
            self.check_lock_time(spend_height, tx, mtp)?;
        }
        if self.upgrade_active(spend_height, UpgradeIndex::Bip68) && tx.version >= 2 {
            self.check_sequence_locks(spend_height, tx, mtp)?;
        }

        let (input_value, signature_operations) =
            self.process_inputs(spend_height, tx, mtp, trace)?;
        check_outputs(tx, input_value)?;

        if self.upgrade_active(spend_height, UpgradeIndex::Hf20200515)
            && signature_operations > MAX_TX_SIGCHECKS
        {
            return Err(RejectReason::TooManySigChecks {
                count: signature_operations,
                limit: MAX_TX_SIGCHECKS,
            }
            .into());
        }
        Ok(signature_operations)
    }

    fn check_size(&self, spend_height: i32, tx: &Transaction) -> Result<(), RejectReason> {
        let minimum = if self.upgrade_active(spend_height, UpgradeIndex::Hf20230515) {
            if tx.version != 1 && tx.version != 2 {
                return Err(RejectReason::UnsupportedVersion(tx.version));
            }
            MIN_TX_SIZE
        } else if self.upgrade_active(spend_height, UpgradeIndex::Hf20181115) {
            MIN_TX_SIZE_LEGACY
        } else {
            return Ok(());
        };
        let size = tx.serialized_size();
        if size < minimum {
            return Err(RejectReason::TooSmall { size, minimum });
        }
        Ok(())
    }

    fn check_lock_time(
        &self,
        spend_height: i32,
        tx: &Transaction,
        mtp: MedianTimePast,
    ) -> Result<(), RejectReason> {
        let reference = if tx.lock_time < LOCKTIME_THRESHOLD {
            i64::from(spend_height)
        } else if self.upgrade_active(spend_height, UpgradeIndex::Bip113) {
            mtp.seconds()
        } else {
            self.network_time.current_time()
        };
        if reference < i64::from(tx.lock_time) {
            return Err(RejectReason::LockTimeNotReached {
                lock_time: tx.lock_time,
                reference,
            });
        }
        Ok(())
    }

    fn check_sequence_locks(
        &self,
        spend_height: i32,
        tx: &Transaction,
        mtp: MedianTimePast,
    ) -> Result<(), Failure> {
        for input in &tx.vin {
            if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
                continue;
            }
            let created = self.creation_height(&input.prevout, spend_height)?;
            match sequence_lock_seconds(input.sequence) {
                Some(required) => {
                    let elapsed = match created {
                        // Outputs of earlier blocks are dated by the block before them.
                        Some(height) if height < spend_height => {
                            let created_mtp = self.median_times.median_time_past(height - 1)?;
                            mtp.seconds() - created_mtp.seconds()
                        }
                        // Created in this block, dated at `spend_height - 1`; or unknown.
                        _ => 0,
                    };
                    if elapsed < required {
                        return Err(
                            RejectReason::SecondsLockNotReached { elapsed, required }.into()
                        );
                    }
                }
                None => {
                    let required = i64::from(input.sequence & SEQUENCE_LOCKTIME_MASK);
                    let created = created.unwrap_or(spend_height);
                    let elapsed = i64::from(spend_height) - i64::from(created);
                    if elapsed < required {
                        return Err(
                            RejectReason::BlocksLockNotReached { elapsed, required }.into()
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Height of the block that created `outpoint`; outputs of the block under
    /// validation report `spend_height`.
    fn creation_height(
        &self,
        outpoint: &OutPoint,
        spend_height: i32,
    ) -> Result<Option<i32>, LookupError> {
        if let Some(entry) = self.utxos.unspent_output(outpoint)? {
            return Ok(Some(entry.height));
        }
        let in_block = self
            .block_outputs
            .is_some_and(|outputs| outputs.contains(outpoint));
        Ok(in_block.then_some(spend_height))
    }

    fn process_inputs(
        &self,
        spend_height: i32,
        tx: &Transaction,
        mtp: MedianTimePast,
        trace: &mut Trace,
    ) -> Result<(i64, u32), Failure> {
        if tx.vin.is_empty() {
            return Err(RejectReason::NoInputs.into());
        }

        let mut seen = HashSet::with_capacity(tx.vin.len());
        let mut total: i64 = 0;
        let mut signature_operations: u32 = 0;
        for (index, input) in tx.vin.iter().enumerate() {
            trace.input_index = Some(index);
            trace.spent_output = None;
            let outpoint = &input.prevout;
            if !seen.insert(outpoint) {
                return Err(RejectReason::DuplicateInput(outpoint.clone()).into());
            }

            let entry = self.utxos.unspent_output(outpoint)?;
            let (output, created, is_coinbase) = self.resolve(outpoint, entry, spend_height)?;
            trace.spent_output = Some(output.clone());
            trace.previous_outputs.push(output.clone());

            if is_coinbase {
                let depth = i64::from(spend_height) - i64::from(created);
                if depth <= i64::from(self.params.coinbase_maturity) {
                    return Err(RejectReason::ImmatureCoinbase {
                        outpoint: outpoint.clone(),
                        depth,
                    }
                    .into());
                }
            }

            total = total
                .checked_add(output.value)
                .ok_or(RejectReason::InputValueOverflow)?;

            let locking_script = output.script_pubkey.clone();
            let mut context = ScriptContext::new(spend_height, mtp, tx, index, output);
            let unlocked = self
                .scripts
                .run(&locking_script, &input.script_sig, &mut context);
            if !unlocked {
                return Err(RejectReason::ScriptFailed { input_index: index }.into());
            }
            signature_operations =
                signature_operations.saturating_add(context.signature_operations());
        }
        Ok((total, signature_operations))
    }

    /// Resolves the spent output with its creation height and coinbase flag.
    ///
    /// The coinbase flag only ever comes from the source that resolved the
    /// output, so an output of unknown origin is rejected rather than treated
    /// as a regular one.
    fn resolve(
        &self,
        outpoint: &OutPoint,
        entry: Option<UtxoEntry>,
        spend_height: i32,
    ) -> Result<(TxOut, i32, bool), RejectReason> {
        if let Some(entry) = entry {
            return Ok((entry.to_tx_out(), entry.height, entry.is_coinbase));
        }
        let in_block = self.block_outputs.and_then(|outputs| {
            let is_coinbase = outputs.is_coinbase_output(outpoint)?;
            Some((outputs.get(outpoint)?.clone(), is_coinbase))
        });
        match in_block {
            Some((output, is_coinbase)) => Ok((output, spend_height, is_coinbase)),
            None => Err(RejectReason::MissingOutput(outpoint.clone())),
        }
    }
}

fn check_outputs(tx: &Transaction, input_value: i64) -> Result<(), RejectReason> {
    if tx.vout.is_empty() {
        return Err(RejectReason::NoOutputs);
    }
    let mut output_value: i64 = 0;
    for (index, output) in tx.vout.iter().enumerate() {
        if output.value < 0 {
            return Err(RejectReason::NegativeOutput { index });
        }
        output_value = output_value
            .checked_add(output.value)
            .ok_or(RejectReason::OutputValueOverflow)?;
    }
    if input_value < output_value {
        return Err(RejectReason::InsufficientInputValue {
            input: input_value,
            output: output_value,
        });
    }
    Ok(())
}
