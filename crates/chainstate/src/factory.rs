//! Shared validator configuration handed to worker threads.

use std::sync::Arc;

use utxod_consensus::params::ConsensusParams;

use crate::context::{MedianTimeSource, UnspentOutputContext};
use crate::outputs::BlockOutputs;
use crate::script::ScriptExecutor;
use crate::time::NetworkTime;
use crate::validator::{TransactionValidator, ValidatorConfig};

/// Builds [`TransactionValidator`]s that share consensus parameters, the
/// network clock and the script interpreter.
#[derive(Clone)]
pub struct TransactionValidatorFactory {
    params: Arc<ConsensusParams>,
    network_time: Arc<dyn NetworkTime>,
    scripts: Arc<dyn ScriptExecutor>,
    config: ValidatorConfig,
}

impl TransactionValidatorFactory {
    pub fn new(
        params: Arc<ConsensusParams>,
        network_time: Arc<dyn NetworkTime>,
        scripts: Arc<dyn ScriptExecutor>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            params,
            network_time,
            scripts,
            config,
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn config(&self) -> ValidatorConfig {
        self.config
    }

    pub fn new_validator<'a>(
        &'a self,
        median_times: &'a dyn MedianTimeSource,
        utxos: &'a dyn UnspentOutputContext,
        block_outputs: Option<&'a BlockOutputs>,
    ) -> TransactionValidator<'a> {
        let mut validator = TransactionValidator::new(
            &self.params,
            self.network_time.as_ref(),
            self.scripts.as_ref(),
            median_times,
            utxos,
        );
        if let Some(outputs) = block_outputs {
            validator = validator.with_block_outputs(outputs);
        }
        validator.set_logging_enabled(self.config.log_invalid_transactions);
        validator
    }
}
