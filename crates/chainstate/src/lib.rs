//! UTXO chainstate and contextual transaction validation.

pub mod block;
pub mod context;
pub mod expenditure;
pub mod factory;
pub mod metadata;
pub mod outputs;
mod report;
pub mod script;
pub mod spent;
pub mod store;
pub mod time;
pub mod undo;
pub mod utxo;
pub mod validator;
pub mod view;

pub use block::{validate_block_transactions, BlockValidationSummary};
pub use context::{
    BlockHeaderSource, BlockId, ChainStore, ChainWork, ChainWorkSource, LookupError,
    MedianTimeSource, SegmentId, UnspentOutputContext, UtxoStore,
};
pub use expenditure::{total_expenditure, ExpenditureResult};
pub use factory::TransactionValidatorFactory;
pub use metadata::{ChainMetadataCache, MedianTimeCache, SharedMedianTimeCache};
pub use outputs::BlockOutputs;
pub use script::{ScriptContext, ScriptExecutor};
pub use spent::SpentOutputTracker;
pub use store::{ChainIndexError, KvChainStore};
pub use time::{MedianTimePast, MedianTimeWindow, NetworkTime, SystemNetworkTime};
pub use undo::{UndoError, UtxoUndoLog};
pub use utxo::{UtxoEntry, UtxoSet};
pub use validator::{RejectReason, TransactionValidator, ValidationResult, ValidatorConfig};
pub use view::{DeferredUtxoView, UtxoView};
