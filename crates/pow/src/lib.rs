//! Compact difficulty targets and accumulated chain work.

pub mod difficulty;

pub use difficulty::{block_proof, next_chain_work, CompactError};
pub use primitive_types::U256;
