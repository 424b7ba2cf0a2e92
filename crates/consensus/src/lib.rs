//! Consensus constants, parameters, and upgrade schedule.

pub mod constants;
pub mod params;
pub mod upgrades;

pub use params::{consensus_params, ConsensusParams, Network};
pub use upgrades::{network_upgrade_active, Hash256, UpgradeIndex};
