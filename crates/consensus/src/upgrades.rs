//! Network upgrade schedule.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UpgradeIndex {
    /// Relative lock times via input sequence numbers.
    Bip68 = 0,
    /// Median time past as the reference for time-based lock times.
    Bip113 = 1,
    /// Minimum transaction size of 100 bytes.
    Hf20181115 = 2,
    /// Per-transaction signature check limit.
    Hf20200515 = 3,
    /// Minimum transaction size relaxed to 65 bytes, versions restricted to 1 and 2.
    Hf20230515 = 4,
}

pub const MAX_NETWORK_UPGRADES: usize = 5;

impl UpgradeIndex {
    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

pub type Hash256 = [u8; 32];

#[derive(Clone, Copy, Debug)]
pub struct NetworkUpgrade {
    pub activation_height: i32,
}

impl NetworkUpgrade {
    pub const ALWAYS_ACTIVE: i32 = 0;
    pub const NO_ACTIVATION_HEIGHT: i32 = -1;

    pub const fn at(activation_height: i32) -> Self {
        Self { activation_height }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpgradeState {
    Disabled,
    Pending,
    Active,
}

pub fn network_upgrade_state(
    height: i32,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
    idx: UpgradeIndex,
) -> UpgradeState {
    let activation_height = upgrades[idx.as_usize()].activation_height;
    if activation_height == NetworkUpgrade::NO_ACTIVATION_HEIGHT {
        UpgradeState::Disabled
    } else if height >= activation_height {
        UpgradeState::Active
    } else {
        UpgradeState::Pending
    }
}

pub fn network_upgrade_active(
    height: i32,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
    idx: UpgradeIndex,
) -> bool {
    network_upgrade_state(height, upgrades, idx) == UpgradeState::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{consensus_params, Network};

    #[test]
    fn mainnet_activation_edges() {
        let params = consensus_params(Network::Mainnet);

        assert!(!network_upgrade_active(
            419_327,
            &params.upgrades,
            UpgradeIndex::Bip68
        ));
        assert!(network_upgrade_active(
            419_328,
            &params.upgrades,
            UpgradeIndex::Bip68
        ));
        assert!(network_upgrade_active(
            419_328,
            &params.upgrades,
            UpgradeIndex::Bip113
        ));

        assert!(!network_upgrade_active(
            556_766,
            &params.upgrades,
            UpgradeIndex::Hf20181115
        ));
        assert!(network_upgrade_active(
            556_767,
            &params.upgrades,
            UpgradeIndex::Hf20181115
        ));
    }

    #[test]
    fn disabled_upgrade_never_activates() {
        let mut params = consensus_params(Network::Regtest);
        params.upgrades[UpgradeIndex::Hf20230515.as_usize()] =
            NetworkUpgrade::at(NetworkUpgrade::NO_ACTIVATION_HEIGHT);

        assert_eq!(
            network_upgrade_state(i32::MAX, &params.upgrades, UpgradeIndex::Hf20230515),
            UpgradeState::Disabled
        );
        assert!(network_upgrade_active(
            0,
            &params.upgrades,
            UpgradeIndex::Bip68
        ));
    }
}
