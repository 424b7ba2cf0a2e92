//! Consensus parameter definitions.

use crate::constants::COINBASE_MATURITY;
use crate::upgrades::{Hash256, NetworkUpgrade, MAX_NETWORK_UPGRADES};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub hash_genesis_block: Hash256,
    pub coinbase_maturity: i32,
    pub upgrades: [NetworkUpgrade; MAX_NETWORK_UPGRADES],
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

const MAINNET_GENESIS: Hash256 = [
    0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7, 0x4f,
    0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const TESTNET_GENESIS: Hash256 = [
    0x43, 0x49, 0x7f, 0xd7, 0xf8, 0x26, 0x95, 0x71, 0x08, 0xf4, 0xa3, 0x0f, 0xd9, 0xce, 0xc3, 0xae,
    0xba, 0x79, 0x97, 0x20, 0x84, 0xe9, 0x0e, 0xad, 0x01, 0xea, 0x33, 0x09, 0x00, 0x00, 0x00, 0x00,
];

const REGTEST_GENESIS: Hash256 = [
    0x06, 0x22, 0x6e, 0x46, 0x11, 0x1a, 0x0b, 0x59, 0xca, 0xaf, 0x12, 0x60, 0x43, 0xeb, 0x5b, 0xbf,
    0x28, 0xc3, 0x4f, 0x3a, 0x5e, 0x33, 0x2a, 0x1f, 0xc7, 0xb2, 0xb7, 0x3c, 0xf1, 0x88, 0x91, 0x0f,
];

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        hash_genesis_block: MAINNET_GENESIS,
        coinbase_maturity: COINBASE_MATURITY,
        upgrades: [
            NetworkUpgrade::at(419_328),
            NetworkUpgrade::at(419_328),
            NetworkUpgrade::at(556_767),
            NetworkUpgrade::at(635_259),
            NetworkUpgrade::at(792_773),
        ],
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        hash_genesis_block: TESTNET_GENESIS,
        coinbase_maturity: COINBASE_MATURITY,
        upgrades: [
            NetworkUpgrade::at(770_112),
            NetworkUpgrade::at(770_112),
            NetworkUpgrade::at(1_267_996),
            NetworkUpgrade::at(1_378_461),
            NetworkUpgrade::at(1_552_787),
        ],
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        hash_genesis_block: REGTEST_GENESIS,
        coinbase_maturity: COINBASE_MATURITY,
        upgrades: [
            NetworkUpgrade::at(NetworkUpgrade::ALWAYS_ACTIVE),
            NetworkUpgrade::at(NetworkUpgrade::ALWAYS_ACTIVE),
            NetworkUpgrade::at(NetworkUpgrade::ALWAYS_ACTIVE),
            NetworkUpgrade::at(NetworkUpgrade::ALWAYS_ACTIVE),
            NetworkUpgrade::at(NetworkUpgrade::NO_ACTIVATION_HEIGHT),
        ],
    }
}
