//! Per-network parameters consumed by the masternode and budget subsystems.

use serde::{Deserialize, Serialize};

use crate::{PublicKey, COIN};

/// Which chain the node is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

/// Network-specific constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,
    /// Magic bytes written into every cache file header
    pub message_start: [u8; 4],
    /// Length of one budget payment cycle, in blocks
    pub budget_cycle_blocks: u64,
    /// Confirmations a governance fee transaction needs
    pub budget_fee_confirmations: u64,
    /// Age a proposal needs before it can be funded, in seconds
    pub proposal_establishment_secs: i64,
    /// Lowest protocol version allowed to take part in governance
    pub min_protocol_version: u32,
    /// Confirmations a masternode collateral needs before its broadcast is accepted
    pub masternode_min_confirmations: u64,
    /// Height from which signed objects use the hash-based message scheme
    pub hash_signature_upgrade_height: u64,
    /// Key allowed to sign spork messages
    pub spork_pubkey: Option<PublicKey>,
    /// Block subsidy used to size the per-cycle budget
    pub budget_subsidy: u64,
}

impl ChainParams {
    pub fn main() -> Self {
        Self {
            network: Network::Main,
            message_start: [0x24, 0xc8, 0x27, 0x64],
            budget_cycle_blocks: 43200, // ~30 days at 1 min blocks
            budget_fee_confirmations: 6,
            proposal_establishment_secs: 60 * 60 * 24,
            min_protocol_version: 170_010,
            masternode_min_confirmations: 15,
            hash_signature_upgrade_height: 1_000_000,
            spork_pubkey: None,
            budget_subsidy: 500 * COIN,
        }
    }

    pub fn test() -> Self {
        Self {
            network: Network::Test,
            message_start: [0xfa, 0x1a, 0xf9, 0xbf],
            budget_cycle_blocks: 144,
            budget_fee_confirmations: 3,
            proposal_establishment_secs: 60 * 5,
            min_protocol_version: 170_010,
            masternode_min_confirmations: 15,
            hash_signature_upgrade_height: 1_000,
            spork_pubkey: None,
            budget_subsidy: 500 * COIN,
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            message_start: [0xaa, 0xe8, 0x3f, 0x5f],
            budget_cycle_blocks: 144,
            budget_fee_confirmations: 1,
            proposal_establishment_secs: 60 * 5,
            min_protocol_version: 170_010,
            masternode_min_confirmations: 1,
            hash_signature_upgrade_height: 0,
            spork_pubkey: None,
            budget_subsidy: 500 * COIN,
        }
    }

    pub fn is_main(&self) -> bool {
        self.network == Network::Main
    }

    /// Maximum amount payable from one budget cycle: 10% of a subsidy over 1440 blocks.
    pub fn total_budget(&self, _height: u64) -> u64 {
        ((self.budget_subsidy / 100) * 10) * 1440
    }

    /// First block of the cycle following `height`.
    pub fn next_cycle_start(&self, height: u64) -> u64 {
        height - height % self.budget_cycle_blocks + self.budget_cycle_blocks
    }

    /// Whether objects signed at `height` use the hash-based scheme.
    pub fn uses_hash_signatures(&self, height: u64) -> bool {
        height >= self.hash_signature_upgrade_height
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::main()
    }
}
