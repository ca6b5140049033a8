//! Network feature flags ("sporks") signed by a trusted key.

use serde::{Deserialize, Serialize};

use crate::{hash_serialized, Hash};

/// Known spork identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SporkId {
    MasternodePaymentEnforcement,
    BudgetEnforcement,
    MasternodePayUpdatedNodes,
    EnableSuperblocks,
}

impl SporkId {
    pub const ALL: [SporkId; 4] = [
        SporkId::MasternodePaymentEnforcement,
        SporkId::BudgetEnforcement,
        SporkId::MasternodePayUpdatedNodes,
        SporkId::EnableSuperblocks,
    ];

    pub fn number(&self) -> u32 {
        match self {
            SporkId::MasternodePaymentEnforcement => 10007,
            SporkId::BudgetEnforcement => 10008,
            SporkId::MasternodePayUpdatedNodes => 10009,
            SporkId::EnableSuperblocks => 10012,
        }
    }

    pub fn from_number(number: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.number() == number)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SporkId::MasternodePaymentEnforcement => "SPORK_8_MASTERNODE_PAYMENT_ENFORCEMENT",
            SporkId::BudgetEnforcement => "SPORK_9_MASTERNODE_BUDGET_ENFORCEMENT",
            SporkId::MasternodePayUpdatedNodes => "SPORK_10_MASTERNODE_PAY_UPDATED_NODES",
            SporkId::EnableSuperblocks => "SPORK_13_ENABLE_SUPERBLOCKS",
        }
    }

    /// Value used until a signed update is seen. A timestamp far in the future means "off".
    pub fn default_value(&self) -> i64 {
        match self {
            SporkId::MasternodePaymentEnforcement => 4_070_908_800, // OFF
            SporkId::BudgetEnforcement => 4_070_908_800,            // OFF
            SporkId::MasternodePayUpdatedNodes => 4_070_908_800,    // OFF
            SporkId::EnableSuperblocks => 4_070_908_800,            // OFF
        }
    }
}

/// A signed spork update (`spork`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SporkMessage {
    pub spork_id: u32,
    pub value: i64,
    pub time_signed: i64,
    pub signature: Vec<u8>,
}

impl SporkMessage {
    pub fn hash(&self) -> Hash {
        hash_serialized(&(self.spork_id, self.value, self.time_signed))
    }

    pub fn signing_payload(&self, hash_scheme: bool) -> Vec<u8> {
        if hash_scheme {
            self.hash().to_vec()
        } else {
            format!("{}{}{}", self.spork_id, self.value, self.time_signed).into_bytes()
        }
    }
}
