use serde::{Deserialize, Serialize};

use crate::governance::{
    FinalizedBudgetBroadcast, FinalizedBudgetVote, ProposalBroadcast, ProposalVote,
};
use crate::masternode::{MasternodeBroadcast, MasternodeID, MasternodePing};
use crate::spork::SporkMessage;
use crate::Hash;

/// Identifier of a connected peer, as handed out by the transport.
pub type PeerId = u64;

/// Kind of object announced through an inventory message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryKind {
    BudgetProposal,
    BudgetVote,
    FinalizedBudget,
    FinalizedBudgetVote,
    MasternodeAnnounce,
    MasternodePing,
    Spork,
}

/// Inventory vector entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inv {
    pub kind: InventoryKind,
    pub hash: Hash,
}

impl Inv {
    pub fn new(kind: InventoryKind, hash: Hash) -> Self {
        Inv { kind, hash }
    }
}

/// Asset whose item count is reported at the end of a sync reply (`ssc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncItem {
    MasternodeList,
    BudgetProposals,
    FinalizedBudgets,
}

/// Messages exchanged by the masternode and governance subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernanceMessage {
    /// Vote sync request; `None` asks for everything
    VoteSync(Option<Hash>),
    Proposal(ProposalBroadcast),
    ProposalVote(ProposalVote),
    FinalizedBudget(FinalizedBudgetBroadcast),
    FinalizedBudgetVote(FinalizedBudgetVote),
    MasternodeBroadcast(MasternodeBroadcast),
    MasternodePing(MasternodePing),
    /// Masternode list request; `None` asks for the whole list
    MasternodeList(Option<MasternodeID>),
    Spork(SporkMessage),
    GetSporks,
    SyncStatusCount { item: SyncItem, count: u32 },
}

impl GovernanceMessage {
    /// Wire command tag.
    pub fn command(&self) -> &'static str {
        match self {
            GovernanceMessage::VoteSync(_) => "mnvs",
            GovernanceMessage::Proposal(_) => "mprop",
            GovernanceMessage::ProposalVote(_) => "mvote",
            GovernanceMessage::FinalizedBudget(_) => "fbs",
            GovernanceMessage::FinalizedBudgetVote(_) => "fbvote",
            GovernanceMessage::MasternodeBroadcast(_) => "mnb",
            GovernanceMessage::MasternodePing(_) => "mnp",
            GovernanceMessage::MasternodeList(_) => "dseg",
            GovernanceMessage::Spork(_) => "spork",
            GovernanceMessage::GetSporks => "getsporks",
            GovernanceMessage::SyncStatusCount { .. } => "ssc",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tags() {
        assert_eq!(GovernanceMessage::VoteSync(None).command(), "mnvs");
        assert_eq!(GovernanceMessage::MasternodeList(None).command(), "dseg");
        assert_eq!(GovernanceMessage::GetSporks.command(), "getsporks");
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let bytes = GovernanceMessage::VoteSync(Some([3u8; 32]))
            .to_bytes()
            .unwrap();
        assert!(GovernanceMessage::from_bytes(&bytes[..bytes.len() - 4]).is_err());
    }
}
