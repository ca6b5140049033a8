//! Wire representation of budget proposals, finalized budgets and their votes.
//!
//! These are the objects that travel in `mprop`, `mvote`, `fbs` and `fbvote`
//! messages. The ledgers in `rusty-governance` convert them into stored objects
//! that additionally carry votes and validity state.

use serde::{Deserialize, Serialize};

use crate::masternode::MasternodeID;
use crate::{hash_serialized, Hash};

/// Maximum length of a proposal or finalized budget name, in bytes.
pub const MAX_NAME_LEN: usize = 20;
/// Maximum length of a proposal URL, in bytes.
pub const MAX_URL_LEN: usize = 64;

/// Direction of a proposal vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteDirection {
    Abstain,
    Yes,
    No,
}

impl VoteDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            VoteDirection::Abstain => 0,
            VoteDirection::Yes => 1,
            VoteDirection::No => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDirection::Abstain => "ABSTAIN",
            VoteDirection::Yes => "YES",
            VoteDirection::No => "NO",
        }
    }
}

/// A masternode's vote on a budget proposal (`mvote`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalVote {
    pub voter: MasternodeID,
    pub proposal_hash: Hash,
    pub direction: VoteDirection,
    pub time: i64,
    pub signature: Vec<u8>,
}

impl ProposalVote {
    /// Identity of the vote; covers everything but the signature.
    ///
    /// Copies carrying different signatures share this hash, so it is only a
    /// safe dedupe key once the signature has been verified.
    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.voter, &self.proposal_hash, self.direction, self.time))
    }

    /// Bytes the masternode key signs, in the legacy string form or the hash form.
    pub fn signing_payload(&self, hash_scheme: bool) -> Vec<u8> {
        if hash_scheme {
            self.hash().to_vec()
        } else {
            format!(
                "{}{}{}{}",
                self.voter.to_short_string(),
                hex::encode(self.proposal_hash),
                self.direction.as_i32(),
                self.time
            )
            .into_bytes()
        }
    }
}

/// A masternode's ratification vote on a finalized budget (`fbvote`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBudgetVote {
    pub voter: MasternodeID,
    pub budget_hash: Hash,
    pub time: i64,
    pub signature: Vec<u8>,
}

impl FinalizedBudgetVote {
    /// Like [`ProposalVote::hash`], excludes the signature.
    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.voter, &self.budget_hash, self.time))
    }

    pub fn signing_payload(&self, hash_scheme: bool) -> Vec<u8> {
        if hash_scheme {
            self.hash().to_vec()
        } else {
            format!(
                "{}{}{}",
                self.voter.to_short_string(),
                hex::encode(self.budget_hash),
                self.time
            )
            .into_bytes()
        }
    }
}

/// Proposal as broadcast on the wire (`mprop`); carries no votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalBroadcast {
    pub name: String,
    pub url: String,
    /// Time of the block containing the fee transaction, once known
    pub time: i64,
    pub block_start: u64,
    pub block_end: u64,
    /// Amount paid per cycle
    pub amount: u64,
    pub payee: Vec<u8>,
    pub fee_tx_hash: Hash,
}

impl ProposalBroadcast {
    /// Builds a broadcast paying `amount` for `payment_count` cycles starting at `block_start`.
    ///
    /// The end height is placed one block after the last covered cycle so the proposal
    /// stays alive until the cycle after its final payment.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        url: String,
        payment_count: u64,
        payee: Vec<u8>,
        amount: u64,
        block_start: u64,
        cycle_blocks: u64,
        fee_tx_hash: Hash,
    ) -> Self {
        let cycle_start = block_start - block_start % cycle_blocks;
        let block_end = cycle_start + cycle_blocks * payment_count + 1;
        Self {
            name,
            url,
            time: 0,
            block_start,
            block_end,
            amount,
            payee,
            fee_tx_hash,
        }
    }

    /// Proposal identity: name, url, range, amount and payee.
    pub fn hash(&self) -> Hash {
        hash_serialized(&(
            &self.name,
            &self.url,
            self.block_start,
            self.block_end,
            self.amount,
            &self.payee,
        ))
    }
}

/// One scheduled payment inside a finalized budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxBudgetPayment {
    pub proposal_hash: Hash,
    pub payee: Vec<u8>,
    pub amount: u64,
}

/// Finalized budget as broadcast on the wire (`fbs`); carries no votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBudgetBroadcast {
    pub name: String,
    pub block_start: u64,
    pub payments: Vec<TxBudgetPayment>,
    pub fee_tx_hash: Hash,
}

impl FinalizedBudgetBroadcast {
    /// Budget identity: name, start height and ordered payments.
    pub fn hash(&self) -> Hash {
        hash_serialized(&(&self.name, self.block_start, &self.payments))
    }
}

/// Outcome of checking a block's reward transaction against the budget schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrxValidationStatus {
    /// No matching budget payment
    InValid,
    /// Expected budget payment found
    Valid,
    /// The scheduled proposal was already paid this cycle
    DoublePayment,
    /// No finalized budget reached the vote threshold
    VoteThreshold,
}
