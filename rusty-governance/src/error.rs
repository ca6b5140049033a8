//! Error types for the budget subsystem.

use thiserror::Error;

use rusty_masternode::{MasternodeError, SporkError};
use rusty_shared_types::FlatFileError;

/// Reasons a governance fee transaction does not prove the right to propose.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollateralError {
    #[error("can't find collateral tx {0}")]
    TxNotFound(String),
    #[error("collateral tx {0} has no outputs")]
    NoOutputs(String),
    #[error("collateral tx {0} is locked until a later height")]
    Locked(String),
    #[error("invalid script in collateral tx {0}")]
    InvalidScript(String),
    #[error("couldn't find OP_RETURN {expected} paying at least {fee} in {txid}")]
    MissingOpReturn {
        expected: String,
        txid: String,
        fee: u64,
    },
    #[error("collateral transaction {0} is unconfirmed")]
    Unconfirmed(String),
    #[error("collateral transaction {0} not in active chain")]
    NotInActiveChain(String),
    #[error("collateral requires at least {required} confirmations - {found} confirmations")]
    InsufficientConfirmations { required: u64, found: u64 },
}

impl CollateralError {
    /// Confirmed but not deep enough yet; worth retrying on a later block.
    pub fn is_immature(&self) -> bool {
        matches!(self, CollateralError::InsufficientConfirmations { found, .. } if *found >= 1)
    }
}

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("invalid collateral: {0}")]
    Collateral(#[from] CollateralError),
    /// Structural or economic rule violated; the message is the invalid reason
    #[error("{0}")]
    Invalid(String),
    #[error("proposal {0} not found")]
    ProposalNotFound(String),
    #[error("finalized budget {0} not found")]
    BudgetNotFound(String),
    #[error("{0} already known")]
    AlreadyKnown(String),
    #[error("unknown masternode {0}")]
    UnknownMasternode(String),
    #[error("signature invalid")]
    InvalidSignature,
    #[error("new vote older than existing vote - {0}")]
    VoteOlder(String),
    #[error("time between votes is too soon - {elapsed} sec < {min} sec")]
    VoteTooSoon { elapsed: i64, min: i64 },
    #[error("new vote is too far ahead of current time - {time} > {max}")]
    VoteTooFarAhead { time: i64, max: i64 },
    #[error("peer already asked for the full vote sync")]
    SyncAlreadyRequested,
    #[error("blockchain is not synced")]
    NotSynced,
    #[error("no active chain")]
    NoChain,
    #[error("too early for finalization, {blocks} block(s) until the window opens")]
    TooEarlyForFinalization { blocks: u64 },
    #[error("found no proposals for period")]
    EmptyBudget,
    #[error("finalized budget for cycle starting at {0} already submitted")]
    AlreadySubmitted(u64),
    #[error("collateral {0} sent, waiting for confirmations")]
    CollateralPending(String),
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("no wallet available")]
    NoWallet,
    #[error("not running an active masternode")]
    NotMasternode,
    #[error("cache error: {0}")]
    Persistence(#[from] FlatFileError),
    #[error(transparent)]
    Masternode(#[from] MasternodeError),
    #[error(transparent)]
    Spork(#[from] SporkError),
}

impl GovernanceError {
    /// Misbehavior score charged to the peer that sent the offending message.
    pub fn dos_score(&self) -> u32 {
        match self {
            GovernanceError::InvalidSignature => 20,
            GovernanceError::SyncAlreadyRequested => 20,
            GovernanceError::Masternode(e) => e.dos_score(),
            GovernanceError::Spork(e) => e.dos_score(),
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;
