//! Rusty Coin masternode budget governance.
//!
//! Masternodes vote on spending proposals; once per cycle a finalized budget
//! fixing the funded proposals is ratified by vote and its payments are
//! injected into the blocks of the following cycle.

pub mod budget_db;
pub mod budget_manager;
pub mod collateral;
pub mod config;
pub mod context;
pub mod error;
pub mod finalized_budget;
pub mod proposal;
pub mod queries;
pub mod vote;

pub use budget_manager::{BudgetCoordinator, BudgetSnapshot, BudgetStats};
pub use collateral::{CollateralKind, BUDGET_FEE_TX, PROPOSAL_FEE_TX};
pub use config::{BudgetConfig, BudgetMode};
pub use context::{spawn_maintenance, BlockPayee, GovernanceContext, MaintenanceHandle};
pub use error::{CollateralError, GovernanceError, Result};
pub use finalized_budget::{FinalizedBudget, FinalizedBudgetLedger};
pub use proposal::{BudgetProposal, ProposalLedger};
pub use vote::{GovernanceVote, VoteCache, VoteMap};

// Re-export commonly used types
pub use rusty_shared_types::governance::*;
