//! Fee transaction checks shared by proposals and finalized budgets.
//!
//! A fee transaction proves the right to propose: one of its outputs must be
//! `OP_RETURN <object hash>` paying at least the fee for that kind of object,
//! and it must be buried deep enough in the active chain.

use log::debug;

use rusty_shared_types::interfaces::ChainView;
use rusty_shared_types::script::{is_normal_payment_script, is_unspendable, op_return_script};
use rusty_shared_types::{short_hash, ChainParams, Hash, COIN};

use crate::error::CollateralError;

/// Fee burned by a budget proposal.
pub const PROPOSAL_FEE_TX: u64 = 50 * COIN;
/// Fee burned by a finalized budget.
pub const BUDGET_FEE_TX: u64 = 5 * COIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateralKind {
    Proposal,
    Finalization,
}

impl CollateralKind {
    pub fn min_fee(&self) -> u64 {
        match self {
            CollateralKind::Proposal => PROPOSAL_FEE_TX,
            CollateralKind::Finalization => BUDGET_FEE_TX,
        }
    }
}

/// Where a valid fee transaction was mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralProof {
    pub block_height: u64,
    pub block_time: i64,
    pub confirmations: u64,
}

/// Chain state a proposal or finalized budget is validated against.
pub struct ValidityContext<'a> {
    pub chain: &'a dyn ChainView,
    pub params: &'a ChainParams,
    /// Height of the active tip
    pub height: u64,
    /// Enabled masternodes at the active protocol version
    pub enabled_masternodes: usize,
    pub check_collateral: bool,
}

impl<'a> ValidityContext<'a> {
    pub fn check_collateral(
        &self,
        fee_tx_hash: &Hash,
        expected_hash: &Hash,
        kind: CollateralKind,
    ) -> Result<CollateralProof, CollateralError> {
        check_collateral(
            self.chain,
            fee_tx_hash,
            expected_hash,
            kind,
            self.height,
            self.params.budget_fee_confirmations,
        )
    }
}

pub fn check_collateral(
    chain: &dyn ChainView,
    fee_tx_hash: &Hash,
    expected_hash: &Hash,
    kind: CollateralKind,
    current_height: u64,
    required_confirmations: u64,
) -> Result<CollateralProof, CollateralError> {
    let txid = hex::encode(fee_tx_hash);
    let (tx, block_hash) = chain
        .get_transaction(fee_tx_hash)
        .ok_or_else(|| CollateralError::TxNotFound(txid.clone()))?;

    if tx.outputs.is_empty() {
        return Err(CollateralError::NoOutputs(txid));
    }
    if u64::from(tx.lock_time) > current_height {
        return Err(CollateralError::Locked(txid));
    }

    let commitment = op_return_script(expected_hash);
    let fee = kind.min_fee();
    let mut found = false;
    for output in &tx.outputs {
        if !is_normal_payment_script(&output.script_pubkey) && !is_unspendable(&output.script_pubkey) {
            return Err(CollateralError::InvalidScript(txid));
        }
        if output.script_pubkey == commitment && output.value >= fee {
            found = true;
        }
    }
    if !found {
        debug!(
            "{:?} collateral {} does not commit to {}",
            kind,
            short_hash(fee_tx_hash),
            short_hash(expected_hash)
        );
        return Err(CollateralError::MissingOpReturn {
            expected: hex::encode(expected_hash),
            txid,
            fee,
        });
    }

    let block_hash = block_hash.ok_or_else(|| CollateralError::Unconfirmed(txid.clone()))?;
    let (block_height, block_time) = chain
        .block_in_active_chain(&block_hash)
        .ok_or(CollateralError::NotInActiveChain(txid))?;

    let confirmations = (current_height + 1).saturating_sub(block_height);
    if confirmations < required_confirmations {
        debug!(
            "collateral {} has {} of {} confirmations (current height {}, fee tx height {})",
            short_hash(fee_tx_hash),
            confirmations,
            required_confirmations,
            current_height,
            block_height
        );
        return Err(CollateralError::InsufficientConfirmations {
            required: required_confirmations,
            found: confirmations,
        });
    }

    Ok(CollateralProof {
        block_height,
        block_time,
        confirmations,
    })
}
