//! Finalized budgets: the ratified payment schedule of one budget cycle.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use rusty_shared_types::governance::{
    FinalizedBudgetBroadcast, FinalizedBudgetVote, TrxValidationStatus, TxBudgetPayment,
};
use rusty_shared_types::masternode::MasternodeID;
use rusty_shared_types::script::script_to_string;
use rusty_shared_types::{short_hash, Hash, Transaction, NULL_HASH};

use crate::collateral::{CollateralKind, ValidityContext};
use crate::error::{GovernanceError, Result};
use crate::proposal::{BudgetProposal, ProposalLedger};
use crate::vote::VoteMap;

/// Upper bound on payments in one finalized budget (one payment per block).
pub const MAX_BUDGET_PAYMENTS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedBudget {
    pub name: String,
    pub block_start: u64,
    pub payments: Vec<TxBudgetPayment>,
    pub fee_tx_hash: Hash,
    /// Time of the block holding the fee transaction
    pub time: i64,
    pub votes: VoteMap<FinalizedBudgetVote>,
    pub valid: bool,
    pub invalid_reason: Option<String>,
    /// Proposal hash to the height it was paid at, current cycle only
    #[serde(skip)]
    payment_history: HashMap<Hash, u64>,
    /// Set once the local masternode has compared this budget with its own projection
    #[serde(skip)]
    pub auto_checked: bool,
}

impl FinalizedBudget {
    pub fn from_broadcast(broadcast: &FinalizedBudgetBroadcast) -> Self {
        Self {
            name: broadcast.name.clone(),
            block_start: broadcast.block_start,
            payments: broadcast.payments.clone(),
            fee_tx_hash: broadcast.fee_tx_hash,
            time: 0,
            votes: VoteMap::new(),
            valid: false,
            invalid_reason: None,
            payment_history: HashMap::new(),
            auto_checked: false,
        }
    }

    pub fn to_broadcast(&self) -> FinalizedBudgetBroadcast {
        FinalizedBudgetBroadcast {
            name: self.name.clone(),
            block_start: self.block_start,
            payments: self.payments.clone(),
            fee_tx_hash: self.fee_tx_hash,
        }
    }

    pub fn hash(&self) -> Hash {
        self.to_broadcast().hash()
    }

    /// Last height paid by this budget.
    pub fn block_end(&self) -> u64 {
        (self.block_start + self.payments.len() as u64).saturating_sub(1)
    }

    pub fn covers(&self, height: u64) -> bool {
        height >= self.block_start && height <= self.block_end()
    }

    /// Valid ratification votes.
    pub fn vote_count(&self) -> usize {
        self.votes.count_valid(|_| true)
    }

    pub fn total_payout(&self) -> u64 {
        self.payments.iter().map(|p| p.amount).sum()
    }

    pub fn payment_by_block(&self, height: u64) -> Option<&TxBudgetPayment> {
        let index = height.checked_sub(self.block_start)?;
        self.payments.get(index as usize)
    }

    fn check_valid(&mut self, ctx: &ValidityContext<'_>) -> std::result::Result<(), String> {
        if self.block_start % ctx.params.budget_cycle_blocks != 0 {
            return Err("Invalid BlockStart".to_string());
        }
        if self.block_end().saturating_sub(self.block_start) > MAX_BUDGET_PAYMENTS as u64 {
            return Err("Invalid BlockEnd".to_string());
        }
        if self.payments.len() > MAX_BUDGET_PAYMENTS {
            return Err("Invalid budget payments count (too many)".to_string());
        }
        if self.name.is_empty() {
            return Err("Invalid Budget Name".to_string());
        }
        if self.payments.is_empty() {
            return Err(format!("Budget {} has no payments", self.name));
        }
        if self.block_start == 0 {
            return Err(format!("Budget {} Invalid BlockStart == 0", self.name));
        }
        if self.fee_tx_hash == NULL_HASH {
            return Err(format!("Budget {} Invalid FeeTx == 0", self.name));
        }
        if self.total_payout() > ctx.params.total_budget(self.block_start) {
            return Err(format!("Budget {} Invalid Payout (more than max)", self.name));
        }
        if ctx.check_collateral {
            let proof = ctx
                .check_collateral(&self.fee_tx_hash, &self.hash(), CollateralKind::Finalization)
                .map_err(|e| format!("Budget {} Invalid Collateral : {}", self.name, e))?;
            self.time = proof.block_time;
        }
        Ok(())
    }

    pub fn update_valid(&mut self, ctx: &ValidityContext<'_>) -> bool {
        match self.check_valid(ctx) {
            Ok(()) => {
                self.valid = true;
                self.invalid_reason = None;
            }
            Err(reason) => {
                debug!("finalized budget {} invalid: {}", short_hash(&self.hash()), reason);
                self.valid = false;
                self.invalid_reason = Some(reason);
            }
        }
        self.valid
    }

    /// Records a payment of `proposal_hash` at `height`; true if it was already
    /// paid earlier in this budget's range.
    pub fn is_paid_already(&mut self, proposal_hash: &Hash, height: u64) -> bool {
        let (start, end) = (self.block_start, self.block_end());
        self.payment_history.retain(|hash, paid_at| {
            let current = *paid_at >= start && *paid_at <= end;
            if !current {
                debug!(
                    "budget proposal {} paid at block {} from old cycle deleted",
                    short_hash(hash),
                    paid_at
                );
            }
            current
        });
        if self.payment_history.contains_key(proposal_hash) {
            return true;
        }
        self.payment_history.insert(*proposal_hash, height);
        false
    }

    /// Checks that `tx` carries the payment scheduled for `height`.
    pub fn is_transaction_valid(&mut self, tx: &Transaction, height: u64) -> TrxValidationStatus {
        let Some(payment) = self.payment_by_block(height).cloned() else {
            debug!(
                "finalized budget {}: no payment scheduled at height {} (start {}, end {})",
                self.name,
                height,
                self.block_start,
                self.block_end()
            );
            return TrxValidationStatus::InValid;
        };

        let mut status = TrxValidationStatus::InValid;
        for output in &tx.outputs {
            if output.script_pubkey != payment.payee || output.value != payment.amount {
                continue;
            }
            if self.is_paid_already(&payment.proposal_hash, height) {
                debug!(
                    "double budget payment of {} for proposal {} detected, paying a masternode instead",
                    payment.amount,
                    hex::encode(payment.proposal_hash)
                );
                status = TrxValidationStatus::DoublePayment;
                break;
            }
            status = TrxValidationStatus::Valid;
        }
        if status == TrxValidationStatus::InValid {
            debug!(
                "finalized budget {}: missing required payment {} to {} at height {}",
                self.name,
                payment.amount,
                script_to_string(&payment.payee),
                height
            );
        }
        status
    }

    /// True when the schedule is exactly `expected`: same length, order, hashes,
    /// payees and amounts.
    pub fn matches_proposals(&self, expected: &[BudgetProposal]) -> bool {
        if expected.is_empty() {
            debug!("finalized budget {}: no local budget to compare with", self.name);
            return false;
        }
        if expected.len() != self.payments.len() {
            debug!(
                "finalized budget {}: length {} doesn't match local budget length {}",
                self.name,
                self.payments.len(),
                expected.len()
            );
            return false;
        }
        for (index, (payment, proposal)) in self.payments.iter().zip(expected).enumerate() {
            if payment.proposal_hash != proposal.hash() {
                debug!("finalized budget {}: item #{} hash doesn't match", self.name, index);
                return false;
            }
            if payment.payee != proposal.payee {
                debug!("finalized budget {}: item #{} payee doesn't match", self.name, index);
                return false;
            }
            if payment.amount != proposal.amount {
                debug!(
                    "finalized budget {}: item #{} amount doesn't match {} {}",
                    self.name, index, payment.amount, proposal.amount
                );
                return false;
            }
        }
        true
    }

    /// "OK", or the scheduled proposals that are unknown or differ from the local copy.
    pub fn status(&self, proposals: &ProposalLedger) -> String {
        let mut bad_hashes: Vec<String> = Vec::new();
        let mut bad_payees: Vec<String> = Vec::new();
        for payment in &self.payments {
            match proposals.get(&payment.proposal_hash) {
                None => bad_hashes.push(hex::encode(payment.proposal_hash)),
                Some(proposal) => {
                    if proposal.payee != payment.payee || proposal.amount != payment.amount {
                        bad_payees.push(hex::encode(payment.proposal_hash));
                    }
                }
            }
        }
        if bad_hashes.is_empty() && bad_payees.is_empty() {
            return "OK".to_string();
        }
        let mut report = String::new();
        if !bad_hashes.is_empty() {
            report.push_str("Unknown proposal hash! Check this proposal before voting ");
            report.push_str(&bad_hashes.join(","));
        }
        if !bad_payees.is_empty() {
            report.push_str("Budget payee/nAmount doesn't match our proposal! ");
            report.push_str(&bad_payees.join(","));
        }
        report
    }

    /// Names of the scheduled proposals, or their hashes when unknown.
    pub fn proposals_string(&self, proposals: &ProposalLedger) -> String {
        self.payments
            .iter()
            .map(|payment| match proposals.get(&payment.proposal_hash) {
                Some(proposal) => proposal.name.clone(),
                None => hex::encode(payment.proposal_hash),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn add_or_update_vote(&mut self, vote: FinalizedBudgetVote, now: i64) -> Result<bool> {
        self.votes.add_or_update(vote, now)
    }

    pub fn clean_and_remove(&mut self, is_known: impl Fn(&MasternodeID) -> bool) {
        self.votes.revalidate(is_known);
    }
}

/// Every known finalized budget keyed by its hash.
#[derive(Debug, Clone, Default)]
pub struct FinalizedBudgetLedger {
    budgets: BTreeMap<Hash, FinalizedBudget>,
    seen: HashMap<Hash, FinalizedBudgetBroadcast>,
    immature: Vec<FinalizedBudgetBroadcast>,
    /// Fee transaction to the budget it pays for
    fee_tx_index: HashMap<Hash, Hash>,
}

impl FinalizedBudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.budgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.budgets.contains_key(hash)
    }

    pub fn find(&self, hash: &Hash) -> Option<FinalizedBudget> {
        self.budgets.get(hash).cloned()
    }

    pub(crate) fn get_mut(&mut self, hash: &Hash) -> Option<&mut FinalizedBudget> {
        self.budgets.get_mut(hash)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut FinalizedBudget> {
        self.budgets.values_mut()
    }

    pub fn find_by_fee_tx(&self, fee_tx_hash: &Hash) -> Option<FinalizedBudget> {
        let hash = self.fee_tx_index.get(fee_tx_hash)?;
        self.find(hash)
    }

    pub fn is_seen(&self, hash: &Hash) -> bool {
        self.seen.contains_key(hash)
    }

    pub fn seen(&self, hash: &Hash) -> Option<FinalizedBudgetBroadcast> {
        self.seen.get(hash).cloned()
    }

    pub fn add_seen(&mut self, broadcast: FinalizedBudgetBroadcast) {
        self.seen.insert(broadcast.hash(), broadcast);
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn clear_seen(&mut self) {
        self.seen.clear();
    }

    pub fn push_immature(&mut self, broadcast: FinalizedBudgetBroadcast) {
        if !self.immature.iter().any(|b| b.hash() == broadcast.hash()) {
            self.immature.push(broadcast);
        }
    }

    pub fn take_immature(&mut self) -> Vec<FinalizedBudgetBroadcast> {
        std::mem::take(&mut self.immature)
    }

    pub fn immature_count(&self) -> usize {
        self.immature.len()
    }

    pub fn add(&mut self, mut budget: FinalizedBudget, ctx: &ValidityContext<'_>) -> Result<Hash> {
        let hash = budget.hash();
        if self.budgets.contains_key(&hash) {
            return Err(GovernanceError::AlreadyKnown(format!(
                "finalized budget {}",
                hex::encode(hash)
            )));
        }
        if !budget.update_valid(ctx) {
            return Err(GovernanceError::Invalid(budget.invalid_reason.unwrap_or_default()));
        }
        info!(
            "Added finalized budget {} ({}) starting at {}",
            budget.name,
            hex::encode(hash),
            budget.block_start
        );
        self.fee_tx_index.insert(budget.fee_tx_hash, hash);
        self.budgets.insert(hash, budget);
        Ok(hash)
    }

    pub fn update_vote(&mut self, vote: FinalizedBudgetVote, now: i64) -> Result<bool> {
        let budget = self
            .budgets
            .get_mut(&vote.budget_hash)
            .ok_or_else(|| GovernanceError::BudgetNotFound(hex::encode(vote.budget_hash)))?;
        budget.add_or_update_vote(vote, now)
    }

    pub fn clean_and_remove(&mut self, is_known: impl Fn(&MasternodeID) -> bool) {
        for budget in self.budgets.values_mut() {
            budget.clean_and_remove(&is_known);
        }
    }

    /// Revalidates every budget, drops the invalid ones and returns the hashes
    /// of those still valid.
    pub fn check_and_remove(&mut self, ctx: &ValidityContext<'_>) -> Vec<Hash> {
        let mut removed = Vec::new();
        self.budgets.retain(|hash, budget| {
            let keep = budget.update_valid(ctx);
            if !keep {
                info!(
                    "Removing finalized budget {}: {}",
                    short_hash(hash),
                    budget.invalid_reason.as_deref().unwrap_or_default()
                );
                removed.push(budget.fee_tx_hash);
            }
            keep
        });
        for fee in removed {
            self.fee_tx_index.remove(&fee);
        }
        self.budgets.keys().copied().collect()
    }

    /// Budget covering `height` with the most votes; budgets without votes never win.
    pub fn highest_vote_budget(&self, height: u64) -> Option<&FinalizedBudget> {
        let mut best: Option<&FinalizedBudget> = None;
        for budget in self.budgets.values() {
            let count = budget.vote_count();
            if count > best.map_or(0, |b| b.vote_count()) && budget.covers(height) {
                best = Some(budget);
            }
        }
        best
    }

    /// Most votes on a budget covering `height`, or -1 when none covers it.
    pub fn highest_vote_count(&self, height: u64) -> i64 {
        self.budgets
            .values()
            .filter(|b| b.covers(height))
            .map(|b| b.vote_count() as i64)
            .max()
            .unwrap_or(-1)
    }

    /// A covering budget has more votes than 5% of enabled masternodes.
    pub fn is_budget_payment_block(&self, height: u64, enabled_masternodes: usize) -> bool {
        let highest = self.highest_vote_count(height);
        let five_percent = (enabled_masternodes / 20) as i64;
        debug!(
            "is_budget_payment_block - highest count {}, 5% of masternodes {}, budgets {}",
            highest,
            five_percent,
            self.budgets.len()
        );
        highest > five_percent
    }

    /// Payee and amount the winning budget schedules at `height`, if it reached quorum.
    pub fn payee_and_amount(&self, height: u64, enabled_masternodes: usize) -> Option<(Vec<u8>, u64)> {
        if !self.is_budget_payment_block(height, enabled_masternodes) {
            return None;
        }
        let budget = self.highest_vote_budget(height)?;
        if budget.vote_count() <= enabled_masternodes / 20 {
            return None;
        }
        budget
            .payment_by_block(height)
            .map(|p| (p.payee.clone(), p.amount))
    }

    /// Accepts `tx` if any budget within 10% of the leader schedules a payment it carries.
    pub fn is_transaction_valid(
        &mut self,
        tx: &Transaction,
        height: u64,
        enabled_masternodes: usize,
    ) -> TrxValidationStatus {
        let highest = self
            .budgets
            .values()
            .filter(|b| b.covers(height))
            .map(|b| b.vote_count() as i64)
            .max()
            .unwrap_or(0);
        let five_percent = (enabled_masternodes / 20) as i64;
        debug!(
            "is_transaction_valid - highest count {}, 5% of masternodes {}, budgets {}",
            highest,
            five_percent,
            self.budgets.len()
        );
        if highest < five_percent {
            return TrxValidationStatus::InValid;
        }

        let band = highest - (enabled_masternodes / 10) as i64;
        let mut status = TrxValidationStatus::InValid;
        for budget in self.budgets.values_mut() {
            if budget.vote_count() as i64 > band && budget.covers(height) {
                status = budget.is_transaction_valid(tx, height);
                if status == TrxValidationStatus::Valid {
                    debug!("is_transaction_valid - budget {} passed", budget.name);
                    return status;
                }
            }
        }
        status
    }

    /// Comma-separated proposal hashes scheduled at `height` by any budget.
    pub fn required_payments_string(&self, height: u64) -> String {
        let hashes: Vec<String> = self
            .budgets
            .values()
            .filter_map(|b| b.payment_by_block(height))
            .map(|p| hex::encode(p.proposal_hash))
            .collect();
        if hashes.is_empty() {
            return "unknown-budget".to_string();
        }
        hashes.join(",")
    }

    /// All budgets, most voted first.
    pub fn sorted_by_votes(&self) -> Vec<FinalizedBudget> {
        let mut budgets: Vec<FinalizedBudget> = self.budgets.values().cloned().collect();
        budgets.sort_by(|a, b| b.vote_count().cmp(&a.vote_count()));
        budgets
    }

    pub fn remove_by_fee_tx(&mut self, fee_tx_hash: &Hash) -> Option<FinalizedBudget> {
        let hash = self.fee_tx_index.remove(fee_tx_hash)?;
        self.budgets.remove(&hash)
    }

    pub fn set_synced(&mut self, synced: bool) {
        for budget in self.budgets.values_mut() {
            budget.votes.set_synced(synced);
        }
    }

    pub fn sync_items(&self, filter: Option<&Hash>, partial: bool) -> Vec<(Hash, Vec<Hash>)> {
        self.budgets
            .iter()
            .filter(|(hash, b)| b.valid && filter.map_or(true, |f| f == *hash))
            .map(|(hash, b)| (*hash, b.votes.sync_hashes(partial)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.budgets.clear();
        self.seen.clear();
        self.immature.clear();
        self.fee_tx_index.clear();
    }

    pub(crate) fn snapshot(&self) -> (Vec<FinalizedBudget>, HashMap<Hash, FinalizedBudgetBroadcast>) {
        (self.budgets.values().cloned().collect(), self.seen.clone())
    }

    pub(crate) fn restore(
        &mut self,
        budgets: Vec<FinalizedBudget>,
        seen: HashMap<Hash, FinalizedBudgetBroadcast>,
    ) {
        self.fee_tx_index = budgets.iter().map(|b| (b.fee_tx_hash, b.hash())).collect();
        self.budgets = budgets.into_iter().map(|b| (b.hash(), b)).collect();
        self.seen = seen;
        self.immature.clear();
    }
}
