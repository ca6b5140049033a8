//! Budget proposals and the ledger that holds them.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rusty_shared_types::governance::{
    ProposalBroadcast, ProposalVote, VoteDirection, MAX_NAME_LEN, MAX_URL_LEN,
};
use rusty_shared_types::masternode::MasternodeID;
use rusty_shared_types::script::is_normal_payment_script;
use rusty_shared_types::{short_hash, ChainParams, Hash, COIN};

use crate::collateral::{CollateralKind, ValidityContext};
use crate::error::{GovernanceError, Result};
use crate::vote::VoteMap;

/// Smallest amount a proposal may request per cycle.
pub const MIN_PROPOSAL_AMOUNT: u64 = 10 * COIN;

/// A proposal as stored locally: the broadcast fields plus votes and validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetProposal {
    pub name: String,
    pub url: String,
    /// Time of the block holding the fee transaction
    pub time: i64,
    pub block_start: u64,
    pub block_end: u64,
    pub amount: u64,
    pub payee: Vec<u8>,
    pub fee_tx_hash: Hash,
    pub votes: VoteMap<ProposalVote>,
    /// Amount granted by the last budget projection
    pub allotted: u64,
    pub valid: bool,
    pub invalid_reason: Option<String>,
}

impl BudgetProposal {
    pub fn from_broadcast(broadcast: &ProposalBroadcast) -> Self {
        Self {
            name: broadcast.name.clone(),
            url: broadcast.url.clone(),
            time: broadcast.time,
            block_start: broadcast.block_start,
            block_end: broadcast.block_end,
            amount: broadcast.amount,
            payee: broadcast.payee.clone(),
            fee_tx_hash: broadcast.fee_tx_hash,
            votes: VoteMap::new(),
            allotted: 0,
            valid: false,
            invalid_reason: None,
        }
    }

    /// Wire form without votes.
    pub fn to_broadcast(&self) -> ProposalBroadcast {
        ProposalBroadcast {
            name: self.name.clone(),
            url: self.url.clone(),
            time: self.time,
            block_start: self.block_start,
            block_end: self.block_end,
            amount: self.amount,
            payee: self.payee.clone(),
            fee_tx_hash: self.fee_tx_hash,
        }
    }

    pub fn hash(&self) -> Hash {
        self.to_broadcast().hash()
    }

    pub fn yeas(&self) -> usize {
        self.votes.count_direction(VoteDirection::Yes)
    }

    pub fn nays(&self) -> usize {
        self.votes.count_direction(VoteDirection::No)
    }

    pub fn abstains(&self) -> usize {
        self.votes.count_direction(VoteDirection::Abstain)
    }

    pub fn net_yes(&self) -> i64 {
        self.yeas() as i64 - self.nays() as i64
    }

    /// Share of yes votes among yes and no votes.
    pub fn ratio(&self) -> f64 {
        let yeas = self.yeas();
        let total = yeas + self.nays();
        if total == 0 {
            return 0.0;
        }
        yeas as f64 / total as f64
    }

    pub fn block_start_cycle(&self, cycle_blocks: u64) -> u64 {
        self.block_start - self.block_start % cycle_blocks
    }

    pub fn total_payment_count(&self, cycle_blocks: u64) -> u64 {
        self.block_end.saturating_sub(self.block_start_cycle(cycle_blocks)) / cycle_blocks
    }

    pub fn remaining_payment_count(&self, height: u64, cycle_blocks: u64) -> u64 {
        let current_cycle = height - height % cycle_blocks;
        let remaining = self.block_end.saturating_sub(current_cycle) / cycle_blocks;
        remaining.min(self.total_payment_count(cycle_blocks))
    }

    /// Static checks that do not depend on chain state.
    pub fn is_well_formed(&self, total_budget: u64) -> std::result::Result<(), String> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(format!("Invalid proposal name, limit of {} characters.", MAX_NAME_LEN));
        }
        if self.url.len() > MAX_URL_LEN {
            return Err(format!("Invalid proposal url, limit of {} characters.", MAX_URL_LEN));
        }
        if self.block_end < self.block_start {
            return Err("Invalid nBlockEnd (end before start)".to_string());
        }
        if self.amount < MIN_PROPOSAL_AMOUNT {
            return Err("Invalid nAmount".to_string());
        }
        if self.amount > total_budget {
            return Err("Payment more than max".to_string());
        }
        if self.payee.is_empty() {
            return Err("Invalid Payment Address".to_string());
        }
        if !is_normal_payment_script(&self.payee) {
            return Err("Invalid Script".to_string());
        }
        Ok(())
    }

    fn check_valid(&mut self, ctx: &ValidityContext<'_>) -> std::result::Result<(), String> {
        let removal_threshold = (ctx.enabled_masternodes / 10) as i64;
        if -self.net_yes() > removal_threshold {
            return Err(format!("Proposal {}: Active removal", self.name));
        }
        self.is_well_formed(ctx.params.total_budget(ctx.height))?;
        if self.block_end + ctx.params.budget_cycle_blocks / 2 < ctx.height {
            return Err(format!(
                "Proposal {}: Proposal expired, current height {}",
                self.name, ctx.height
            ));
        }
        if ctx.check_collateral {
            let proof = ctx
                .check_collateral(&self.fee_tx_hash, &self.hash(), CollateralKind::Proposal)
                .map_err(|e| format!("Invalid collateral: {}", e))?;
            self.time = proof.block_time;
        }
        Ok(())
    }

    /// Re-evaluates validity against the current chain. Returns the new state.
    pub fn update_valid(&mut self, ctx: &ValidityContext<'_>) -> bool {
        match self.check_valid(ctx) {
            Ok(()) => {
                self.valid = true;
                self.invalid_reason = None;
            }
            Err(reason) => {
                debug!("proposal {} invalid: {}", short_hash(&self.hash()), reason);
                self.valid = false;
                self.invalid_reason = Some(reason);
            }
        }
        self.valid
    }

    /// Old enough to be funded.
    pub fn is_established(&self, now: i64, params: &ChainParams) -> bool {
        self.time < now - params.proposal_establishment_secs
    }

    /// Covers the whole window and clears the 10% net-yes bar.
    pub fn is_passing(
        &self,
        window_start: u64,
        window_end: u64,
        enabled_masternodes: usize,
        now: i64,
        params: &ChainParams,
    ) -> bool {
        self.valid
            && self.block_start <= window_start
            && self.block_end >= window_end
            && self.net_yes() > (enabled_masternodes / 10) as i64
            && self.is_established(now, params)
    }

    pub fn add_or_update_vote(&mut self, vote: ProposalVote, now: i64) -> Result<bool> {
        self.votes.add_or_update(vote, now)
    }

    pub fn clean_and_remove(&mut self, is_known: impl Fn(&MasternodeID) -> bool) {
        self.votes.revalidate(is_known);
    }
}

impl fmt::Display for BudgetProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}..{}] amount {} yes {} no {}",
            self.name,
            self.block_start,
            self.block_end,
            self.amount,
            self.yeas(),
            self.nays()
        )
    }
}

/// Every known proposal keyed by its hash, plus broadcasts seen on the wire
/// and broadcasts waiting for their collateral to mature.
#[derive(Debug, Clone, Default)]
pub struct ProposalLedger {
    proposals: BTreeMap<Hash, BudgetProposal>,
    seen: HashMap<Hash, ProposalBroadcast>,
    immature: Vec<ProposalBroadcast>,
}

impl ProposalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.proposals.contains_key(hash)
    }

    pub fn find(&self, hash: &Hash) -> Option<BudgetProposal> {
        self.proposals.get(hash).cloned()
    }

    pub(crate) fn get(&self, hash: &Hash) -> Option<&BudgetProposal> {
        self.proposals.get(hash)
    }

    pub(crate) fn get_mut(&mut self, hash: &Hash) -> Option<&mut BudgetProposal> {
        self.proposals.get_mut(hash)
    }

    /// Among proposals named `name`, the one with the most net yes votes.
    pub fn find_by_name(&self, name: &str) -> Option<BudgetProposal> {
        self.proposals
            .values()
            .filter(|p| p.name == name)
            .max_by_key(|p| p.net_yes())
            .cloned()
    }

    pub fn all(&self) -> Vec<BudgetProposal> {
        self.proposals.values().cloned().collect()
    }

    pub fn is_seen(&self, hash: &Hash) -> bool {
        self.seen.contains_key(hash)
    }

    pub fn seen(&self, hash: &Hash) -> Option<ProposalBroadcast> {
        self.seen.get(hash).cloned()
    }

    pub fn add_seen(&mut self, broadcast: ProposalBroadcast) {
        self.seen.insert(broadcast.hash(), broadcast);
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn clear_seen(&mut self) {
        self.seen.clear();
    }

    pub fn push_immature(&mut self, broadcast: ProposalBroadcast) {
        if !self.immature.iter().any(|b| b.hash() == broadcast.hash()) {
            self.immature.push(broadcast);
        }
    }

    pub fn take_immature(&mut self) -> Vec<ProposalBroadcast> {
        std::mem::take(&mut self.immature)
    }

    pub fn immature_count(&self) -> usize {
        self.immature.len()
    }

    /// Validates and inserts a new proposal.
    pub fn add(&mut self, mut proposal: BudgetProposal, ctx: &ValidityContext<'_>) -> Result<Hash> {
        let hash = proposal.hash();
        if self.proposals.contains_key(&hash) {
            return Err(GovernanceError::AlreadyKnown(format!("proposal {}", hex::encode(hash))));
        }
        if !proposal.update_valid(ctx) {
            return Err(GovernanceError::Invalid(
                proposal.invalid_reason.unwrap_or_default(),
            ));
        }
        info!("Added proposal {} ({}) to budget", proposal.name, hex::encode(hash));
        self.proposals.insert(hash, proposal);
        Ok(hash)
    }

    pub fn update_vote(&mut self, vote: ProposalVote, now: i64) -> Result<bool> {
        let proposal = self
            .proposals
            .get_mut(&vote.proposal_hash)
            .ok_or_else(|| GovernanceError::ProposalNotFound(hex::encode(vote.proposal_hash)))?;
        proposal.add_or_update_vote(vote, now)
    }

    pub fn clean_and_remove(&mut self, is_known: impl Fn(&MasternodeID) -> bool) {
        for proposal in self.proposals.values_mut() {
            proposal.clean_and_remove(&is_known);
        }
    }

    /// Revalidates every proposal and drops the ones that became invalid.
    pub fn check_and_remove(&mut self, ctx: &ValidityContext<'_>) -> usize {
        let before = self.proposals.len();
        self.proposals.retain(|hash, proposal| {
            let keep = proposal.update_valid(ctx);
            if !keep {
                info!(
                    "Removing proposal {}: {}",
                    short_hash(hash),
                    proposal.invalid_reason.as_deref().unwrap_or_default()
                );
            }
            keep
        });
        before - self.proposals.len()
    }

    /// Proposals funded in the cycle following `ctx.height`, best first.
    ///
    /// Every passing proposal gets its `allotted` amount updated; one that would
    /// overflow the cycle budget is allotted nothing.
    pub fn get_budget(&mut self, ctx: &ValidityContext<'_>, now: i64) -> Vec<BudgetProposal> {
        let params = ctx.params;
        let window_start = params.next_cycle_start(ctx.height);
        let window_end = window_start + params.budget_cycle_blocks - 1;
        let total_budget = params.total_budget(window_start);

        let mut ranked: Vec<(i64, Hash, Hash)> = self
            .proposals
            .iter()
            .map(|(hash, p)| (p.net_yes(), p.fee_tx_hash, *hash))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut allocated = 0u64;
        let mut funded = Vec::new();
        for (_, _, hash) in ranked {
            let Some(proposal) = self.proposals.get_mut(&hash) else {
                continue;
            };
            if !proposal.is_passing(window_start, window_end, ctx.enabled_masternodes, now, params) {
                continue;
            }
            if allocated + proposal.amount <= total_budget {
                proposal.allotted = proposal.amount;
                allocated += proposal.amount;
                funded.push(proposal.clone());
            } else {
                proposal.allotted = 0;
            }
        }
        funded
    }

    pub fn remove_by_fee_tx(&mut self, fee_tx_hash: &Hash) -> Option<BudgetProposal> {
        let hash = self
            .proposals
            .iter()
            .find(|(_, p)| &p.fee_tx_hash == fee_tx_hash)
            .map(|(hash, _)| *hash)?;
        self.proposals.remove(&hash)
    }

    pub fn set_synced(&mut self, synced: bool) {
        for proposal in self.proposals.values_mut() {
            proposal.votes.set_synced(synced);
        }
    }

    /// Valid proposals matching `filter` with the vote hashes to announce for each.
    pub fn sync_items(&self, filter: Option<&Hash>, partial: bool) -> Vec<(Hash, Vec<Hash>)> {
        self.proposals
            .iter()
            .filter(|(hash, p)| p.valid && filter.map_or(true, |f| f == *hash))
            .map(|(hash, p)| (*hash, p.votes.sync_hashes(partial)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.proposals.clear();
        self.seen.clear();
        self.immature.clear();
    }

    pub(crate) fn snapshot(&self) -> (Vec<BudgetProposal>, HashMap<Hash, ProposalBroadcast>) {
        (self.all(), self.seen.clone())
    }

    pub(crate) fn restore(
        &mut self,
        proposals: Vec<BudgetProposal>,
        seen: HashMap<Hash, ProposalBroadcast>,
    ) {
        self.proposals = proposals.into_iter().map(|p| (p.hash(), p)).collect();
        self.seen = seen;
        self.immature.clear();
    }
}
