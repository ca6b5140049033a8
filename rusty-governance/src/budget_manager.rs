//! Budget coordinator: ties the proposal and finalized budget ledgers to
//! peer messages, block arrival and block assembly.
//!
//! Lock order, outermost first: maintenance guard, finalized budgets,
//! proposals, vote cache, coordinator state, active masternode, registry,
//! sync status. A method may skip levels but never takes them out of order.

use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use rusty_masternode::{ActiveMasternode, MasternodeRegistry, MasternodeSync, SyncAsset};
use rusty_shared_types::governance::{
    FinalizedBudgetBroadcast, FinalizedBudgetVote, ProposalBroadcast, ProposalVote,
    TrxValidationStatus, TxBudgetPayment, VoteDirection,
};
use rusty_shared_types::interfaces::{ChainView, CollateralWallet, PeerGateway};
use rusty_shared_types::masternode::MasternodeID;
use rusty_shared_types::p2p::{GovernanceMessage, Inv, InventoryKind, PeerId, SyncItem};
use rusty_shared_types::script::script_to_string;
use rusty_shared_types::{short_hash, ChainParams, Hash, Transaction, TxOutput, NULL_HASH};

use crate::collateral::{check_collateral, CollateralKind, ValidityContext, BUDGET_FEE_TX};
use crate::config::{BudgetConfig, BudgetMode};
use crate::error::{GovernanceError, Result};
use crate::finalized_budget::{FinalizedBudget, FinalizedBudgetLedger};
use crate::proposal::{BudgetProposal, ProposalLedger};
use crate::vote::{sign_vote, verify_vote, GovernanceVote, VoteCache};

/// Name every locally built finalized budget carries.
pub const FINALIZED_BUDGET_NAME: &str = "main";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializable copy of the coordinator state, written to the budget cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub proposals: Vec<BudgetProposal>,
    pub seen_proposals: HashMap<Hash, ProposalBroadcast>,
    pub budgets: Vec<FinalizedBudget>,
    pub seen_budgets: HashMap<Hash, FinalizedBudgetBroadcast>,
    pub votes: VoteCache,
}

/// Object counts of the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BudgetStats {
    pub proposals: usize,
    pub budgets: usize,
    pub seen_proposals: usize,
    pub seen_proposal_votes: usize,
    pub seen_budgets: usize,
    pub seen_budget_votes: usize,
    pub orphan_votes: usize,
    pub immature: usize,
}

struct CoordinatorState {
    /// Cycle start of the last finalized budget we submitted
    submitted_cycle: Option<u64>,
    /// Budget hash (without fee) to the fee transaction paid for it
    unconfirmed_fee_txs: HashMap<Hash, Hash>,
    /// Peers that already received a full vote sync
    full_sync_peers: HashSet<PeerId>,
    rng: ChaCha8Rng,
}

pub struct BudgetCoordinator {
    chain: Arc<dyn ChainView>,
    peers: Arc<dyn PeerGateway>,
    params: ChainParams,
    config: BudgetConfig,
    registry: Arc<Mutex<MasternodeRegistry>>,
    sync_status: Arc<Mutex<MasternodeSync>>,
    active: Option<Arc<Mutex<ActiveMasternode>>>,
    wallet: Option<Arc<dyn CollateralWallet>>,
    maintenance: Mutex<()>,
    budgets: Mutex<FinalizedBudgetLedger>,
    proposals: Mutex<ProposalLedger>,
    votes: Mutex<VoteCache>,
    state: Mutex<CoordinatorState>,
}

impl BudgetCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainView>,
        peers: Arc<dyn PeerGateway>,
        params: ChainParams,
        config: BudgetConfig,
        registry: Arc<Mutex<MasternodeRegistry>>,
        sync_status: Arc<Mutex<MasternodeSync>>,
        active: Option<Arc<Mutex<ActiveMasternode>>>,
        wallet: Option<Arc<dyn CollateralWallet>>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            chain,
            peers,
            params,
            config,
            registry,
            sync_status,
            active,
            wallet,
            maintenance: Mutex::new(()),
            budgets: Mutex::new(FinalizedBudgetLedger::new()),
            proposals: Mutex::new(ProposalLedger::new()),
            votes: Mutex::new(VoteCache::default()),
            state: Mutex::new(CoordinatorState {
                submitted_cycle: None,
                unconfirmed_fee_txs: HashMap::new(),
                full_sync_peers: HashSet::new(),
                rng,
            }),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.chain.adjusted_time()
    }

    fn enabled_masternodes(&self) -> usize {
        lock(&self.registry).count_enabled(None)
    }

    fn is_synced(&self) -> bool {
        lock(&self.sync_status).is_synced()
    }

    fn added_budget_item(&self, hash: Hash) {
        let now = self.now();
        lock(&self.sync_status).added_budget_item(hash, now);
    }

    fn validity_context(&self, height: u64, enabled_masternodes: usize) -> ValidityContext<'_> {
        ValidityContext {
            chain: self.chain.as_ref(),
            params: &self.params,
            height,
            enabled_masternodes,
            check_collateral: true,
        }
    }

    fn hash_scheme(&self, height: u64) -> bool {
        self.params.uses_hash_signatures(height)
    }

    /// Routes `mnvs`, `mprop`, `mvote`, `fbs` and `fbvote`. Nothing is processed
    /// until the blockchain itself is synced.
    pub fn process_message(&self, peer: PeerId, message: &GovernanceMessage) -> Result<()> {
        if !lock(&self.sync_status).is_blockchain_synced() {
            return Ok(());
        }
        let result = match message {
            GovernanceMessage::VoteSync(filter) => self.process_vote_sync(peer, filter.as_ref()),
            GovernanceMessage::Proposal(broadcast) => self.process_proposal(peer, broadcast),
            GovernanceMessage::ProposalVote(vote) => self.process_proposal_vote(peer, vote),
            GovernanceMessage::FinalizedBudget(broadcast) => {
                self.process_finalized_budget(peer, broadcast)
            }
            GovernanceMessage::FinalizedBudgetVote(vote) => self.process_budget_vote(peer, vote),
            _ => Ok(()),
        };
        if let Err(e) = &result {
            debug!("{} from peer {} rejected: {}", message.command(), peer, e);
        }
        result
    }

    fn process_vote_sync(&self, peer: PeerId, filter: Option<&Hash>) -> Result<()> {
        if filter.is_none() && self.params.is_main() {
            let first_request = lock(&self.state).full_sync_peers.insert(peer);
            if !first_request {
                let err = GovernanceError::SyncAlreadyRequested;
                warn!("mnvs - peer {} already asked for the full vote sync", peer);
                self.peers.misbehaving(peer, err.dos_score());
                return Err(err);
            }
        }
        self.sync(peer, filter, false);
        info!("mnvs - sent budget inventory to peer {}", peer);
        Ok(())
    }

    fn process_proposal(&self, peer: PeerId, broadcast: &ProposalBroadcast) -> Result<()> {
        let hash = broadcast.hash();
        if lock(&self.proposals).is_seen(&hash) {
            self.added_budget_item(hash);
            return Ok(());
        }
        self.add_proposal(broadcast)?;
        self.peers
            .relay_inventory(Inv::new(InventoryKind::BudgetProposal, hash));
        self.added_budget_item(hash);
        info!("mprop - new budget proposal {} from peer {}", hex::encode(hash), peer);
        self.check_orphan_votes();
        Ok(())
    }

    fn process_proposal_vote(&self, peer: PeerId, vote: &ProposalVote) -> Result<()> {
        let hash = vote.hash();
        if lock(&self.votes).seen_proposal_votes.contains_key(&hash) {
            self.added_budget_item(hash);
            return Ok(());
        }
        self.require_known_voter(peer, vote)?;
        // Seen only once signed by the voter; the hash does not cover the signature.
        self.check_signature_or_ask(peer, vote)?;
        lock(&self.votes)
            .seen_proposal_votes
            .insert(hash, vote.clone());
        self.update_proposal(vote, Some(peer))?;
        self.peers
            .relay_inventory(Inv::new(InventoryKind::BudgetVote, hash));
        self.added_budget_item(hash);
        info!(
            "mvote - new budget vote {} for proposal {} from peer {}",
            short_hash(&hash),
            short_hash(&vote.proposal_hash),
            peer
        );
        Ok(())
    }

    fn process_finalized_budget(&self, peer: PeerId, broadcast: &FinalizedBudgetBroadcast) -> Result<()> {
        let hash = broadcast.hash();
        if lock(&self.budgets).is_seen(&hash) {
            self.added_budget_item(hash);
            return Ok(());
        }
        self.add_finalized_budget(broadcast)?;
        self.peers
            .relay_inventory(Inv::new(InventoryKind::FinalizedBudget, hash));
        self.added_budget_item(hash);
        info!("fbs - new finalized budget {} from peer {}", hex::encode(hash), peer);
        self.check_orphan_votes();
        Ok(())
    }

    fn process_budget_vote(&self, peer: PeerId, vote: &FinalizedBudgetVote) -> Result<()> {
        let hash = vote.hash();
        if lock(&self.votes).seen_budget_votes.contains_key(&hash) {
            self.added_budget_item(hash);
            return Ok(());
        }
        self.require_known_voter(peer, vote)?;
        self.check_signature_or_ask(peer, vote)?;
        lock(&self.votes)
            .seen_budget_votes
            .insert(hash, vote.clone());
        self.update_finalized_budget(vote, Some(peer))?;
        self.peers
            .relay_inventory(Inv::new(InventoryKind::FinalizedBudgetVote, hash));
        self.added_budget_item(hash);
        info!(
            "fbvote - new finalized budget vote {} for budget {} from peer {}",
            short_hash(&hash),
            short_hash(&vote.budget_hash),
            peer
        );
        Ok(())
    }

    /// Resolves the voter; an unknown voter is requested from `peer` and the
    /// vote is left unseen so a later copy is processed again.
    fn require_known_voter<V: GovernanceVote>(&self, peer: PeerId, vote: &V) -> Result<()> {
        let mut registry = lock(&self.registry);
        if registry.find(vote.voter()).is_none() {
            debug!(
                "unknown masternode {} for vote {}, asking peer {}",
                vote.voter().to_short_string(),
                short_hash(&vote.hash()),
                peer
            );
            registry.ask_for_mn(peer, vote.voter());
            return Err(GovernanceError::UnknownMasternode(vote.voter().to_short_string()));
        }
        Ok(())
    }

    /// Verifies the vote signature. A bad signature costs the peer only once we
    /// are synced, since the voter's key may simply be outdated locally.
    fn check_signature_or_ask<V: GovernanceVote>(&self, peer: PeerId, vote: &V) -> Result<()> {
        let height = self.chain.best_height().ok_or(GovernanceError::NoChain)?;
        let pubkey = lock(&self.registry)
            .find(vote.voter())
            .map(|mn| mn.masternode_pubkey)
            .ok_or_else(|| GovernanceError::UnknownMasternode(vote.voter().to_short_string()))?;
        if let Err(e) = verify_vote(vote, &pubkey, self.hash_scheme(height)) {
            if self.is_synced() {
                warn!(
                    "signature invalid on vote {} from peer {}",
                    short_hash(&vote.hash()),
                    peer
                );
                self.peers.misbehaving(peer, e.dos_score());
            }
            lock(&self.registry).ask_for_mn(peer, vote.voter());
            return Err(e);
        }
        Ok(())
    }

    /// Checks the fee transaction, then validates and stores the proposal.
    /// Broadcasts whose collateral is confirmed but not deep enough are kept
    /// and retried on later blocks.
    pub fn add_proposal(&self, broadcast: &ProposalBroadcast) -> Result<Hash> {
        let height = self.chain.best_height().ok_or(GovernanceError::NoChain)?;
        let hash = broadcast.hash();
        if let Err(e) = check_collateral(
            self.chain.as_ref(),
            &broadcast.fee_tx_hash,
            &hash,
            CollateralKind::Proposal,
            height,
            self.params.budget_fee_confirmations,
        ) {
            if e.is_immature() {
                debug!("proposal {} collateral immature, retrying later", short_hash(&hash));
                lock(&self.proposals).push_immature(broadcast.clone());
            }
            return Err(e.into());
        }
        let enabled = self.enabled_masternodes();
        let ctx = self.validity_context(height, enabled);
        let mut proposals = lock(&self.proposals);
        proposals.add_seen(broadcast.clone());
        proposals.add(BudgetProposal::from_broadcast(broadcast), &ctx)
    }

    pub fn add_finalized_budget(&self, broadcast: &FinalizedBudgetBroadcast) -> Result<Hash> {
        let height = self.chain.best_height().ok_or(GovernanceError::NoChain)?;
        let hash = broadcast.hash();
        if let Err(e) = check_collateral(
            self.chain.as_ref(),
            &broadcast.fee_tx_hash,
            &hash,
            CollateralKind::Finalization,
            height,
            self.params.budget_fee_confirmations,
        ) {
            if e.is_immature() {
                debug!("finalized budget {} collateral immature, retrying later", short_hash(&hash));
                lock(&self.budgets).push_immature(broadcast.clone());
            }
            return Err(e.into());
        }
        let enabled = self.enabled_masternodes();
        let ctx = self.validity_context(height, enabled);
        let mut budgets = lock(&self.budgets);
        budgets.add_seen(broadcast.clone());
        budgets.add(FinalizedBudget::from_broadcast(broadcast), &ctx)
    }

    /// Applies a proposal vote. A vote for an unknown proposal received from a
    /// peer is parked and the proposal is requested once we are synced.
    pub fn update_proposal(&self, vote: &ProposalVote, peer: Option<PeerId>) -> Result<()> {
        let now = self.now();
        let mut proposals = lock(&self.proposals);
        if !proposals.contains(&vote.proposal_hash) {
            if let Some(peer) = peer {
                if self.is_synced() {
                    let mut votes = lock(&self.votes);
                    votes
                        .orphan_proposal_votes
                        .insert(vote.hash(), (vote.clone(), now));
                    self.ask_for_source(&mut votes, peer, vote.proposal_hash, now);
                }
            }
            return Err(GovernanceError::ProposalNotFound(hex::encode(vote.proposal_hash)));
        }
        proposals.update_vote(vote.clone(), now).map(|_| ())
    }

    pub fn update_finalized_budget(&self, vote: &FinalizedBudgetVote, peer: Option<PeerId>) -> Result<()> {
        let now = self.now();
        let mut budgets = lock(&self.budgets);
        if !budgets.contains(&vote.budget_hash) {
            if let Some(peer) = peer {
                if self.is_synced() {
                    let mut votes = lock(&self.votes);
                    votes
                        .orphan_budget_votes
                        .insert(vote.hash(), (vote.clone(), now));
                    self.ask_for_source(&mut votes, peer, vote.budget_hash, now);
                }
            }
            return Err(GovernanceError::BudgetNotFound(hex::encode(vote.budget_hash)));
        }
        budgets.update_vote(vote.clone(), now).map(|_| ())
    }

    fn ask_for_source(&self, votes: &mut VoteCache, peer: PeerId, target: Hash, now: i64) {
        if votes.asked_for_source.contains_key(&target) {
            return;
        }
        debug!("unknown budget object {}, asking peer {} for source", short_hash(&target), peer);
        self.peers
            .push_message(peer, GovernanceMessage::VoteSync(Some(target)));
        votes.asked_for_source.insert(target, now);
    }

    /// Applies parked votes whose proposal or budget has arrived meanwhile.
    pub fn check_orphan_votes(&self) {
        let now = self.now();
        let mut budgets = lock(&self.budgets);
        let mut proposals = lock(&self.proposals);
        let mut votes = lock(&self.votes);

        let ready: Vec<Hash> = votes
            .orphan_proposal_votes
            .iter()
            .filter(|(_, (vote, _))| proposals.contains(&vote.proposal_hash))
            .map(|(hash, _)| *hash)
            .collect();
        for hash in ready {
            if let Some((vote, _)) = votes.orphan_proposal_votes.remove(&hash) {
                match proposals.update_vote(vote, now) {
                    Ok(_) => debug!("orphan proposal vote {} applied", short_hash(&hash)),
                    Err(e) => debug!("orphan proposal vote {} dropped: {}", short_hash(&hash), e),
                }
            }
        }

        let ready: Vec<Hash> = votes
            .orphan_budget_votes
            .iter()
            .filter(|(_, (vote, _))| budgets.contains(&vote.budget_hash))
            .map(|(hash, _)| *hash)
            .collect();
        for hash in ready {
            if let Some((vote, _)) = votes.orphan_budget_votes.remove(&hash) {
                match budgets.update_vote(vote, now) {
                    Ok(_) => debug!("orphan budget vote {} applied", short_hash(&hash)),
                    Err(e) => debug!("orphan budget vote {} dropped: {}", short_hash(&hash), e),
                }
            }
        }
    }

    /// Announces valid proposals and budgets matching `filter` with their votes.
    /// A partial sync only announces votes not synced before.
    pub fn sync(&self, peer: PeerId, filter: Option<&Hash>, partial: bool) {
        let items = lock(&self.proposals).sync_items(filter, partial);
        let mut count = 0u32;
        for (hash, votes) in items {
            self.peers
                .push_inventory(peer, Inv::new(InventoryKind::BudgetProposal, hash));
            count += 1;
            for vote in votes {
                self.peers
                    .push_inventory(peer, Inv::new(InventoryKind::BudgetVote, vote));
                count += 1;
            }
        }
        self.peers.push_message(
            peer,
            GovernanceMessage::SyncStatusCount {
                item: SyncItem::BudgetProposals,
                count,
            },
        );
        debug!("sync - sent {} proposal items to peer {}", count, peer);

        let items = lock(&self.budgets).sync_items(filter, partial);
        let mut count = 0u32;
        for (hash, votes) in items {
            self.peers
                .push_inventory(peer, Inv::new(InventoryKind::FinalizedBudget, hash));
            count += 1;
            for vote in votes {
                self.peers
                    .push_inventory(peer, Inv::new(InventoryKind::FinalizedBudgetVote, vote));
                count += 1;
            }
        }
        self.peers.push_message(
            peer,
            GovernanceMessage::SyncStatusCount {
                item: SyncItem::FinalizedBudgets,
                count,
            },
        );
        debug!("sync - sent {} finalized budget items to peer {}", count, peer);
    }

    pub fn set_synced(&self, synced: bool) {
        lock(&self.budgets).set_synced(synced);
        lock(&self.proposals).set_synced(synced);
    }

    /// Forget which votes were synced so the next round announces everything.
    pub fn reset_sync(&self) {
        self.set_synced(false);
    }

    pub fn mark_synced(&self) {
        self.set_synced(true);
    }

    pub fn clear_seen(&self) {
        lock(&self.budgets).clear_seen();
        lock(&self.proposals).clear_seen();
        lock(&self.votes).clear_seen();
    }

    /// Per-block maintenance. Skipped when a previous run is still in progress.
    pub fn new_block(&self) {
        let _guard = match self.maintenance.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        let Some(height) = self.chain.best_height() else {
            return;
        };
        if lock(&self.sync_status).asset() <= SyncAsset::Budget {
            return;
        }

        if self.config.mode == BudgetMode::Suggest {
            match self.submit_final_budget() {
                Ok(hash) => info!("new_block - submitted finalized budget {}", hex::encode(hash)),
                Err(e) => debug!("new_block - finalized budget not submitted: {}", e),
            }
        }

        if height % self.config.maintenance_interval_blocks.max(1) != 0 {
            return;
        }

        if self.is_synced() {
            debug!("new_block - incremental sync started");
            let odds = self.config.sync_reset_odds.max(1);
            let reset = lock(&self.state).rng.gen_range(0..odds) == 0;
            if reset {
                self.clear_seen();
                self.reset_sync();
            }
            let min_protocol = self.params.min_protocol_version;
            for (peer, version) in self.peers.connected_peers() {
                if version >= min_protocol {
                    self.sync(peer, None, true);
                }
            }
            self.mark_synced();
        }

        self.check_and_remove();

        let now = self.now();
        lock(&self.votes).purge(now, self.config.source_request_ttl_secs);

        let known: HashSet<MasternodeID> = lock(&self.registry)
            .masternodes()
            .into_iter()
            .map(|mn| mn.vin)
            .collect();
        lock(&self.budgets).clean_and_remove(|vin| known.contains(vin));
        lock(&self.proposals).clean_and_remove(|vin| known.contains(vin));

        self.promote_immature();
        self.check_orphan_votes();
    }

    /// Retries broadcasts whose collateral was not deep enough before.
    fn promote_immature(&self) {
        let pending = lock(&self.proposals).take_immature();
        for broadcast in pending {
            let hash = broadcast.hash();
            match self.add_proposal(&broadcast) {
                Ok(_) => {
                    info!("immature proposal {} matured", hex::encode(hash));
                    self.peers
                        .relay_inventory(Inv::new(InventoryKind::BudgetProposal, hash));
                    self.added_budget_item(hash);
                }
                Err(e) => debug!("immature proposal {} not added: {}", short_hash(&hash), e),
            }
        }

        let pending = lock(&self.budgets).take_immature();
        for broadcast in pending {
            let hash = broadcast.hash();
            match self.add_finalized_budget(&broadcast) {
                Ok(_) => {
                    info!("immature finalized budget {} matured", hex::encode(hash));
                    self.peers
                        .relay_inventory(Inv::new(InventoryKind::FinalizedBudget, hash));
                    self.added_budget_item(hash);
                }
                Err(e) => debug!("immature finalized budget {} not added: {}", short_hash(&hash), e),
            }
        }
    }

    /// Revalidates everything, votes on surviving budgets and drops invalid objects.
    pub fn check_and_remove(&self) {
        let Some(height) = self.chain.best_height() else {
            return;
        };
        let enabled = self.enabled_masternodes();
        let ctx = self.validity_context(height, enabled);
        let remaining = lock(&self.budgets).check_and_remove(&ctx);
        if !remaining.is_empty() {
            self.check_and_vote(height, enabled);
        }
        let removed = lock(&self.proposals).check_and_remove(&ctx);
        if removed > 0 {
            debug!("check_and_remove - {} proposals removed", removed);
        }
    }

    /// Compares each valid, unchecked finalized budget with the local projection
    /// and votes for exact matches. Masternodes only.
    pub fn check_and_vote(&self, height: u64, enabled_masternodes: usize) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if lock(active).vin().is_none() {
            debug!("check_and_vote - active masternode not initialized");
            return;
        }
        let now = self.now();

        let mut budgets = lock(&self.budgets);
        let mut candidates: Vec<Hash> = Vec::new();
        {
            let mut state = lock(&self.state);
            let odds = self.config.auto_vote_odds.max(1);
            for budget in budgets.iter_mut() {
                if !budget.valid || budget.auto_checked {
                    continue;
                }
                if self.params.is_main() && state.rng.gen_range(0..odds) != 0 {
                    debug!("check_and_vote - waiting on {}", budget.name);
                    continue;
                }
                budget.auto_checked = true;
                if self.config.mode == BudgetMode::Auto {
                    candidates.push(budget.hash());
                }
            }
        }
        if candidates.is_empty() {
            return;
        }

        let local_budget = {
            let ctx = self.validity_context(height, enabled_masternodes);
            lock(&self.proposals).get_budget(&ctx, now)
        };
        candidates.retain(|hash| {
            budgets
                .find(hash)
                .map_or(false, |budget| budget.matches_proposals(&local_budget))
        });

        let signed: Vec<FinalizedBudgetVote> = {
            let active = lock(active);
            candidates
                .into_iter()
                .filter_map(|budget_hash| self.sign_budget_vote(&active, budget_hash, height, now))
                .collect()
        };

        let mut accepted = Vec::new();
        for vote in signed {
            match budgets.update_vote(vote.clone(), now) {
                Ok(_) => {
                    info!("check_and_vote - finalized budget {} matches, voted", short_hash(&vote.budget_hash));
                    accepted.push(vote);
                }
                Err(e) => warn!("check_and_vote - error submitting vote: {}", e),
            }
        }
        drop(budgets);

        let mut votes = lock(&self.votes);
        for vote in accepted {
            let hash = vote.hash();
            votes.seen_budget_votes.insert(hash, vote);
            self.peers
                .relay_inventory(Inv::new(InventoryKind::FinalizedBudgetVote, hash));
        }
    }

    fn sign_budget_vote(
        &self,
        active: &ActiveMasternode,
        budget_hash: Hash,
        height: u64,
        now: i64,
    ) -> Option<FinalizedBudgetVote> {
        let mut vote = FinalizedBudgetVote {
            voter: active.vin()?.clone(),
            budget_hash,
            time: now,
            signature: Vec::new(),
        };
        sign_vote(&mut vote, active, self.hash_scheme(height));
        Some(vote)
    }

    /// Builds, pays for and broadcasts the finalized budget of the coming cycle.
    ///
    /// The first call inside the finalization window sends the fee transaction
    /// and returns `CollateralPending`; a later call broadcasts the budget once
    /// that transaction is confirmed.
    pub fn submit_final_budget(&self) -> Result<Hash> {
        let height = self.chain.best_height().ok_or(GovernanceError::NoChain)?;
        let block_start = self.params.next_cycle_start(height);
        if lock(&self.state).submitted_cycle == Some(block_start) {
            return Err(GovernanceError::AlreadySubmitted(block_start));
        }

        let window = (self.params.budget_cycle_blocks / 30) * 2;
        if block_start - height > window {
            return Err(GovernanceError::TooEarlyForFinalization {
                blocks: block_start - height - window,
            });
        }

        let funded = self.get_budget();
        if funded.is_empty() {
            return Err(GovernanceError::EmptyBudget);
        }
        let payments: Vec<TxBudgetPayment> = funded
            .iter()
            .map(|p| TxBudgetPayment {
                proposal_hash: p.hash(),
                payee: p.payee.clone(),
                amount: p.allotted,
            })
            .collect();
        let mut broadcast = FinalizedBudgetBroadcast {
            name: FINALIZED_BUDGET_NAME.to_string(),
            block_start,
            payments,
            fee_tx_hash: NULL_HASH,
        };
        let budget_hash = broadcast.hash();

        if lock(&self.budgets).contains(&budget_hash) {
            lock(&self.state).submitted_cycle = Some(block_start);
            return Err(GovernanceError::AlreadyKnown(format!(
                "finalized budget {}",
                hex::encode(budget_hash)
            )));
        }

        let pending_fee = lock(&self.state).unconfirmed_fee_txs.get(&budget_hash).copied();
        let fee_tx_hash = match pending_fee {
            Some(txid) => txid,
            None => {
                let wallet = self.wallet.as_ref().ok_or(GovernanceError::NoWallet)?;
                let txid = wallet
                    .create_budget_collateral(&budget_hash, BUDGET_FEE_TX)
                    .map_err(GovernanceError::Wallet)?;
                lock(&self.state).unconfirmed_fee_txs.insert(budget_hash, txid);
                info!(
                    "submit_final_budget - collateral sent: {} for budget {}",
                    hex::encode(txid),
                    hex::encode(budget_hash)
                );
                return Err(GovernanceError::CollateralPending(hex::encode(txid)));
            }
        };

        broadcast.fee_tx_hash = fee_tx_hash;
        self.add_finalized_budget(&broadcast)?;
        self.peers
            .relay_inventory(Inv::new(InventoryKind::FinalizedBudget, budget_hash));
        lock(&self.state).submitted_cycle = Some(block_start);
        info!(
            "submit_final_budget - finalized budget {} for cycle starting at {} submitted",
            hex::encode(budget_hash),
            block_start
        );
        Ok(budget_hash)
    }

    /// Proposals funded in the next cycle, best first.
    pub fn get_budget(&self) -> Vec<BudgetProposal> {
        let Some(height) = self.chain.best_height() else {
            return Vec::new();
        };
        let enabled = self.enabled_masternodes();
        let now = self.now();
        let ctx = self.validity_context(height, enabled);
        lock(&self.proposals).get_budget(&ctx, now)
    }

    /// Appends the budget payment of the next block to `tx`, if the winning
    /// finalized budget reached quorum. Returns the payee and amount added.
    pub fn fill_block_payee(&self, tx: &mut Transaction) -> Option<(Vec<u8>, u64)> {
        let height = self.chain.best_height()? + 1;
        let enabled = self.enabled_masternodes();
        let (payee, amount) = lock(&self.budgets).payee_and_amount(height, enabled)?;
        tx.outputs.push(TxOutput::new(amount, payee.clone()));
        info!(
            "Budget payment to {} for {} at height {}",
            script_to_string(&payee),
            amount,
            height
        );
        Some((payee, amount))
    }

    pub fn is_transaction_valid(&self, tx: &Transaction, height: u64) -> TrxValidationStatus {
        let enabled = self.enabled_masternodes();
        lock(&self.budgets).is_transaction_valid(tx, height, enabled)
    }

    pub fn is_budget_payment_block(&self, height: u64) -> bool {
        let enabled = self.enabled_masternodes();
        lock(&self.budgets).is_budget_payment_block(height, enabled)
    }

    pub fn get_required_payments_string(&self, height: u64) -> String {
        lock(&self.budgets).required_payments_string(height)
    }

    pub fn find_proposal(&self, hash: &Hash) -> Option<BudgetProposal> {
        lock(&self.proposals).find(hash)
    }

    pub fn find_proposal_by_name(&self, name: &str) -> Option<BudgetProposal> {
        lock(&self.proposals).find_by_name(name)
    }

    pub fn find_finalized_budget(&self, hash: &Hash) -> Option<FinalizedBudget> {
        lock(&self.budgets).find(hash)
    }

    /// Drops the object paid for by `fee_tx_hash`, e.g. when its block is disconnected.
    pub fn remove_by_fee_tx_id(&self, fee_tx_hash: &Hash) -> bool {
        if let Some(budget) = lock(&self.budgets).remove_by_fee_tx(fee_tx_hash) {
            info!("Removed finalized budget {} paid by {}", budget.name, hex::encode(fee_tx_hash));
            return true;
        }
        if let Some(proposal) = lock(&self.proposals).remove_by_fee_tx(fee_tx_hash) {
            info!("Removed proposal {} paid by {}", proposal.name, hex::encode(fee_tx_hash));
            return true;
        }
        false
    }

    pub fn clear(&self) {
        lock(&self.budgets).clear();
        lock(&self.proposals).clear();
        *lock(&self.votes) = VoteCache::default();
        let mut state = lock(&self.state);
        state.submitted_cycle = None;
        state.unconfirmed_fee_txs.clear();
        state.full_sync_peers.clear();
        info!("Budget object cleared");
    }

    /// "OK" or a report of the scheduled proposals we disagree with.
    pub fn finalized_budget_status(&self, hash: &Hash) -> Option<String> {
        let budgets = lock(&self.budgets);
        let proposals = lock(&self.proposals);
        budgets.find(hash).map(|budget| budget.status(&proposals))
    }

    pub fn finalized_budget_proposals(&self, hash: &Hash) -> Option<String> {
        let budgets = lock(&self.budgets);
        let proposals = lock(&self.proposals);
        budgets
            .find(hash)
            .map(|budget| budget.proposals_string(&proposals))
    }

    pub fn get_all_proposals(&self) -> Vec<BudgetProposal> {
        lock(&self.proposals).all()
    }

    /// Every finalized budget, most voted first.
    pub fn get_finalized_budgets(&self) -> Vec<FinalizedBudget> {
        lock(&self.budgets).sorted_by_votes()
    }

    /// Votes on a proposal with the local masternode key and relays the vote.
    pub fn submit_proposal_vote(&self, proposal_hash: Hash, direction: VoteDirection) -> Result<Hash> {
        let active = self.active.as_ref().ok_or(GovernanceError::NotMasternode)?;
        let height = self.chain.best_height().ok_or(GovernanceError::NoChain)?;
        let vote = {
            let active = lock(active);
            let voter = active.vin().cloned().ok_or(GovernanceError::NotMasternode)?;
            let mut vote = ProposalVote {
                voter,
                proposal_hash,
                direction,
                time: self.now(),
                signature: Vec::new(),
            };
            sign_vote(&mut vote, &active, self.hash_scheme(height));
            vote
        };
        self.update_proposal(&vote, None)?;
        let hash = vote.hash();
        lock(&self.votes).seen_proposal_votes.insert(hash, vote);
        self.peers
            .relay_inventory(Inv::new(InventoryKind::BudgetVote, hash));
        info!(
            "Voted {} on proposal {}",
            direction.as_str(),
            hex::encode(proposal_hash)
        );
        Ok(hash)
    }

    /// Votes for a finalized budget with the local masternode key and relays the vote.
    pub fn submit_budget_vote(&self, budget_hash: Hash) -> Result<Hash> {
        let active = self.active.as_ref().ok_or(GovernanceError::NotMasternode)?;
        let height = self.chain.best_height().ok_or(GovernanceError::NoChain)?;
        let now = self.now();
        let vote = self
            .sign_budget_vote(&lock(active), budget_hash, height, now)
            .ok_or(GovernanceError::NotMasternode)?;
        self.update_finalized_budget(&vote, None)?;
        let hash = vote.hash();
        lock(&self.votes).seen_budget_votes.insert(hash, vote);
        self.peers
            .relay_inventory(Inv::new(InventoryKind::FinalizedBudgetVote, hash));
        info!("Voted for finalized budget {}", hex::encode(budget_hash));
        Ok(hash)
    }

    /// The wire message for an announced governance object we know.
    pub fn inventory_message(&self, inv: &Inv) -> Option<GovernanceMessage> {
        match inv.kind {
            InventoryKind::BudgetProposal => lock(&self.proposals)
                .seen(&inv.hash)
                .map(GovernanceMessage::Proposal),
            InventoryKind::FinalizedBudget => lock(&self.budgets)
                .seen(&inv.hash)
                .map(GovernanceMessage::FinalizedBudget),
            InventoryKind::BudgetVote => lock(&self.votes)
                .seen_proposal_votes
                .get(&inv.hash)
                .cloned()
                .map(GovernanceMessage::ProposalVote),
            InventoryKind::FinalizedBudgetVote => lock(&self.votes)
                .seen_budget_votes
                .get(&inv.hash)
                .cloned()
                .map(GovernanceMessage::FinalizedBudgetVote),
            _ => None,
        }
    }

    pub fn stats(&self) -> BudgetStats {
        let budgets = lock(&self.budgets);
        let proposals = lock(&self.proposals);
        let votes = lock(&self.votes);
        BudgetStats {
            proposals: proposals.len(),
            budgets: budgets.len(),
            seen_proposals: proposals.seen_count(),
            seen_proposal_votes: votes.seen_proposal_votes.len(),
            seen_budgets: budgets.seen_count(),
            seen_budget_votes: votes.seen_budget_votes.len(),
            orphan_votes: votes.orphan_proposal_votes.len() + votes.orphan_budget_votes.len(),
            immature: proposals.immature_count() + budgets.immature_count(),
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let budgets = lock(&self.budgets);
        let proposals = lock(&self.proposals);
        let votes = lock(&self.votes);
        let (proposal_list, seen_proposals) = proposals.snapshot();
        let (budget_list, seen_budgets) = budgets.snapshot();
        BudgetSnapshot {
            proposals: proposal_list,
            seen_proposals,
            budgets: budget_list,
            seen_budgets,
            votes: votes.clone(),
        }
    }

    pub fn restore(&self, snapshot: BudgetSnapshot) {
        let mut budgets = lock(&self.budgets);
        let mut proposals = lock(&self.proposals);
        let mut votes = lock(&self.votes);
        budgets.restore(snapshot.budgets, snapshot.seen_budgets);
        proposals.restore(snapshot.proposals, snapshot.seen_proposals);
        *votes = snapshot.votes;
    }
}

impl fmt::Display for BudgetCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        write!(
            f,
            "Proposals: {}, Budgets: {}, Seen Budgets: {}, Seen Budget Votes: {}, Seen Final Budgets: {}, Seen Final Budget Votes: {}",
            stats.proposals,
            stats.budgets,
            stats.seen_proposals,
            stats.seen_proposal_votes,
            stats.seen_budgets,
            stats.seen_budget_votes
        )
    }
}
