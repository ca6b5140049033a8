//! Stored governance votes and the rules for replacing them.

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use rusty_crypto::{verify_message, SignatureScheme};
use rusty_masternode::ActiveMasternode;
use rusty_shared_types::governance::{FinalizedBudgetVote, ProposalVote, VoteDirection};
use rusty_shared_types::masternode::MasternodeID;
use rusty_shared_types::p2p::InventoryKind;
use rusty_shared_types::{short_hash, Hash, PublicKey};

use crate::error::{GovernanceError, Result};

/// Minimum time between two votes of one masternode on the same object (in seconds).
pub const BUDGET_VOTE_UPDATE_MIN: i64 = 60 * 60;
/// How far a vote may be timestamped into the future (in seconds).
pub const MAX_VOTE_TIME_SKEW: i64 = 60 * 60;

/// Common shape of proposal votes and finalized budget votes.
pub trait GovernanceVote: Clone + Serialize + DeserializeOwned {
    const INVENTORY: InventoryKind;

    fn voter(&self) -> &MasternodeID;
    /// Hash of the proposal or budget voted on
    fn target(&self) -> &Hash;
    fn time(&self) -> i64;
    fn hash(&self) -> Hash;
    fn signing_payload(&self, hash_scheme: bool) -> Vec<u8>;
    fn signature(&self) -> &[u8];
    fn set_signature(&mut self, signature: Vec<u8>);
}

impl GovernanceVote for ProposalVote {
    const INVENTORY: InventoryKind = InventoryKind::BudgetVote;

    fn voter(&self) -> &MasternodeID {
        &self.voter
    }
    fn target(&self) -> &Hash {
        &self.proposal_hash
    }
    fn time(&self) -> i64 {
        self.time
    }
    fn hash(&self) -> Hash {
        ProposalVote::hash(self)
    }
    fn signing_payload(&self, hash_scheme: bool) -> Vec<u8> {
        ProposalVote::signing_payload(self, hash_scheme)
    }
    fn signature(&self) -> &[u8] {
        &self.signature
    }
    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

impl GovernanceVote for FinalizedBudgetVote {
    const INVENTORY: InventoryKind = InventoryKind::FinalizedBudgetVote;

    fn voter(&self) -> &MasternodeID {
        &self.voter
    }
    fn target(&self) -> &Hash {
        &self.budget_hash
    }
    fn time(&self) -> i64 {
        self.time
    }
    fn hash(&self) -> Hash {
        FinalizedBudgetVote::hash(self)
    }
    fn signing_payload(&self, hash_scheme: bool) -> Vec<u8> {
        FinalizedBudgetVote::signing_payload(self, hash_scheme)
    }
    fn signature(&self) -> &[u8] {
        &self.signature
    }
    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

/// Signs `vote` with the local masternode key.
pub fn sign_vote<V: GovernanceVote>(vote: &mut V, signer: &ActiveMasternode, hash_scheme: bool) {
    let payload = vote.signing_payload(hash_scheme);
    let signature = signer.sign(&payload, SignatureScheme::for_upgrade(hash_scheme));
    vote.set_signature(signature);
}

/// Verifies `vote` against the voter's masternode key. Once the hash scheme is
/// active, votes signed with the legacy scheme are still accepted.
pub fn verify_vote<V: GovernanceVote>(vote: &V, pubkey: &PublicKey, hash_scheme: bool) -> Result<()> {
    let check = |hash: bool| {
        verify_message(
            pubkey,
            &vote.signing_payload(hash),
            vote.signature(),
            SignatureScheme::for_upgrade(hash),
        )
    };
    let verified = if hash_scheme {
        check(true).or_else(|_| check(false))
    } else {
        check(false)
    };
    verified.map_err(|_| GovernanceError::InvalidSignature)
}

/// A vote together with its local bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord<V> {
    pub vote: V,
    /// Cleared while the voter is missing from the masternode list
    pub valid: bool,
    /// Already announced during the last sync round
    pub synced: bool,
}

/// One current vote per masternode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMap<V> {
    votes: BTreeMap<MasternodeID, VoteRecord<V>>,
}

impl<V> Default for VoteMap<V> {
    fn default() -> Self {
        Self {
            votes: BTreeMap::new(),
        }
    }
}

impl<V: GovernanceVote> VoteMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `vote`, replacing the voter's previous one if it is old enough.
    /// Returns true when a previous vote was replaced.
    pub fn add_or_update(&mut self, vote: V, now: i64) -> Result<bool> {
        let mut replaced = false;
        if let Some(existing) = self.votes.get(vote.voter()) {
            let old_time = existing.vote.time();
            if old_time > vote.time() {
                return Err(GovernanceError::VoteOlder(hex::encode(vote.hash())));
            }
            let elapsed = vote.time() - old_time;
            if elapsed < BUDGET_VOTE_UPDATE_MIN {
                return Err(GovernanceError::VoteTooSoon {
                    elapsed,
                    min: BUDGET_VOTE_UPDATE_MIN,
                });
            }
            replaced = true;
        }
        let max = now + MAX_VOTE_TIME_SKEW;
        if vote.time() > max {
            return Err(GovernanceError::VoteTooFarAhead {
                time: vote.time(),
                max,
            });
        }

        debug!(
            "{} vote {} from {}",
            if replaced { "Existing vote updated:" } else { "New vote inserted:" },
            short_hash(&vote.hash()),
            vote.voter().to_short_string()
        );
        self.votes.insert(
            vote.voter().clone(),
            VoteRecord {
                vote,
                valid: true,
                synced: false,
            },
        );
        Ok(replaced)
    }

    pub fn get(&self, voter: &MasternodeID) -> Option<&VoteRecord<V>> {
        self.votes.get(voter)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoteRecord<V>> {
        self.votes.values()
    }

    /// Valid votes matching `filter`.
    pub fn count_valid(&self, filter: impl Fn(&V) -> bool) -> usize {
        self.votes
            .values()
            .filter(|record| record.valid && filter(&record.vote))
            .count()
    }

    /// Flags votes of masternodes that left the list; they are kept but not counted.
    pub fn revalidate(&mut self, is_known: impl Fn(&MasternodeID) -> bool) {
        for (voter, record) in self.votes.iter_mut() {
            record.valid = is_known(voter);
        }
    }

    /// Marking as synced only applies to valid votes; unmarking applies to all.
    pub fn set_synced(&mut self, synced: bool) {
        for record in self.votes.values_mut() {
            record.synced = synced && record.valid;
        }
    }

    /// Hashes to announce to a syncing peer; a partial sync skips votes already synced.
    pub fn sync_hashes(&self, partial: bool) -> Vec<Hash> {
        self.votes
            .values()
            .filter(|record| record.valid && (!partial || !record.synced))
            .map(|record| record.vote.hash())
            .collect()
    }
}

impl VoteMap<ProposalVote> {
    pub fn count_direction(&self, direction: VoteDirection) -> usize {
        self.count_valid(|vote| vote.direction == direction)
    }
}

/// Votes seen on the wire, votes waiting for their target, and outstanding
/// requests for missing targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteCache {
    pub seen_proposal_votes: HashMap<Hash, ProposalVote>,
    pub seen_budget_votes: HashMap<Hash, FinalizedBudgetVote>,
    /// Vote hash to (vote, time received)
    pub orphan_proposal_votes: HashMap<Hash, (ProposalVote, i64)>,
    pub orphan_budget_votes: HashMap<Hash, (FinalizedBudgetVote, i64)>,
    /// Target hash to the time we asked a peer for it
    pub asked_for_source: HashMap<Hash, i64>,
}

impl VoteCache {
    /// Forgets requests and orphans older than `ttl` seconds.
    pub fn purge(&mut self, now: i64, ttl: i64) {
        self.asked_for_source.retain(|_, asked| now - *asked <= ttl);
        self.orphan_proposal_votes
            .retain(|_, (_, received)| now - *received <= ttl);
        self.orphan_budget_votes
            .retain(|_, (_, received)| now - *received <= ttl);
    }

    pub fn clear_seen(&mut self) {
        self.seen_proposal_votes.clear();
        self.seen_budget_votes.clear();
    }
}
