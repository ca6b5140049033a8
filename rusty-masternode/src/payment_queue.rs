//! Deterministic ordering of masternodes for block-reward rotation.
//!
//! Every node computes the same order from the same chain: scores are derived
//! from a block hash that is already buried, and ties fall back to collateral order.

use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use rusty_shared_types::interfaces::ChainView;
use rusty_shared_types::masternode::MasternodeID;

use crate::masternode::{Masternode, MasternodeScore, MASTERNODE_WINNER_MIN_AGE};
use crate::mn_list::MasternodeRegistry;

/// Blocks between the paid height and the block whose hash seeds the queue score.
pub const PAYMENT_SCORE_LAG: u64 = 101;
/// A node scheduled this many blocks past the tip is not picked again.
pub const SCHEDULE_LOOKAHEAD: u64 = 10;
/// Rank returned for entries that are not enabled.
pub const DISABLED_RANK_SENTINEL: usize = 9999;
/// Scheduled winners older than this many blocks are forgotten.
pub const PAYMENT_HISTORY_BLOCKS: u64 = 1000;
/// Seconds of sig-time age required per registered node before a node is eligible.
const SIG_TIME_SECONDS_PER_NODE: f64 = 2.6 * 60.0;

pub struct PaymentOrderEngine {
    chain: Arc<dyn ChainView>,
    /// Winner chosen for each height
    scheduled: BTreeMap<u64, MasternodeID>,
}

impl PaymentOrderEngine {
    pub fn new(chain: Arc<dyn ChainView>) -> Self {
        Self {
            chain,
            scheduled: BTreeMap::new(),
        }
    }

    /// Score of `mn` against the block at `height`, `None` when that block is unknown.
    pub fn calculate_score(&self, mn: &Masternode, height: u64) -> Option<MasternodeScore> {
        let block_hash = self.chain.block_hash(height)?;
        Some(mn.calculate_score(&block_hash))
    }

    pub fn record_winner(&mut self, height: u64, vin: MasternodeID) {
        self.scheduled.insert(height, vin);
    }

    pub fn winner(&self, height: u64) -> Option<&MasternodeID> {
        self.scheduled.get(&height)
    }

    /// Winners recorded in `[from, to]`.
    pub fn winners(&self, from: u64, to: u64) -> Vec<(u64, MasternodeID)> {
        self.scheduled
            .range(from..=to)
            .map(|(h, vin)| (*h, vin.clone()))
            .collect()
    }

    /// Whether `vin` is scheduled within the lookahead window from the tip,
    /// ignoring the height currently being decided.
    pub fn is_scheduled(&self, vin: &MasternodeID, not_height: u64) -> bool {
        let tip = self.chain.best_height().unwrap_or(0);
        self.scheduled
            .range(tip..=tip + SCHEDULE_LOOKAHEAD)
            .any(|(height, scheduled)| *height != not_height && scheduled == vin)
    }

    /// Forgets winners far behind `current_height`.
    pub fn clean_payment_list(&mut self, current_height: u64) {
        let limit = current_height.saturating_sub(PAYMENT_HISTORY_BLOCKS);
        self.scheduled = self.scheduled.split_off(&limit);
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Picks the node that should be paid at `height`, together with the number of
    /// nodes that passed the eligibility filters.
    pub fn next_in_queue_for_payment(
        &self,
        registry: &mut MasternodeRegistry,
        height: u64,
        filter_sig_time: bool,
    ) -> (Option<Masternode>, usize) {
        registry.check();
        let now = self.chain.adjusted_time();
        let min_protocol = registry.config().min_protocol_version;
        let mn_count = registry.count_enabled(None);
        let sig_time_window = (mn_count as f64 * SIG_TIME_SECONDS_PER_NODE) as i64;

        let mut eligible: Vec<(i64, Masternode)> = Vec::new();
        for mn in registry.masternodes() {
            if !mn.is_enabled() || mn.protocol_version < min_protocol {
                continue;
            }
            if self.is_scheduled(&mn.vin, height) {
                continue;
            }
            if filter_sig_time && mn.sig_time + sig_time_window > now {
                continue;
            }
            match self.chain.coin_depth(mn.vin.outpoint(), height) {
                Some(depth) if depth >= mn_count as u64 => {}
                _ => continue,
            }
            eligible.push((mn.seconds_since_payment(now), mn));
        }
        let count = eligible.len();

        // After a network-wide restart most nodes fail the sig-time filter.
        if filter_sig_time && count < mn_count / 3 {
            return self.next_in_queue_for_payment(registry, height, false);
        }

        // Longest unpaid first, collateral order breaks ties.
        eligible.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.vin.cmp(&b.1.vin)));

        let tenth = mn_count / 10;
        let anchor = height.saturating_sub(PAYMENT_SCORE_LAG);
        let mut best: Option<(MasternodeScore, Masternode)> = None;
        for (seen, (_, mn)) in eligible.into_iter().enumerate() {
            if let Some(score) = self.calculate_score(&mn, anchor) {
                if best.as_ref().map_or(true, |(top, _)| score > *top) {
                    best = Some((score, mn));
                }
            }
            if seen + 1 >= tenth {
                break;
            }
        }

        if let Some((_, mn)) = &best {
            debug!(
                "next in queue for height {}: {} ({} eligible)",
                height,
                mn.vin.to_short_string(),
                count
            );
        }
        (best.map(|(_, mn)| mn), count)
    }

    /// Highest-scoring enabled node at `height` among nodes at or above `min_protocol`.
    pub fn current_masternode(
        &self,
        registry: &mut MasternodeRegistry,
        height: u64,
        min_protocol: u32,
    ) -> Option<Masternode> {
        registry.check();
        let mut best: Option<(MasternodeScore, Masternode)> = None;
        for mn in registry.masternodes() {
            if mn.protocol_version < min_protocol || !mn.is_enabled() {
                continue;
            }
            let Some(score) = self.calculate_score(&mn, height) else {
                continue;
            };
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, mn));
            }
        }
        best.map(|(_, mn)| mn)
    }

    /// 1-based position of `vin` among scored nodes, best first.
    pub fn rank(
        &self,
        registry: &mut MasternodeRegistry,
        vin: &MasternodeID,
        height: u64,
        min_protocol: u32,
        only_active: bool,
        payment_enforcement_active: bool,
    ) -> Option<usize> {
        let block_hash = self.chain.block_hash(height)?;
        let now = self.chain.adjusted_time();
        registry.check();

        let mut scores: Vec<(MasternodeScore, MasternodeID)> = Vec::new();
        for mn in registry.masternodes() {
            if mn.protocol_version < min_protocol {
                continue;
            }
            if payment_enforcement_active && now - mn.sig_time < MASTERNODE_WINNER_MIN_AGE {
                continue;
            }
            if only_active && !mn.is_enabled() {
                continue;
            }
            scores.push((mn.calculate_score(&block_hash), mn.vin.clone()));
        }
        sort_by_score_desc(&mut scores);
        scores
            .iter()
            .position(|(_, candidate)| candidate == vin)
            .map(|index| index + 1)
    }

    /// Every node with its rank, seeded by the block before `height`.
    /// Disabled nodes get the sentinel rank and sort last.
    pub fn ranks(
        &self,
        registry: &mut MasternodeRegistry,
        height: u64,
        min_protocol: u32,
    ) -> Vec<(usize, Masternode)> {
        let Some(block_hash) = self.chain.block_hash(height.saturating_sub(1)) else {
            return Vec::new();
        };
        registry.check();

        let mut enabled: Vec<(MasternodeScore, Masternode)> = Vec::new();
        let mut disabled: Vec<Masternode> = Vec::new();
        for mn in registry.masternodes() {
            if mn.protocol_version < min_protocol {
                continue;
            }
            if mn.is_enabled() {
                enabled.push((mn.calculate_score(&block_hash), mn));
            } else {
                disabled.push(mn);
            }
        }
        enabled.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.vin.cmp(&b.1.vin)));

        let mut ranked: Vec<(usize, Masternode)> = enabled
            .into_iter()
            .enumerate()
            .map(|(i, (_, mn))| (i + 1, mn))
            .collect();
        ranked.extend(disabled.into_iter().map(|mn| (DISABLED_RANK_SENTINEL, mn)));
        ranked
    }
}

fn sort_by_score_desc(scores: &mut [(MasternodeScore, MasternodeID)]) {
    scores.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
}
