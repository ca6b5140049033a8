//! Read-only reports over the governance state, shaped for an RPC layer.

use serde::Serialize;

use rusty_masternode::Masternode;
use rusty_shared_types::script::script_to_string;
use rusty_shared_types::spork::SporkId;
use rusty_shared_types::ChainParams;

use crate::budget_manager::lock;
use crate::context::GovernanceContext;
use crate::error::{GovernanceError, Result};
use crate::finalized_budget::FinalizedBudget;
use crate::proposal::BudgetProposal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasternodeCountReport {
    pub total: usize,
    pub stable: usize,
    pub enabled: usize,
    pub in_queue: usize,
    pub ipv4: usize,
    pub ipv6: usize,
    pub onion: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasternodeEntryReport {
    pub rank: usize,
    pub txhash: String,
    pub outidx: u32,
    pub status: String,
    pub addr: String,
    pub version: u32,
    pub pubkey: String,
    pub lastseen: i64,
    pub activetime: i64,
    pub lastpaid: i64,
}

impl MasternodeEntryReport {
    fn new(rank: usize, mn: &Masternode) -> Self {
        let outpoint = mn.vin.outpoint();
        Self {
            rank,
            txhash: hex::encode(outpoint.txid),
            outidx: outpoint.vout,
            status: mn.status.as_str().to_string(),
            addr: mn.addr.to_string(),
            version: mn.protocol_version,
            pubkey: hex::encode(mn.collateral_pubkey),
            lastseen: mn.last_ping.sig_time,
            activetime: mn.last_ping.sig_time - mn.sig_time,
            lastpaid: mn.last_paid_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinnerReport {
    pub height: u64,
    pub winner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreReport {
    pub height: u64,
    pub masternode: String,
    pub score: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasternodeStatusReport {
    pub txhash: Option<String>,
    pub outidx: Option<u32>,
    pub netaddr: String,
    pub pubkey: String,
    pub status: String,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalReport {
    pub name: String,
    pub url: String,
    pub hash: String,
    pub fee_hash: String,
    pub block_start: u64,
    pub block_end: u64,
    pub total_payment_count: u64,
    pub remaining_payment_count: u64,
    pub payee: String,
    pub ratio: f64,
    pub yeas: usize,
    pub nays: usize,
    pub abstains: usize,
    pub total_payment: u64,
    pub monthly_payment: u64,
    pub is_established: bool,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionEntry {
    #[serde(flatten)]
    pub proposal: ProposalReport,
    pub alloted: u64,
    pub total_budget_alloted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizedBudgetReport {
    pub name: String,
    pub hash: String,
    pub fee_tx: String,
    pub block_start: u64,
    pub block_end: u64,
    pub proposals: String,
    pub vote_count: usize,
    pub status: String,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
}

fn tip(ctx: &GovernanceContext) -> Result<u64> {
    ctx.chain().best_height().ok_or(GovernanceError::NoChain)
}

pub fn masternode_count(ctx: &GovernanceContext) -> MasternodeCountReport {
    let now = ctx.chain().adjusted_time();
    let enforcement = lock(ctx.sporks()).is_active(SporkId::MasternodePaymentEnforcement, now);
    let height = ctx.chain().best_height().unwrap_or(0);
    let payments = lock(ctx.payments());
    let mut registry = lock(ctx.registry());
    let (_, in_queue) = payments.next_in_queue_for_payment(&mut registry, height + 1, true);
    let networks = registry.count_networks();
    MasternodeCountReport {
        total: registry.size(),
        stable: registry.stable_size(enforcement),
        enabled: registry.count_enabled(None),
        in_queue,
        ipv4: networks.ipv4,
        ipv6: networks.ipv6,
        onion: networks.onion,
    }
}

/// The highest scoring masternode for the next block.
pub fn current_masternode(ctx: &GovernanceContext) -> Result<Option<MasternodeEntryReport>> {
    let height = tip(ctx)?;
    let min_protocol = ctx.params().min_protocol_version;
    let payments = lock(ctx.payments());
    let mut registry = lock(ctx.registry());
    Ok(payments
        .current_masternode(&mut registry, height + 1, min_protocol)
        .map(|mn| MasternodeEntryReport::new(1, &mn)))
}

/// Scheduled payees from `before` blocks back to 20 blocks ahead of the tip.
pub fn masternode_winners(ctx: &GovernanceContext, before: u64) -> Result<Vec<WinnerReport>> {
    let height = tip(ctx)?;
    let payments = lock(ctx.payments());
    let from = height.saturating_sub(before);
    let to = height + 20;
    Ok((from..=to)
        .map(|h| WinnerReport {
            height: h,
            winner: payments
                .winner(h)
                .map(|vin| vin.to_short_string())
                .unwrap_or_else(|| "Unknown".to_string()),
        })
        .collect())
}

/// Best scoring enabled masternode per block over the last `blocks` blocks.
pub fn masternode_scores(ctx: &GovernanceContext, blocks: u64) -> Result<Vec<ScoreReport>> {
    let height = tip(ctx)?;
    let payments = lock(ctx.payments());
    let masternodes: Vec<Masternode> = lock(ctx.registry())
        .masternodes()
        .into_iter()
        .filter(|mn| mn.is_enabled())
        .collect();
    let mut reports = Vec::new();
    for h in height.saturating_sub(blocks)..=height {
        let best = masternodes
            .iter()
            .filter_map(|mn| payments.calculate_score(mn, h).map(|score| (score, mn)))
            .max_by(|a, b| a.0.cmp(&b.0));
        if let Some((score, mn)) = best {
            reports.push(ScoreReport {
                height: h,
                masternode: mn.vin.to_short_string(),
                score: hex::encode(score.0),
            });
        }
    }
    Ok(reports)
}

/// Every masternode with its rank at the tip. `filter` matches a substring of
/// the status, address, collateral txid or key.
pub fn list_masternodes(ctx: &GovernanceContext, filter: Option<&str>) -> Result<Vec<MasternodeEntryReport>> {
    let height = tip(ctx)?;
    let min_protocol = ctx.params().min_protocol_version;
    let ranked = {
        let payments = lock(ctx.payments());
        let mut registry = lock(ctx.registry());
        payments.ranks(&mut registry, height, min_protocol)
    };
    Ok(ranked
        .iter()
        .map(|(rank, mn)| MasternodeEntryReport::new(*rank, mn))
        .filter(|entry| {
            filter.map_or(true, |f| {
                entry.status.contains(f)
                    || entry.addr.contains(f)
                    || entry.txhash.contains(f)
                    || entry.pubkey.contains(f)
            })
        })
        .collect())
}

pub fn masternode_status(ctx: &GovernanceContext) -> Result<MasternodeStatusReport> {
    let active = ctx.active().ok_or(GovernanceError::NotMasternode)?;
    let active = lock(active);
    let outpoint = active.vin().map(|vin| vin.outpoint().clone());
    Ok(MasternodeStatusReport {
        txhash: outpoint.as_ref().map(|o| hex::encode(o.txid)),
        outidx: outpoint.as_ref().map(|o| o.vout),
        netaddr: active.service().to_string(),
        pubkey: hex::encode(active.pubkey()),
        status: active.status().to_string(),
        started: active.is_started(),
    })
}

pub fn proposal_report(
    proposal: &BudgetProposal,
    params: &ChainParams,
    height: u64,
    now: i64,
) -> ProposalReport {
    let cycle = params.budget_cycle_blocks;
    let total_payment_count = proposal.total_payment_count(cycle);
    ProposalReport {
        name: proposal.name.clone(),
        url: proposal.url.clone(),
        hash: hex::encode(proposal.hash()),
        fee_hash: hex::encode(proposal.fee_tx_hash),
        block_start: proposal.block_start,
        block_end: proposal.block_end,
        total_payment_count,
        remaining_payment_count: proposal.remaining_payment_count(height, cycle),
        payee: script_to_string(&proposal.payee),
        ratio: proposal.ratio(),
        yeas: proposal.yeas(),
        nays: proposal.nays(),
        abstains: proposal.abstains(),
        total_payment: proposal.amount * total_payment_count,
        monthly_payment: proposal.amount,
        is_established: proposal.is_established(now, params),
        is_valid: proposal.valid,
        invalid_reason: proposal.invalid_reason.clone(),
    }
}

/// Every known proposal, valid or not.
pub fn proposals(ctx: &GovernanceContext) -> Result<Vec<ProposalReport>> {
    let height = tip(ctx)?;
    let now = ctx.chain().adjusted_time();
    Ok(ctx
        .budget()
        .get_all_proposals()
        .iter()
        .map(|p| proposal_report(p, ctx.params(), height, now))
        .collect())
}

/// The proposals funded in the next cycle with a running total.
pub fn budget_projection(ctx: &GovernanceContext) -> Result<Vec<ProjectionEntry>> {
    let height = tip(ctx)?;
    let now = ctx.chain().adjusted_time();
    let mut total = 0u64;
    Ok(ctx
        .budget()
        .get_budget()
        .iter()
        .map(|p| {
            total += p.allotted;
            ProjectionEntry {
                proposal: proposal_report(p, ctx.params(), height, now),
                alloted: p.allotted,
                total_budget_alloted: total,
            }
        })
        .collect())
}

pub fn finalized_budget_report(ctx: &GovernanceContext, budget: &FinalizedBudget) -> FinalizedBudgetReport {
    let hash = budget.hash();
    FinalizedBudgetReport {
        name: budget.name.clone(),
        hash: hex::encode(hash),
        fee_tx: hex::encode(budget.fee_tx_hash),
        block_start: budget.block_start,
        block_end: budget.block_end(),
        proposals: ctx
            .budget()
            .finalized_budget_proposals(&hash)
            .unwrap_or_default(),
        vote_count: budget.vote_count(),
        status: ctx
            .budget()
            .finalized_budget_status(&hash)
            .unwrap_or_default(),
        is_valid: budget.valid,
        invalid_reason: budget.invalid_reason.clone(),
    }
}

/// Every finalized budget, most voted first.
pub fn finalized_budget_reports(ctx: &GovernanceContext) -> Vec<FinalizedBudgetReport> {
    ctx.budget()
        .get_finalized_budgets()
        .iter()
        .map(|budget| finalized_budget_report(ctx, budget))
        .collect()
}
