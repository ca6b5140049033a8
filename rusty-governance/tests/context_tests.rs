mod common;

use std::thread;
use std::time::Duration;

use common::*;

use rusty_governance::budget_db::{dump_budgets, load_budgets, BUDGET_CACHE_FILE};
use rusty_governance::{queries, spawn_maintenance, BlockPayee, GovernanceError, VoteDirection};
use rusty_shared_types::p2p::{GovernanceMessage, Inv, InventoryKind};
use rusty_shared_types::{Transaction, COIN};

#[test]
fn test_budget_cache_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(10);
    let budget = h.context.budget();
    let hash = h.passing_proposal(&h.proposal("alpha", 1_000 * COIN, 2, 100), 3);

    dump_budgets(dir.path(), budget).unwrap();
    assert!(dir.path().join(BUDGET_CACHE_FILE).exists());

    budget.clear();
    assert!(budget.find_proposal(&hash).is_none());

    load_budgets(dir.path(), budget).unwrap();
    let proposal = budget.find_proposal(&hash).unwrap();
    assert!(proposal.valid);
    assert_eq!(proposal.yeas(), 3);
    let stats = budget.stats();
    assert_eq!(stats.seen_proposals, 1);
    assert_eq!(stats.seen_proposal_votes, 3);
}

#[test]
fn test_corrupt_budget_cache_leaves_coordinator_empty() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(10);
    let budget = h.context.budget();
    h.passing_proposal(&h.proposal("alpha", 1_000 * COIN, 2, 100), 1);

    std::fs::write(dir.path().join(BUDGET_CACHE_FILE), b"not a budget cache").unwrap();
    assert!(load_budgets(dir.path(), budget).is_err());
    assert_eq!(budget.stats().proposals, 0);
    assert_eq!(budget.stats().seen_proposals, 0);
}

#[test]
fn test_flush_and_load_caches() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(4);
    let hash = h.passing_proposal(&h.proposal("alpha", 1_000 * COIN, 2, 100), 1);

    h.context.flush_caches(dir.path()).unwrap();
    h.context.budget().clear();
    h.context.load_caches(dir.path()).unwrap();

    assert_eq!(h.context.registry().lock().unwrap().size(), 4);
    assert!(h.context.budget().find_proposal(&hash).is_some());
}

#[test]
fn test_context_routes_budget_messages() {
    let h = Harness::new(10);
    let broadcast = h.proposal("alpha", 1_000 * COIN, 2, 100);
    let hash = broadcast.hash();

    h.context
        .process_message(1, &GovernanceMessage::Proposal(broadcast.clone()))
        .unwrap();
    assert!(h.context.budget().find_proposal(&hash).is_some());
    assert_eq!(
        h.context
            .get_inventory_item(&Inv::new(InventoryKind::BudgetProposal, hash)),
        Some(GovernanceMessage::Proposal(broadcast))
    );

    let vote = h.nodes[0].proposal_vote(hash, VoteDirection::Yes, h.chain.now());
    h.context
        .process_message(1, &GovernanceMessage::ProposalVote(vote.clone()))
        .unwrap();
    assert_eq!(
        h.context
            .get_inventory_item(&Inv::new(InventoryKind::BudgetVote, vote.hash())),
        Some(GovernanceMessage::ProposalVote(vote))
    );
}

#[test]
fn test_masternode_paid_without_superblocks() {
    let h = Harness::new(10);
    h.context.new_block();

    let mut tx = Transaction::default();
    let payee = h.context.fill_block_payee(&mut tx, 5 * COIN);
    match payee {
        Some(BlockPayee::Masternode { payee, amount }) => {
            assert_eq!(amount, 5 * COIN);
            assert_eq!(tx.outputs.len(), 1);
            assert_eq!(tx.outputs[0].script_pubkey, payee);
        }
        other => panic!("unexpected payee {:?}", other),
    }

    let winners = queries::masternode_winners(&h.context, 0).unwrap();
    assert_eq!(winners.len(), 21);
    assert_eq!(winners[0].height, 120);
    assert_ne!(winners[1].winner, "Unknown");
}

#[test]
fn test_masternode_queries() {
    let h = Harness::with_active(10, 2);

    let count = queries::masternode_count(&h.context);
    assert_eq!(count.total, 10);
    assert_eq!(count.enabled, 10);
    assert_eq!(count.ipv4, 10);

    let list = queries::list_masternodes(&h.context, None).unwrap();
    assert_eq!(list.len(), 10);
    let mut ranks: Vec<usize> = list.iter().map(|entry| entry.rank).collect();
    ranks.sort_unstable();
    assert_eq!(ranks, (1..=10).collect::<Vec<_>>());

    let filtered = queries::list_masternodes(&h.context, Some("1.2.3.7:")).unwrap();
    assert_eq!(filtered.len(), 1);

    assert!(queries::current_masternode(&h.context).unwrap().is_some());

    let status = queries::masternode_status(&h.context).unwrap();
    assert_eq!(status.netaddr, "1.2.3.2:9999");
    assert_eq!(status.txhash, Some(hex::encode([2u8; 32])));

    let json = serde_json::to_value(&list[0]).unwrap();
    assert!(json.get("lastpaid").is_some());

    let not_masternode = Harness::new(1);
    assert!(matches!(
        queries::masternode_status(&not_masternode.context),
        Err(GovernanceError::NotMasternode)
    ));
}

#[test]
fn test_budget_queries() {
    let h = Harness::new(10);
    let alpha = h.passing_proposal(&h.proposal("alpha", 1_000 * COIN, 2, 100), 3);
    h.passing_proposal(&h.proposal("beta", 500 * COIN, 1, 100), 0);

    let all = queries::proposals(&h.context).unwrap();
    assert_eq!(all.len(), 2);

    let projection = queries::budget_projection(&h.context).unwrap();
    assert_eq!(projection.len(), 1);
    let entry = &projection[0];
    assert_eq!(entry.proposal.hash, hex::encode(alpha));
    assert_eq!(entry.proposal.yeas, 3);
    assert_eq!(entry.proposal.total_payment_count, 2);
    assert_eq!(entry.proposal.total_payment, 2_000 * COIN);
    assert!(entry.proposal.is_established);
    assert_eq!(entry.alloted, 1_000 * COIN);
    assert_eq!(entry.total_budget_alloted, 1_000 * COIN);

    // The proposal fields are flattened next to the allotment.
    let json = serde_json::to_value(entry).unwrap();
    assert_eq!(json["name"], "alpha");
    assert_eq!(json["alloted"], serde_json::json!(1_000 * COIN));

    assert!(queries::finalized_budget_reports(&h.context).is_empty());
}

#[test]
fn test_maintenance_tick_refreshes_active_masternode() {
    let h = Harness::with_active(3, 1);
    h.context.run_maintenance_tick(300);
    let active = h.context.active().unwrap().lock().unwrap();
    assert!(active.is_started());
    drop(active);

    h.context.run_maintenance_tick(60);
    assert_eq!(h.context.registry().lock().unwrap().size(), 3);
}

#[test]
fn test_maintenance_worker_stops() {
    let h = Harness::new(3);
    let handle = spawn_maintenance(h.context.clone(), Duration::from_millis(5)).unwrap();
    thread::sleep(Duration::from_millis(30));
    assert!(handle.is_running());
    handle.stop();
    assert_eq!(h.context.registry().lock().unwrap().size(), 3);
}
