mod common;

use common::{registry, MockChain, MockPeers, TestNode};
use rusty_masternode::cache::{dump_masternode_cache, load_masternode_cache};
use rusty_masternode::masternode::MASTERNODE_EXPIRATION_SECONDS;
use rusty_masternode::MasternodeError;
use rusty_shared_types::interfaces::ChainView;
use rusty_shared_types::masternode::MasternodeStatus;
use rusty_shared_types::p2p::{GovernanceMessage, Inv, InventoryKind, SyncItem};
use rusty_shared_types::script::script_for_pubkey;
use rusty_shared_types::{ChainParams, TxOutput, COIN};

#[test]
fn test_broadcast_with_mature_collateral_is_added() {
    let _ = env_logger::builder().is_test(true).try_init();
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    node.fund(&chain, 100);
    let mnb = node.mature_broadcast(&chain);

    assert_eq!(registry.process_broadcast(1, &mnb), Ok(true));
    assert_eq!(registry.size(), 1);
    assert!(peers
        .relayed()
        .contains(&Inv::new(InventoryKind::MasternodeAnnounce, mnb.hash())));

    // Replays of the same broadcast are ignored.
    assert_eq!(registry.process_broadcast(2, &mnb), Ok(false));

    assert!(registry.find(&node.vin).is_some());
    assert!(registry
        .find_by_pubkey(&node.operator.public_key_bytes())
        .is_some());
    assert!(registry
        .find_by_payee(&script_for_pubkey(&node.collateral.public_key_bytes()))
        .is_some());
    assert!(registry.find_by_addr(&node.addr).is_some());

    registry.check();
    assert_eq!(registry.count_enabled(None), 1);
    assert_eq!(registry.count_enabled(Some(common::PROTOCOL + 1)), 0);
}

#[test]
fn test_immature_collateral_is_retried() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    node.fund(&chain, 195);
    let mnb = node.mature_broadcast(&chain);

    assert_eq!(
        registry.process_broadcast(1, &mnb),
        Err(MasternodeError::CollateralImmature { required: 15, found: 6 })
    );
    assert_eq!(registry.size(), 0);

    chain.mine(9);
    assert_eq!(registry.process_broadcast(1, &mnb), Ok(true));
    assert_eq!(registry.size(), 1);
}

#[test]
fn test_collateral_key_mismatch_is_penalized() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    chain.add_utxo(
        node.vin.0.clone(),
        TxOutput::new(10_000 * COIN, script_for_pubkey(&[9u8; 32])),
        100,
    );
    let message = GovernanceMessage::MasternodeBroadcast(node.mature_broadcast(&chain));

    assert_eq!(
        registry.process_message(7, &message),
        Err(MasternodeError::CollateralKeyMismatch)
    );
    assert_eq!(peers.penalties(), vec![(7, 33)]);
    assert_eq!(registry.size(), 0);
}

#[test]
fn test_bad_broadcast_signature_is_penalized() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    node.fund(&chain, 100);
    let mut mnb = node.mature_broadcast(&chain);
    mnb.protocol_version += 1;

    let result = registry.process_message(3, &GovernanceMessage::MasternodeBroadcast(mnb));
    assert_eq!(result, Err(MasternodeError::InvalidBroadcastSignature));
    assert_eq!(peers.penalties(), vec![(3, 100)]);
}

#[test]
fn test_newer_broadcast_replaces_entry() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    node.fund(&chain, 100);
    let now = chain.now();

    registry
        .process_broadcast(1, &node.broadcast(&chain, now - 9000, now - 1200))
        .unwrap();

    let newer = node.broadcast(&chain, now - 200, now - 150);
    assert_eq!(registry.process_broadcast(1, &newer), Ok(true));
    assert_eq!(registry.find(&node.vin).unwrap().sig_time, now - 200);

    let too_soon = node.broadcast(&chain, now - 100, now - 90);
    assert_eq!(
        registry.process_broadcast(1, &too_soon),
        Err(MasternodeError::BroadcastTooSoon)
    );

    let older = node.broadcast(&chain, now - 9500, now - 9400);
    assert_eq!(
        registry.process_broadcast(1, &older),
        Err(MasternodeError::StaleBroadcast)
    );
    assert_eq!(registry.find(&node.vin).unwrap().sig_time, now - 200);
    assert!(peers.penalties().is_empty());
}

#[test]
fn test_broadcast_for_foreign_collateral_cannot_take_over_entry() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let owner = TestNode::new(1);
    owner.fund(&chain, 100);
    let now = chain.now();
    registry
        .process_broadcast(1, &owner.broadcast(&chain, now - 9000, now - 1200))
        .unwrap();

    // Validly signed, newer, but by a key that does not own the collateral.
    let mut intruder = TestNode::new(2);
    intruder.vin = owner.vin.clone();
    let spoofed = intruder.broadcast(&chain, now - 200, now - 150);

    assert_eq!(
        registry.process_message(9, &GovernanceMessage::MasternodeBroadcast(spoofed)),
        Err(MasternodeError::CollateralKeyMismatch)
    );
    assert_eq!(peers.penalties(), vec![(9, 33)]);

    let entry = registry.find(&owner.vin).unwrap();
    assert_eq!(entry.collateral_pubkey, owner.collateral.public_key_bytes());
    assert_eq!(entry.masternode_pubkey, owner.operator.public_key_bytes());
    assert_eq!(entry.sig_time, now - 9000);
    assert!(registry
        .find_by_payee(&script_for_pubkey(&intruder.collateral.public_key_bytes()))
        .is_none());
    assert!(registry
        .find_by_pubkey(&intruder.operator.public_key_bytes())
        .is_none());
}

#[test]
fn test_ping_refreshes_entry() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    node.fund(&chain, 100);
    registry
        .process_broadcast(1, &node.mature_broadcast(&chain))
        .unwrap();

    let now = chain.now();
    let ping = node.ping(&chain, now);
    assert_eq!(registry.process_ping(1, &ping), Ok(()));
    assert_eq!(registry.find(&node.vin).unwrap().last_ping.sig_time, now);
    assert!(peers
        .relayed()
        .contains(&Inv::new(InventoryKind::MasternodePing, ping.hash())));

    let early = node.ping(&chain, now + 10);
    assert_eq!(registry.process_ping(1, &early), Err(MasternodeError::PingTooEarly));

    let mut forged = node.ping(&chain, now + 600);
    forged.signature = node.ping(&chain, now + 601).signature;
    assert_eq!(
        registry.process_message(4, &GovernanceMessage::MasternodePing(forged)),
        Err(MasternodeError::InvalidPingSignature)
    );
    assert_eq!(peers.penalties(), vec![(4, 33)]);
}

#[test]
fn test_ping_from_unknown_masternode_asks_once() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    let now = chain.now();

    assert_eq!(
        registry.process_ping(5, &node.ping(&chain, now)),
        Err(MasternodeError::UnknownMasternode)
    );
    assert_eq!(
        registry.process_ping(5, &node.ping(&chain, now + 1)),
        Err(MasternodeError::UnknownMasternode)
    );

    let asks: Vec<_> = peers
        .sent()
        .into_iter()
        .filter(|(_, m)| *m == GovernanceMessage::MasternodeList(Some(node.vin.clone())))
        .collect();
    assert_eq!(asks.len(), 1);
    assert!(peers.penalties().is_empty());
}

#[test]
fn test_check_and_remove() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let spent = TestNode::new(1);
    let idle = TestNode::new(2);
    for node in [&spent, &idle] {
        node.fund(&chain, 100);
        registry
            .process_broadcast(1, &node.mature_broadcast(&chain))
            .unwrap();
    }
    assert_eq!(registry.size(), 2);

    chain.spend(&spent.vin.0);
    registry.check_and_remove(false);
    assert_eq!(registry.size(), 1);
    assert!(registry.find(&spent.vin).is_none());

    // idle last pinged 1200 s ago
    chain.advance_time(MASTERNODE_EXPIRATION_SECONDS - 1200);
    registry.check_and_remove(false);
    assert_eq!(
        registry.find(&idle.vin).unwrap().status,
        MasternodeStatus::Expired
    );
    registry.check_and_remove(true);
    assert_eq!(registry.size(), 0);
}

#[test]
fn test_list_request_on_mainnet() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    peers.set_address(9, "8.8.8.8:9999");
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let mut private = TestNode::new(3);
    private.addr = "10.0.0.5:9999".parse().unwrap();
    for node in [&TestNode::new(1), &TestNode::new(2), &private] {
        node.fund(&chain, 100);
        registry
            .process_broadcast(1, &node.mature_broadcast(&chain))
            .unwrap();
    }
    assert_eq!(registry.size(), 3);

    assert_eq!(registry.process_list_request(9, None), Ok(2));
    assert!(peers.sent().contains(&(
        9,
        GovernanceMessage::SyncStatusCount {
            item: SyncItem::MasternodeList,
            count: 2
        }
    )));
    assert_eq!(peers.inventory.lock().unwrap().len(), 2);

    assert_eq!(
        registry.process_message(9, &GovernanceMessage::MasternodeList(None)),
        Err(MasternodeError::ListAlreadyRequested)
    );
    assert_eq!(peers.penalties(), vec![(9, 34)]);

    let single = TestNode::new(1).vin;
    assert_eq!(registry.process_list_request(9, Some(&single)), Ok(1));
}

#[test]
fn test_dseg_update_is_throttled_on_mainnet_only() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    peers.set_address(2, "8.8.4.4:9999");

    let mut main = registry(chain.clone(), peers.clone(), ChainParams::main());
    main.dseg_update(2);
    main.dseg_update(2);
    assert_eq!(peers.sent().len(), 1);

    let mut regtest = registry(chain.clone(), peers.clone(), ChainParams::regtest());
    regtest.dseg_update(2);
    regtest.dseg_update(2);
    assert_eq!(peers.sent().len(), 3);
}

#[test]
fn test_stable_size_and_networks() {
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());
    let now = chain.now();

    let old = TestNode::new(1);
    let young = TestNode::new(2);
    old.fund(&chain, 100);
    young.fund(&chain, 100);
    registry
        .process_broadcast(1, &old.broadcast(&chain, now - 9000, now - 1200))
        .unwrap();
    registry
        .process_broadcast(1, &young.broadcast(&chain, now - 7000, now - 1200))
        .unwrap();

    assert_eq!(registry.stable_size(true), 1);
    assert_eq!(registry.stable_size(false), 2);
    assert_eq!(registry.count_networks().ipv4, 2);
    assert!(registry.to_string().starts_with("Masternodes: 2,"));
}

#[test]
fn test_cache_round_trip_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());

    let node = TestNode::new(1);
    node.fund(&chain, 100);
    registry
        .process_broadcast(1, &node.mature_broadcast(&chain))
        .unwrap();
    dump_masternode_cache(dir.path(), &registry).unwrap();

    let mut restored = common::registry(chain.clone(), peers.clone(), ChainParams::main());
    load_masternode_cache(dir.path(), &mut restored).unwrap();
    assert_eq!(restored.size(), 1);
    assert!(restored.find(&node.vin).is_some());

    let empty_dir = tempfile::tempdir().unwrap();
    assert!(load_masternode_cache(empty_dir.path(), &mut restored).is_err());
    assert_eq!(restored.size(), 0);
}

#[test]
fn test_active_masternode_starts_and_pings() {
    use rusty_crypto::RustyKeyPair;
    use rusty_masternode::{ActiveMasternode, ActiveMasternodeConfig, ActiveMasternodeStatus};

    let chain = MockChain::new(200);
    let peers = MockPeers::new();
    let mut registry = registry(chain.clone(), peers.clone(), ChainParams::main());
    let node = TestNode::new(1);
    node.fund(&chain, 100);

    let operator = RustyKeyPair::from_seed(&[101u8; 32]).unwrap();
    let mut active = ActiveMasternode::new(operator, node.addr, ActiveMasternodeConfig::default());

    active.manage_status(&mut registry, false);
    assert_eq!(*active.status(), ActiveMasternodeStatus::SyncInProcess);

    active.manage_status(&mut registry, true);
    assert!(matches!(active.status(), ActiveMasternodeStatus::NotCapable(_)));

    registry
        .process_broadcast(1, &node.mature_broadcast(&chain))
        .unwrap();
    active.manage_status(&mut registry, true);
    assert_eq!(*active.status(), ActiveMasternodeStatus::Started);
    assert_eq!(active.vin(), Some(&node.vin));
    assert_eq!(
        registry.find(&node.vin).unwrap().last_ping.sig_time,
        chain.now()
    );

    assert!(active.send_ping(&mut registry).is_err());
    chain.advance_time(301);
    let ping = active.send_ping(&mut registry).unwrap();
    assert_eq!(ping.block_hash, chain.block_hash(chain.height() - 12).unwrap());
    assert!(peers
        .relayed()
        .contains(&Inv::new(InventoryKind::MasternodePing, ping.hash())));
}
