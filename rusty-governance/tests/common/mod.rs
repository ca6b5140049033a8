#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rusty_crypto::{sign_message, RustyKeyPair, SignatureScheme};
use rusty_governance::{BudgetConfig, GovernanceContext, PROPOSAL_FEE_TX};
use rusty_masternode::broadcast::{sign_broadcast, sign_ping};
use rusty_masternode::{ActiveMasternode, ActiveMasternodeConfig};
use rusty_shared_types::governance::{
    FinalizedBudgetVote, ProposalBroadcast, ProposalVote, VoteDirection,
};
use rusty_shared_types::interfaces::{ChainView, CollateralWallet, PeerGateway};
use rusty_shared_types::masternode::{MasternodeBroadcast, MasternodeID, MasternodePing};
use rusty_shared_types::p2p::{GovernanceMessage, Inv, PeerId};
use rusty_shared_types::script::{op_return_script, script_for_pubkey};
use rusty_shared_types::{ChainParams, Hash, OutPoint, Transaction, TxOutput, COIN};

pub const START_TIME: i64 = 1_700_000_000;
pub const PROTOCOL: u32 = 170_010;
pub const START_HEIGHT: u64 = 120;

struct ChainState {
    blocks: Vec<Hash>,
    time: i64,
    utxos: HashMap<OutPoint, (TxOutput, u64)>,
    transactions: HashMap<Hash, (Transaction, Option<Hash>)>,
}

/// In-memory chain with one block per height, one minute apart.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(height: u64) -> Arc<Self> {
        let chain = Arc::new(MockChain {
            state: Mutex::new(ChainState {
                blocks: Vec::new(),
                time: START_TIME,
                utxos: HashMap::new(),
                transactions: HashMap::new(),
            }),
        });
        chain.mine(height + 1);
        chain
    }

    pub fn mine(&self, count: u64) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            let height = state.blocks.len() as u64;
            state
                .blocks
                .push(blake3::hash(&height.to_le_bytes()).into());
        }
    }

    /// Mines until the tip is at `height`.
    pub fn mine_to(&self, height: u64) {
        let tip = self.height();
        if height > tip {
            self.mine(height - tip);
        }
    }

    pub fn height(&self) -> u64 {
        self.state.lock().unwrap().blocks.len() as u64 - 1
    }

    pub fn advance_time(&self, seconds: i64) {
        self.state.lock().unwrap().time += seconds;
    }

    pub fn now(&self) -> i64 {
        self.state.lock().unwrap().time
    }

    pub fn add_utxo(&self, outpoint: OutPoint, output: TxOutput, height: u64) {
        self.state
            .lock()
            .unwrap()
            .utxos
            .insert(outpoint, (output, height));
    }

    /// Stores `tx`, mined at `height` when given. Returns its id.
    pub fn add_transaction(&self, tx: Transaction, height: Option<u64>) -> Hash {
        let txid = tx.txid();
        let mut state = self.state.lock().unwrap();
        let block = height.and_then(|h| state.blocks.get(h as usize).copied());
        state.transactions.insert(txid, (tx, block));
        txid
    }

    /// A fee transaction committing to `object`, mined at `height`.
    pub fn add_fee_tx(&self, object: &Hash, fee: u64, height: u64) -> Hash {
        let tx = Transaction {
            outputs: vec![TxOutput::new(fee, op_return_script(object))],
            ..Default::default()
        };
        self.add_transaction(tx, Some(height))
    }
}

impl ChainView for MockChain {
    fn best_height(&self) -> Option<u64> {
        Some(self.height())
    }

    fn block_hash(&self, height: u64) -> Option<Hash> {
        self.state.lock().unwrap().blocks.get(height as usize).copied()
    }

    fn block_in_active_chain(&self, block_hash: &Hash) -> Option<(u64, i64)> {
        let state = self.state.lock().unwrap();
        let tip = state.blocks.len() as i64 - 1;
        state
            .blocks
            .iter()
            .position(|h| h == block_hash)
            .map(|h| (h as u64, state.time - (tip - h as i64) * 60))
    }

    fn get_transaction(&self, txid: &Hash) -> Option<(Transaction, Option<Hash>)> {
        self.state.lock().unwrap().transactions.get(txid).cloned()
    }

    fn coin_depth(&self, outpoint: &OutPoint, height: u64) -> Option<u64> {
        let state = self.state.lock().unwrap();
        let (_, created) = state.utxos.get(outpoint)?;
        if *created > height {
            return None;
        }
        Some(height - created + 1)
    }

    fn unspent_output(&self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.state
            .lock()
            .unwrap()
            .utxos
            .get(outpoint)
            .map(|(output, _)| output.clone())
    }

    fn adjusted_time(&self) -> i64 {
        self.now()
    }
}

/// Peer gateway that records everything sent through it.
#[derive(Default)]
pub struct MockPeers {
    pub misbehaving: Mutex<Vec<(PeerId, u32)>>,
    pub messages: Mutex<Vec<(PeerId, GovernanceMessage)>>,
    pub inventory: Mutex<Vec<(PeerId, Inv)>>,
    pub relayed: Mutex<Vec<Inv>>,
    pub connected: Mutex<Vec<(PeerId, u32)>>,
}

impl MockPeers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(&self, peer: PeerId, version: u32) {
        self.connected.lock().unwrap().push((peer, version));
    }

    pub fn penalties(&self) -> Vec<(PeerId, u32)> {
        self.misbehaving.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(PeerId, GovernanceMessage)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn announced(&self) -> Vec<(PeerId, Inv)> {
        self.inventory.lock().unwrap().clone()
    }

    pub fn relayed(&self) -> Vec<Inv> {
        self.relayed.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.misbehaving.lock().unwrap().clear();
        self.messages.lock().unwrap().clear();
        self.inventory.lock().unwrap().clear();
        self.relayed.lock().unwrap().clear();
    }
}

impl PeerGateway for MockPeers {
    fn misbehaving(&self, peer: PeerId, score: u32) {
        self.misbehaving.lock().unwrap().push((peer, score));
    }

    fn push_message(&self, peer: PeerId, message: GovernanceMessage) {
        self.messages.lock().unwrap().push((peer, message));
    }

    fn push_inventory(&self, peer: PeerId, inv: Inv) {
        self.inventory.lock().unwrap().push((peer, inv));
    }

    fn relay_inventory(&self, inv: Inv) {
        self.relayed.lock().unwrap().push(inv);
    }

    fn connected_peers(&self) -> Vec<(PeerId, u32)> {
        self.connected.lock().unwrap().clone()
    }

    fn peer_address(&self, _peer: PeerId) -> Option<SocketAddr> {
        None
    }
}

/// Wallet that mines every requested fee transaction at the current tip.
pub struct MockWallet {
    chain: Arc<MockChain>,
    pub requests: Mutex<Vec<(Hash, u64)>>,
}

impl MockWallet {
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        Arc::new(MockWallet {
            chain,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(Hash, u64)> {
        self.requests.lock().unwrap().clone()
    }
}

impl CollateralWallet for MockWallet {
    fn create_budget_collateral(&self, object_hash: &Hash, fee: u64) -> Result<Hash, String> {
        self.requests.lock().unwrap().push((*object_hash, fee));
        Ok(self.chain.add_fee_tx(object_hash, fee, self.chain.height()))
    }
}

/// Keys and collateral of one test masternode.
pub struct TestNode {
    pub collateral: RustyKeyPair,
    pub operator: RustyKeyPair,
    pub vin: MasternodeID,
    pub addr: SocketAddr,
}

impl TestNode {
    pub fn new(index: u8) -> Self {
        TestNode {
            collateral: RustyKeyPair::from_seed(&[index; 32]).unwrap(),
            operator: RustyKeyPair::from_seed(&operator_seed(index)).unwrap(),
            vin: MasternodeID(OutPoint::new([index; 32], 0)),
            addr: format!("1.2.3.{}:9999", index).parse().unwrap(),
        }
    }

    pub fn fund(&self, chain: &MockChain, height: u64) {
        chain.add_utxo(
            self.vin.0.clone(),
            TxOutput::new(10_000 * COIN, script_for_pubkey(&self.collateral.public_key_bytes())),
            height,
        );
    }

    pub fn ping(&self, chain: &MockChain, sig_time: i64) -> MasternodePing {
        let anchor = chain.height().saturating_sub(12);
        let mut ping = MasternodePing {
            vin: self.vin.clone(),
            block_hash: chain.block_hash(anchor).unwrap(),
            sig_time,
            signature: Vec::new(),
        };
        sign_ping(&mut ping, &self.operator, false);
        ping
    }

    /// A broadcast that yields an enabled entry right away.
    pub fn mature_broadcast(&self, chain: &MockChain) -> MasternodeBroadcast {
        let now = chain.now();
        let mut mnb = MasternodeBroadcast {
            vin: self.vin.clone(),
            addr: self.addr,
            collateral_pubkey: self.collateral.public_key_bytes(),
            masternode_pubkey: self.operator.public_key_bytes(),
            signature: Vec::new(),
            sig_time: now - 9000,
            protocol_version: PROTOCOL,
            last_ping: self.ping(chain, now - 1200),
        };
        sign_broadcast(&mut mnb, &self.collateral, false);
        mnb
    }

    pub fn proposal_vote(&self, proposal_hash: Hash, direction: VoteDirection, time: i64) -> ProposalVote {
        let mut vote = ProposalVote {
            voter: self.vin.clone(),
            proposal_hash,
            direction,
            time,
            signature: Vec::new(),
        };
        vote.signature = sign_message(&self.operator, &vote.signing_payload(true), SignatureScheme::Hash);
        vote
    }

    pub fn budget_vote(&self, budget_hash: Hash, time: i64) -> FinalizedBudgetVote {
        let mut vote = FinalizedBudgetVote {
            voter: self.vin.clone(),
            budget_hash,
            time,
            signature: Vec::new(),
        };
        vote.signature = sign_message(&self.operator, &vote.signing_payload(true), SignatureScheme::Hash);
        vote
    }
}

fn operator_seed(index: u8) -> [u8; 32] {
    [index.wrapping_add(100); 32]
}

pub fn payee(name: &str) -> Vec<u8> {
    let key: [u8; 32] = blake3::hash(name.as_bytes()).into();
    script_for_pubkey(&key)
}

/// A fully wired context on regtest with `node_count` enabled masternodes,
/// blockchain and governance sync complete.
pub struct Harness {
    pub chain: Arc<MockChain>,
    pub peers: Arc<MockPeers>,
    pub wallet: Arc<MockWallet>,
    pub nodes: Vec<TestNode>,
    pub context: Arc<GovernanceContext>,
}

impl Harness {
    pub fn new(node_count: u8) -> Self {
        Self::build(ChainParams::regtest(), node_count, None)
    }

    /// Like `new`, with node `index` operated locally.
    pub fn with_active(node_count: u8, index: u8) -> Self {
        Self::build(ChainParams::regtest(), node_count, Some(index))
    }

    pub fn build(params: ChainParams, node_count: u8, active_index: Option<u8>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let chain = MockChain::new(START_HEIGHT);
        let peers = MockPeers::new();
        let wallet = MockWallet::new(Arc::clone(&chain));
        let nodes: Vec<TestNode> = (1..=node_count).map(TestNode::new).collect();
        for node in &nodes {
            node.fund(&chain, 1);
        }

        let active = active_index.map(|index| {
            let node = TestNode::new(index);
            ActiveMasternode::new(
                RustyKeyPair::from_seed(&operator_seed(index)).unwrap(),
                node.addr,
                ActiveMasternodeConfig::default(),
            )
        });
        let config = BudgetConfig {
            rng_seed: Some(7),
            ..BudgetConfig::default()
        };
        let context = GovernanceContext::new(
            chain.clone(),
            peers.clone(),
            params,
            config,
            active,
            Some(wallet.clone() as Arc<dyn CollateralWallet>),
        );

        {
            let mut registry = context.registry().lock().unwrap();
            for node in &nodes {
                registry.process_broadcast(0, &node.mature_broadcast(&chain)).unwrap();
            }
            if let Some(active) = context.active() {
                active.lock().unwrap().manage_status(&mut registry, true);
            }
        }
        {
            let mut sync = context.sync_status().lock().unwrap();
            sync.set_blockchain_synced(true);
            sync.mark_synced();
        }
        peers.reset();

        Harness {
            chain,
            peers,
            wallet,
            nodes,
            context: Arc::new(context),
        }
    }

    /// A proposal for the next cycle paid by a fee transaction mined at `fee_height`.
    pub fn proposal(&self, name: &str, amount: u64, payments: u64, fee_height: u64) -> ProposalBroadcast {
        let cycle = self.context.params().budget_cycle_blocks;
        let block_start = self.context.params().next_cycle_start(self.chain.height());
        let mut broadcast = ProposalBroadcast::new(
            name.to_string(),
            format!("https://forum.rusty.coin/{}", name),
            payments,
            payee(name),
            amount,
            block_start,
            cycle,
            [0u8; 32],
        );
        broadcast.fee_tx_hash = self
            .chain
            .add_fee_tx(&broadcast.hash(), PROPOSAL_FEE_TX, fee_height);
        broadcast
    }

    /// Submits `broadcast` from peer 1 and has the first `yes` nodes vote for it.
    pub fn passing_proposal(&self, broadcast: &ProposalBroadcast, yes: usize) -> Hash {
        let budget = self.context.budget();
        budget
            .process_message(1, &GovernanceMessage::Proposal(broadcast.clone()))
            .unwrap();
        let hash = broadcast.hash();
        let now = self.chain.now();
        for node in self.nodes.iter().take(yes) {
            let vote = node.proposal_vote(hash, VoteDirection::Yes, now);
            budget
                .process_message(1, &GovernanceMessage::ProposalVote(vote))
                .unwrap();
        }
        hash
    }
}
