#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rusty_crypto::RustyKeyPair;
use rusty_masternode::broadcast::{sign_broadcast, sign_ping};
use rusty_masternode::{MasternodeRegistry, RegistryConfig};
use rusty_shared_types::interfaces::{ChainView, PeerGateway};
use rusty_shared_types::masternode::{MasternodeBroadcast, MasternodeID, MasternodePing};
use rusty_shared_types::p2p::{GovernanceMessage, Inv, PeerId};
use rusty_shared_types::script::script_for_pubkey;
use rusty_shared_types::{ChainParams, Hash, OutPoint, Transaction, TxOutput, COIN};

pub const START_TIME: i64 = 1_700_000_000;
pub const PROTOCOL: u32 = 170_010;

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

    pub fn height(&self) -> u64 {
        self.state.lock().unwrap().blocks.len() as u64 - 1
    }

    pub fn set_time(&self, time: i64) {
        self.state.lock().unwrap().time = time;
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

    pub fn spend(&self, outpoint: &OutPoint) {
        self.state.lock().unwrap().utxos.remove(outpoint);
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
    pub addresses: Mutex<HashMap<PeerId, SocketAddr>>,
}

impl MockPeers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_address(&self, peer: PeerId, addr: &str) {
        self.addresses
            .lock()
            .unwrap()
            .insert(peer, addr.parse().unwrap());
    }

    pub fn penalties(&self) -> Vec<(PeerId, u32)> {
        self.misbehaving.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(PeerId, GovernanceMessage)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn relayed(&self) -> Vec<Inv> {
        self.relayed.lock().unwrap().clone()
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
        self.addresses
            .lock()
            .unwrap()
            .keys()
            .map(|peer| (*peer, PROTOCOL))
            .collect()
    }

    fn peer_address(&self, peer: PeerId) -> Option<SocketAddr> {
        self.addresses.lock().unwrap().get(&peer).copied()
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
            operator: RustyKeyPair::from_seed(&[index.wrapping_add(100); 32]).unwrap(),
            vin: MasternodeID(OutPoint::new([index; 32], 0)),
            addr: format!("1.2.3.{}:9999", index).parse().unwrap(),
        }
    }

    /// Registers a 10k collateral paying the collateral key at `height`.
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

    /// A broadcast signed at `sig_time` carrying a ping signed at `ping_time`.
    pub fn broadcast(&self, chain: &MockChain, sig_time: i64, ping_time: i64) -> MasternodeBroadcast {
        let mut mnb = MasternodeBroadcast {
            vin: self.vin.clone(),
            addr: self.addr,
            collateral_pubkey: self.collateral.public_key_bytes(),
            masternode_pubkey: self.operator.public_key_bytes(),
            signature: Vec::new(),
            sig_time,
            protocol_version: PROTOCOL,
            last_ping: self.ping(chain, ping_time),
        };
        sign_broadcast(&mut mnb, &self.collateral, false);
        mnb
    }

    /// A broadcast that yields an enabled entry right away.
    pub fn mature_broadcast(&self, chain: &MockChain) -> MasternodeBroadcast {
        let now = chain.now();
        self.broadcast(chain, now - 9000, now - 1200)
    }
}

pub fn registry(chain: Arc<MockChain>, peers: Arc<MockPeers>, params: ChainParams) -> MasternodeRegistry {
    let config = RegistryConfig::from_params(&params);
    MasternodeRegistry::new(chain, peers, params, config)
}
