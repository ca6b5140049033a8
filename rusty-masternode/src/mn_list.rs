//! Registry of known masternodes, keyed by collateral outpoint.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rusty_shared_types::interfaces::{ChainView, PeerGateway};
use rusty_shared_types::masternode::{
    MasternodeBroadcast, MasternodeID, MasternodePing, MasternodeStatus,
};
use rusty_shared_types::p2p::{GovernanceMessage, Inv, InventoryKind, PeerId, SyncItem};
use rusty_shared_types::script::{extract_p2pkh, pubkey_hash};
use rusty_shared_types::{ChainParams, Hash, PublicKey};

use crate::broadcast::{check_broadcast, check_collateral_inputs, check_ping, MasternodeError};
use crate::masternode::{
    Masternode, MASTERNODE_MIN_MNB_SECONDS, MASTERNODE_MIN_MNP_SECONDS,
    MASTERNODE_REMOVAL_SECONDS, MASTERNODE_WINNER_MIN_AGE,
};

/// Configuration for the masternode registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Entries below this protocol version are evicted and never counted
    pub min_protocol_version: u32,
    /// Minimum confirmations of a collateral before its broadcast is accepted
    pub min_collateral_confirmations: u64,
    /// How long a peer must wait between two full list requests (in seconds)
    pub dseg_interval_secs: i64,
    /// How long we wait before asking again for the same entry (in seconds)
    pub ask_for_entry_interval_secs: i64,
    /// Lifetime of seen broadcasts and pings (in seconds)
    pub seen_ttl_secs: i64,
}

impl RegistryConfig {
    pub fn from_params(params: &ChainParams) -> Self {
        Self {
            min_protocol_version: params.min_protocol_version,
            min_collateral_confirmations: params.masternode_min_confirmations,
            dseg_interval_secs: 3 * 60 * 60, // 3 hours
            ask_for_entry_interval_secs: MASTERNODE_MIN_MNP_SECONDS,
            seen_ttl_secs: MASTERNODE_REMOVAL_SECONDS * 2,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from_params(&ChainParams::default())
    }
}

/// Serializable copy of the registry state, written to the masternode cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub masternodes: Vec<Masternode>,
    pub asked_us_for_list: HashMap<IpAddr, i64>,
    pub we_asked_for_list: HashMap<IpAddr, i64>,
    pub we_asked_for_entry: HashMap<MasternodeID, i64>,
    pub seen_broadcasts: HashMap<Hash, MasternodeBroadcast>,
    pub seen_pings: HashMap<Hash, MasternodePing>,
}

/// Address family counts of the registry entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkCounts {
    pub ipv4: usize,
    pub ipv6: usize,
    pub onion: usize,
}

/// Tracks every known masternode and the request bookkeeping around the list.
///
/// Lookups return owned copies; callers re-resolve by `MasternodeID` after any mutation.
pub struct MasternodeRegistry {
    chain: Arc<dyn ChainView>,
    peers: Arc<dyn PeerGateway>,
    params: ChainParams,
    config: RegistryConfig,
    masternodes: BTreeMap<MasternodeID, Masternode>,
    /// Peers that asked us for the whole list, and when they may ask again
    asked_us_for_list: HashMap<IpAddr, i64>,
    /// Peers we asked for the whole list, and when we may ask again
    we_asked_for_list: HashMap<IpAddr, i64>,
    /// Entries we asked for, and when we may ask again
    we_asked_for_entry: HashMap<MasternodeID, i64>,
    seen_broadcasts: HashMap<Hash, MasternodeBroadcast>,
    seen_pings: HashMap<Hash, MasternodePing>,
}

impl MasternodeRegistry {
    pub fn new(
        chain: Arc<dyn ChainView>,
        peers: Arc<dyn PeerGateway>,
        params: ChainParams,
        config: RegistryConfig,
    ) -> Self {
        Self {
            chain,
            peers,
            params,
            config,
            masternodes: BTreeMap::new(),
            asked_us_for_list: HashMap::new(),
            we_asked_for_list: HashMap::new(),
            we_asked_for_entry: HashMap::new(),
            seen_broadcasts: HashMap::new(),
            seen_pings: HashMap::new(),
        }
    }

    pub fn chain(&self) -> &Arc<dyn ChainView> {
        &self.chain
    }

    pub fn peers(&self) -> &Arc<dyn PeerGateway> {
        &self.peers
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.chain.adjusted_time()
    }

    /// Whether broadcasts and pings are signed with the hash scheme at the tip.
    pub fn uses_hash_signatures(&self) -> bool {
        self.chain
            .best_height()
            .map_or(false, |height| self.params.uses_hash_signatures(height))
    }

    /// Inserts an enabled entry that is not known yet.
    pub fn add(&mut self, mn: Masternode) -> bool {
        if !mn.is_enabled() || self.masternodes.contains_key(&mn.vin) {
            return false;
        }
        info!(
            "Adding new masternode {} - {} now",
            mn.vin.to_short_string(),
            self.masternodes.len() + 1
        );
        self.masternodes.insert(mn.vin.clone(), mn);
        true
    }

    /// Asks `peer` for a single entry unless we asked recently.
    pub fn ask_for_mn(&mut self, peer: PeerId, vin: &MasternodeID) {
        let now = self.now();
        if let Some(&next_allowed) = self.we_asked_for_entry.get(vin) {
            if now < next_allowed {
                return;
            }
        }
        debug!("Asking peer {} for missing masternode {}", peer, vin.to_short_string());
        self.peers
            .push_message(peer, GovernanceMessage::MasternodeList(Some(vin.clone())));
        self.we_asked_for_entry
            .insert(vin.clone(), now + self.config.ask_for_entry_interval_secs);
    }

    /// Refreshes the status of every entry.
    pub fn check(&mut self) {
        let now = self.now();
        let chain = Arc::clone(&self.chain);
        for mn in self.masternodes.values_mut() {
            mn.check(now, chain.as_ref());
        }
    }

    /// Evicts dead entries and expires request and seen-object bookkeeping.
    pub fn check_and_remove(&mut self, force_expired: bool) {
        self.check();
        let now = self.now();
        let hash_scheme = self.uses_hash_signatures();
        let min_protocol = self.config.min_protocol_version;

        let evicted: Vec<MasternodeID> = self
            .masternodes
            .values()
            .filter(|mn| {
                matches!(
                    mn.status,
                    MasternodeStatus::Removed | MasternodeStatus::OutpointSpent
                ) || (force_expired && mn.status == MasternodeStatus::Expired)
                    || mn.protocol_version < min_protocol
            })
            .map(|mn| mn.vin.clone())
            .collect();

        for vin in &evicted {
            if let Some(mn) = self.masternodes.remove(vin) {
                debug!(
                    "Removing inactive masternode {} ({}) - {} now",
                    vin.to_short_string(),
                    mn.status.as_str(),
                    self.masternodes.len()
                );
            }
            self.seen_broadcasts.retain(|_, mnb| &mnb.vin != vin);
            self.we_asked_for_entry.remove(vin);
        }

        self.asked_us_for_list.retain(|_, t| *t >= now);
        self.we_asked_for_list.retain(|_, t| *t >= now);
        self.we_asked_for_entry.retain(|_, t| *t >= now);

        let cutoff = now - self.config.seen_ttl_secs;
        self.seen_broadcasts
            .retain(|_, mnb| mnb.last_ping.sig_time >= cutoff);
        self.seen_pings.retain(|_, ping| ping.sig_time >= cutoff);
    }

    pub fn clear(&mut self) {
        self.masternodes.clear();
        self.asked_us_for_list.clear();
        self.we_asked_for_list.clear();
        self.we_asked_for_entry.clear();
        self.seen_broadcasts.clear();
        self.seen_pings.clear();
    }

    pub fn size(&self) -> usize {
        self.masternodes.len()
    }

    /// Enabled entries old enough to be paid once payment enforcement is active.
    pub fn stable_size(&mut self, payment_enforcement_active: bool) -> usize {
        let now = self.now();
        let hash_scheme = self.uses_hash_signatures();
        let min_protocol = self.config.min_protocol_version;
        let chain = Arc::clone(&self.chain);
        let mut stable = 0;
        for mn in self.masternodes.values_mut() {
            if mn.protocol_version < min_protocol {
                continue;
            }
            if payment_enforcement_active && now - mn.sig_time < MASTERNODE_WINNER_MIN_AGE {
                continue;
            }
            mn.check(now, chain.as_ref());
            if mn.is_enabled() {
                stable += 1;
            }
        }
        stable
    }

    /// Enabled entries at or above `protocol_version` (the configured minimum when `None`).
    pub fn count_enabled(&self, protocol_version: Option<u32>) -> usize {
        let min_protocol = protocol_version.unwrap_or(self.config.min_protocol_version);
        self.masternodes
            .values()
            .filter(|mn| mn.protocol_version >= min_protocol && mn.is_enabled())
            .count()
    }

    pub fn count_networks(&self) -> NetworkCounts {
        let mut counts = NetworkCounts::default();
        for mn in self.masternodes.values() {
            match mn.addr.ip() {
                IpAddr::V4(_) => counts.ipv4 += 1,
                IpAddr::V6(_) => counts.ipv6 += 1,
            }
        }
        counts
    }

    /// Requests the full list from `peer`, at most once per interval on mainnet.
    pub fn dseg_update(&mut self, peer: PeerId) {
        let now = self.now();
        let addr = self.peers.peer_address(peer);
        let throttled = self.params.is_main() && addr.map_or(false, |a| !a.ip().is_loopback());
        if throttled {
            if let Some(ip) = addr.map(|a| a.ip()) {
                if let Some(&next_allowed) = self.we_asked_for_list.get(&ip) {
                    if now < next_allowed {
                        debug!("dseg - we already asked peer {} for the list, skipping", peer);
                        return;
                    }
                }
                self.we_asked_for_list
                    .insert(ip, now + self.config.dseg_interval_secs);
            }
        }
        self.peers
            .push_message(peer, GovernanceMessage::MasternodeList(None));
    }

    pub fn find(&self, vin: &MasternodeID) -> Option<Masternode> {
        self.masternodes.get(vin).cloned()
    }

    /// Entry whose collateral key pays to `script`.
    pub fn find_by_payee(&self, script: &[u8]) -> Option<Masternode> {
        let target = extract_p2pkh(script)?;
        self.masternodes
            .values()
            .find(|mn| pubkey_hash(&mn.collateral_pubkey) == target)
            .cloned()
    }

    /// Entry operated with `masternode_pubkey`.
    pub fn find_by_pubkey(&self, masternode_pubkey: &PublicKey) -> Option<Masternode> {
        self.masternodes
            .values()
            .find(|mn| &mn.masternode_pubkey == masternode_pubkey)
            .cloned()
    }

    pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<Masternode> {
        self.masternodes
            .values()
            .find(|mn| &mn.addr == addr)
            .cloned()
    }

    pub fn remove(&mut self, vin: &MasternodeID) -> Option<Masternode> {
        let removed = self.masternodes.remove(vin);
        if removed.is_some() {
            debug!("Removing masternode {} - {} now", vin.to_short_string(), self.masternodes.len());
        }
        removed
    }

    /// Copies of every entry, in collateral order.
    pub fn masternodes(&self) -> Vec<Masternode> {
        self.masternodes.values().cloned().collect()
    }

    pub fn is_seen_broadcast(&self, hash: &Hash) -> bool {
        self.seen_broadcasts.contains_key(hash)
    }

    pub fn seen_broadcast(&self, hash: &Hash) -> Option<MasternodeBroadcast> {
        self.seen_broadcasts.get(hash).cloned()
    }

    pub fn seen_ping(&self, hash: &Hash) -> Option<MasternodePing> {
        self.seen_pings.get(hash).cloned()
    }

    /// Records the winner of a block so payment ordering sees it.
    pub fn record_payment(&mut self, vin: &MasternodeID, height: u64, block_time: i64) {
        if let Some(mn) = self.masternodes.get_mut(vin) {
            mn.record_payment(height, block_time);
        }
    }

    /// Inserts or refreshes an entry from a broadcast created locally.
    pub fn update_masternode_list(&mut self, mnb: MasternodeBroadcast) {
        self.seen_pings
            .insert(mnb.last_ping.hash(), mnb.last_ping.clone());
        self.seen_broadcasts.insert(mnb.hash(), mnb.clone());
        info!(
            "update_masternode_list - masternode={} addr={}",
            mnb.vin.to_short_string(),
            mnb.addr
        );
        match self.masternodes.get_mut(&mnb.vin) {
            Some(mn) => {
                mn.update_from_new_broadcast(&mnb);
            }
            None => {
                self.add(Masternode::from_broadcast(&mnb));
            }
        }
    }

    /// Stores a ping produced by the local masternode and announces it.
    pub fn update_last_ping(&mut self, ping: MasternodePing) -> bool {
        let now = self.now();
        let chain = Arc::clone(&self.chain);
        let Some(mn) = self.masternodes.get_mut(&ping.vin) else {
            return false;
        };
        mn.last_ping = ping.clone();
        mn.check(now, chain.as_ref());
        let hash = ping.hash();
        self.seen_pings.insert(hash, ping);
        self.peers
            .relay_inventory(Inv::new(InventoryKind::MasternodePing, hash));
        true
    }

    /// Handles an `mnb`. Returns true when the registry changed.
    pub fn process_broadcast(
        &mut self,
        peer: PeerId,
        mnb: &MasternodeBroadcast,
    ) -> Result<bool, MasternodeError> {
        let hash = mnb.hash();
        if self.seen_broadcasts.contains_key(&hash) {
            return Ok(false);
        }
        self.seen_broadcasts.insert(hash, mnb.clone());

        let now = self.now();
        let hash_scheme = self.uses_hash_signatures();
        check_broadcast(mnb, now, self.config.min_protocol_version, hash_scheme)?;

        let chain = Arc::clone(&self.chain);
        if let Some(existing) = self.masternodes.get_mut(&mnb.vin) {
            // Only the owner of the collateral may re-announce an entry.
            if existing.collateral_pubkey != mnb.collateral_pubkey {
                warn!(
                    "mnb - collateral key mismatch for masternode {} from peer {}",
                    mnb.vin.to_short_string(),
                    peer
                );
                return Err(MasternodeError::CollateralKeyMismatch);
            }
            if existing.sig_time >= mnb.sig_time {
                return Err(MasternodeError::StaleBroadcast);
            }
            if existing.is_broadcasted_within(MASTERNODE_MIN_MNB_SECONDS, now) {
                return Err(MasternodeError::BroadcastTooSoon);
            }
            existing.update_from_new_broadcast(mnb);
            existing.check(now, chain.as_ref());
            if existing.is_enabled() {
                self.peers
                    .relay_inventory(Inv::new(InventoryKind::MasternodeAnnounce, hash));
            }
            debug!("mnb - updated masternode {} from peer {}", mnb.vin.to_short_string(), peer);
            return Ok(true);
        }

        if let Err(e) =
            check_collateral_inputs(mnb, chain.as_ref(), self.config.min_collateral_confirmations)
        {
            if matches!(
                e,
                MasternodeError::CollateralImmature { .. } | MasternodeError::CollateralNotFound
            ) {
                // Retry once the collateral matures or shows up.
                self.seen_broadcasts.remove(&hash);
            }
            return Err(e);
        }

        if self.add(Masternode::from_broadcast(mnb)) {
            self.we_asked_for_entry.remove(&mnb.vin);
            self.peers
                .relay_inventory(Inv::new(InventoryKind::MasternodeAnnounce, hash));
        }
        Ok(true)
    }

    /// Handles an `mnp`.
    pub fn process_ping(&mut self, peer: PeerId, ping: &MasternodePing) -> Result<(), MasternodeError> {
        let hash = ping.hash();
        if self.seen_pings.contains_key(&hash) {
            return Ok(());
        }
        self.seen_pings.insert(hash, ping.clone());

        if !self.masternodes.contains_key(&ping.vin) {
            self.ask_for_mn(peer, &ping.vin);
            return Err(MasternodeError::UnknownMasternode);
        }

        let now = self.now();
        let hash_scheme = self.uses_hash_signatures();
        let min_protocol = self.config.min_protocol_version;
        let chain = Arc::clone(&self.chain);
        let Some(mn) = self.masternodes.get_mut(&ping.vin) else {
            return Err(MasternodeError::UnknownMasternode);
        };
        if mn.protocol_version < min_protocol {
            return Err(MasternodeError::ObsoleteProtocol(mn.protocol_version));
        }
        if mn.is_pinged_within(MASTERNODE_MIN_MNP_SECONDS - 60, ping.sig_time) {
            return Err(MasternodeError::PingTooEarly);
        }
        check_ping(ping, &mn.masternode_pubkey, now, hash_scheme)?;
        if chain.block_in_active_chain(&ping.block_hash).is_none() {
            return Err(MasternodeError::UnknownBlock);
        }

        mn.last_ping = ping.clone();
        mn.check(now, chain.as_ref());
        if mn.is_enabled() {
            self.peers
                .relay_inventory(Inv::new(InventoryKind::MasternodePing, hash));
        }
        Ok(())
    }

    /// Handles a `dseg`: announces the whole list or a single entry to `peer`.
    pub fn process_list_request(
        &mut self,
        peer: PeerId,
        filter: Option<&MasternodeID>,
    ) -> Result<usize, MasternodeError> {
        let now = self.now();
        if filter.is_none() && self.params.is_main() {
            if let Some(ip) = self.peers.peer_address(peer).map(|a| a.ip()) {
                if !ip.is_loopback() {
                    if let Some(&next_allowed) = self.asked_us_for_list.get(&ip) {
                        if now < next_allowed {
                            return Err(MasternodeError::ListAlreadyRequested);
                        }
                    }
                    self.asked_us_for_list
                        .insert(ip, now + self.config.dseg_interval_secs);
                }
            }
        }

        let mut count = 0;
        let mut announced = Vec::new();
        for mn in self.masternodes.values() {
            if let IpAddr::V4(v4) = mn.addr.ip() {
                if v4.is_private() {
                    continue;
                }
            }
            if !mn.is_enabled() {
                continue;
            }
            if filter.map_or(true, |vin| vin == &mn.vin) {
                let mnb = mn.to_broadcast();
                let hash = mnb.hash();
                self.peers
                    .push_inventory(peer, Inv::new(InventoryKind::MasternodeAnnounce, hash));
                announced.push((hash, mnb));
                count += 1;
                if filter.is_some() {
                    debug!("dseg - sent 1 masternode entry to peer {}", peer);
                    break;
                }
            }
        }
        self.seen_broadcasts.extend(announced);

        if filter.is_none() {
            self.peers.push_message(
                peer,
                GovernanceMessage::SyncStatusCount {
                    item: SyncItem::MasternodeList,
                    count: count as u32,
                },
            );
            debug!("dseg - sent {} masternode entries to peer {}", count, peer);
        }
        Ok(count)
    }

    /// Routes `mnb`, `mnp` and `dseg`, charging the peer for malformed input.
    pub fn process_message(
        &mut self,
        peer: PeerId,
        message: &GovernanceMessage,
    ) -> Result<(), MasternodeError> {
        let result = match message {
            GovernanceMessage::MasternodeBroadcast(mnb) => {
                self.process_broadcast(peer, mnb).map(|_| ())
            }
            GovernanceMessage::MasternodePing(ping) => self.process_ping(peer, ping),
            GovernanceMessage::MasternodeList(filter) => {
                self.process_list_request(peer, filter.as_ref()).map(|_| ())
            }
            _ => Ok(()),
        };
        if let Err(e) = &result {
            let score = e.dos_score();
            if score > 0 {
                warn!("{} from peer {}: {}", message.command(), peer, e);
                self.peers.misbehaving(peer, score);
            } else {
                debug!("{} from peer {} ignored: {}", message.command(), peer, e);
            }
        }
        result
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            masternodes: self.masternodes(),
            asked_us_for_list: self.asked_us_for_list.clone(),
            we_asked_for_list: self.we_asked_for_list.clone(),
            we_asked_for_entry: self.we_asked_for_entry.clone(),
            seen_broadcasts: self.seen_broadcasts.clone(),
            seen_pings: self.seen_pings.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.masternodes = snapshot
            .masternodes
            .into_iter()
            .map(|mn| (mn.vin.clone(), mn))
            .collect();
        self.asked_us_for_list = snapshot.asked_us_for_list;
        self.we_asked_for_list = snapshot.we_asked_for_list;
        self.we_asked_for_entry = snapshot.we_asked_for_entry;
        self.seen_broadcasts = snapshot.seen_broadcasts;
        self.seen_pings = snapshot.seen_pings;
    }
}

impl fmt::Display for MasternodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Masternodes: {}, peers who asked us for Masternode list: {}, peers we asked for Masternode list: {}, entries in Masternode list we asked for: {}",
            self.masternodes.len(),
            self.asked_us_for_list.len(),
            self.we_asked_for_list.len(),
            self.we_asked_for_entry.len()
        )
    }
}
