//! State of the masternode run by this node, if any.

use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;

use rusty_crypto::{sign_message, RustyKeyPair, SignatureScheme};
use rusty_shared_types::masternode::{MasternodeID, MasternodePing};
use rusty_shared_types::PublicKey;

use crate::broadcast::sign_ping;
use crate::masternode::MASTERNODE_PING_SECONDS;
use crate::mn_list::MasternodeRegistry;

/// Configuration for the local masternode
#[derive(Debug, Clone)]
pub struct ActiveMasternodeConfig {
    /// Depth of the block a ping is anchored to
    pub ping_anchor_depth: u64,
    /// Minimum interval between two pings (in seconds)
    pub ping_interval_secs: i64,
}

impl Default for ActiveMasternodeConfig {
    fn default() -> Self {
        Self {
            ping_anchor_depth: 12,
            ping_interval_secs: MASTERNODE_PING_SECONDS, // 5 minutes
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveMasternodeStatus {
    Initial,
    SyncInProcess,
    NotCapable(String),
    Started,
}

impl fmt::Display for ActiveMasternodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveMasternodeStatus::Initial => write!(f, "Node just started, not yet activated"),
            ActiveMasternodeStatus::SyncInProcess => write!(
                f,
                "Sync in progress. Must wait until sync is complete to start Masternode"
            ),
            ActiveMasternodeStatus::NotCapable(reason) => {
                write!(f, "Not capable masternode: {}", reason)
            }
            ActiveMasternodeStatus::Started => write!(f, "Masternode successfully started"),
        }
    }
}

/// The masternode operated with this node's key.
pub struct ActiveMasternode {
    keypair: RustyKeyPair,
    service: SocketAddr,
    config: ActiveMasternodeConfig,
    vin: Option<MasternodeID>,
    status: ActiveMasternodeStatus,
}

impl ActiveMasternode {
    pub fn new(keypair: RustyKeyPair, service: SocketAddr, config: ActiveMasternodeConfig) -> Self {
        Self {
            keypair,
            service,
            config,
            vin: None,
            status: ActiveMasternodeStatus::Initial,
        }
    }

    pub fn status(&self) -> &ActiveMasternodeStatus {
        &self.status
    }

    pub fn vin(&self) -> Option<&MasternodeID> {
        self.vin.as_ref()
    }

    pub fn service(&self) -> SocketAddr {
        self.service
    }

    pub fn pubkey(&self) -> PublicKey {
        self.keypair.public_key_bytes()
    }

    pub fn is_started(&self) -> bool {
        self.status == ActiveMasternodeStatus::Started
    }

    /// Signs `payload` with the masternode key.
    pub fn sign(&self, payload: &[u8], scheme: SignatureScheme) -> Vec<u8> {
        sign_message(&self.keypair, payload, scheme)
    }

    /// Locates our entry in the registry and keeps it pinged.
    pub fn manage_status(&mut self, registry: &mut MasternodeRegistry, blockchain_synced: bool) {
        if !blockchain_synced {
            self.status = ActiveMasternodeStatus::SyncInProcess;
            debug!("manage_status - {}", self.status);
            return;
        }
        if self.status == ActiveMasternodeStatus::SyncInProcess {
            self.status = ActiveMasternodeStatus::Initial;
        }

        if self.status != ActiveMasternodeStatus::Started {
            match registry.find_by_pubkey(&self.pubkey()) {
                Some(mn) if mn.is_enabled() => {
                    if mn.addr != self.service {
                        warn!(
                            "manage_status - announced address {} differs from local service {}",
                            mn.addr, self.service
                        );
                    }
                    info!("Masternode {} enabled, starting pings", mn.vin.to_short_string());
                    self.vin = Some(mn.vin);
                    self.status = ActiveMasternodeStatus::Started;
                }
                Some(mn) => {
                    self.status = ActiveMasternodeStatus::NotCapable(format!(
                        "Masternode is in {} state",
                        mn.status.as_str()
                    ));
                    return;
                }
                None => {
                    self.status = ActiveMasternodeStatus::NotCapable(
                        "Masternode not in masternode list".to_string(),
                    );
                    return;
                }
            }
        }

        if let Err(reason) = self.send_ping(registry) {
            debug!("manage_status - {}", reason);
        }
    }

    /// Signs and announces a fresh ping unless the last one is still recent.
    pub fn send_ping(&mut self, registry: &mut MasternodeRegistry) -> Result<MasternodePing, String> {
        if !self.is_started() {
            return Err("Masternode is not in a running status".to_string());
        }
        let vin = self
            .vin
            .clone()
            .ok_or_else(|| "Masternode has no collateral".to_string())?;
        let mn = match registry.find(&vin) {
            Some(mn) => mn,
            None => {
                self.status = ActiveMasternodeStatus::NotCapable(
                    "Masternode not in masternode list".to_string(),
                );
                return Err(format!("Masternode {} not found in the list", vin.to_short_string()));
            }
        };

        let chain = registry.chain().clone();
        let now = chain.adjusted_time();
        if mn.is_pinged_within(self.config.ping_interval_secs, now) {
            return Err("Too early to send Masternode Ping".to_string());
        }

        let height = chain
            .best_height()
            .ok_or_else(|| "No active chain".to_string())?;
        let anchor = height.saturating_sub(self.config.ping_anchor_depth);
        let block_hash = chain
            .block_hash(anchor)
            .ok_or_else(|| format!("Missing block at height {}", anchor))?;

        let mut ping = MasternodePing {
            vin,
            block_hash,
            sig_time: now,
            signature: Vec::new(),
        };
        sign_ping(&mut ping, &self.keypair, registry.uses_hash_signatures());

        if !registry.update_last_ping(ping.clone()) {
            return Err("Failed to update our own entry".to_string());
        }
        debug!("Relayed ping for {} anchored at height {}", ping.vin.to_short_string(), anchor);
        Ok(ping)
    }
}
