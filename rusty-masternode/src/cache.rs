//! Masternode registry persistence (`mncache.dat`).

use log::{info, warn};
use std::path::Path;

use rusty_shared_types::{FlatFileError, FlatFileStore};

use crate::mn_list::{MasternodeRegistry, RegistrySnapshot};

pub const MASTERNODE_CACHE_FILE: &str = "mncache.dat";
pub const MASTERNODE_CACHE_MAGIC: &str = "MasternodeCache";

fn store(data_dir: &Path, registry: &MasternodeRegistry) -> FlatFileStore {
    FlatFileStore::new(
        data_dir.join(MASTERNODE_CACHE_FILE),
        MASTERNODE_CACHE_MAGIC,
        registry.params().message_start,
    )
}

pub fn dump_masternode_cache(data_dir: &Path, registry: &MasternodeRegistry) -> Result<(), FlatFileError> {
    store(data_dir, registry).write(&registry.snapshot())?;
    info!("Written info to {}: {}", MASTERNODE_CACHE_FILE, registry);
    Ok(())
}

/// Restores the registry from disk and drops entries that went stale meanwhile.
/// On any failure the registry is left empty and the error is returned.
pub fn load_masternode_cache(data_dir: &Path, registry: &mut MasternodeRegistry) -> Result<(), FlatFileError> {
    let snapshot: RegistrySnapshot = match store(data_dir, registry).read() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Failed to load {}: {}, starting with an empty list", MASTERNODE_CACHE_FILE, e);
            registry.clear();
            return Err(e);
        }
    };
    registry.restore(snapshot);
    registry.check_and_remove(true);
    info!("Loaded info from {}: {}", MASTERNODE_CACHE_FILE, registry);
    Ok(())
}
