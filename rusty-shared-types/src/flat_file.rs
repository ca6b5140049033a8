//! Checksummed flat-file snapshots for the masternode and budget caches.
//!
//! Layout: `bincode(magic message) ‖ network magic (4 bytes) ‖ bincode(payload) ‖ blake3 checksum`.
//! The checksum covers every byte before it.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CHECKSUM_LEN: usize = 32;

/// Reasons a snapshot could not be written or read back.
#[derive(Debug, Error)]
pub enum FlatFileError {
    #[error("file error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("could not read checksum")]
    HashReadError,
    #[error("checksum mismatch, data corrupted")]
    IncorrectHash,
    #[error("invalid magic message")]
    IncorrectMagicMessage,
    #[error("invalid network magic number")]
    IncorrectMagicNumber,
    #[error("magic is ok but data has invalid format: {0}")]
    IncorrectFormat(String),
}

/// A single snapshot file tagged with a cache-specific message and the network magic.
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    path: PathBuf,
    magic_message: String,
    network_magic: [u8; 4],
}

impl FlatFileStore {
    pub fn new(path: impl Into<PathBuf>, magic_message: &str, network_magic: [u8; 4]) -> Self {
        Self {
            path: path.into(),
            magic_message: magic_message.to_string(),
            network_magic,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `payload`, appends the checksum and replaces the file.
    pub fn write<T: Serialize>(&self, payload: &T) -> Result<(), FlatFileError> {
        let mut data = bincode::serialize(&self.magic_message)
            .map_err(|e| FlatFileError::IncorrectFormat(e.to_string()))?;
        data.extend_from_slice(&self.network_magic);
        let body =
            bincode::serialize(payload).map_err(|e| FlatFileError::IncorrectFormat(e.to_string()))?;
        data.extend_from_slice(&body);
        let checksum = blake3::hash(&data);
        data.extend_from_slice(checksum.as_bytes());

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Reads the file back, verifying checksum, magic message and network magic in that order.
    pub fn read<T: DeserializeOwned>(&self) -> Result<T, FlatFileError> {
        let raw = fs::read(&self.path)?;
        if raw.len() < CHECKSUM_LEN {
            return Err(FlatFileError::HashReadError);
        }
        let (data, stored_checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
        if blake3::hash(data).as_bytes() != stored_checksum {
            return Err(FlatFileError::IncorrectHash);
        }

        let mut cursor = Cursor::new(data);
        let magic: String = bincode::deserialize_from(&mut cursor)
            .map_err(|_| FlatFileError::IncorrectMagicMessage)?;
        if magic != self.magic_message {
            return Err(FlatFileError::IncorrectMagicMessage);
        }

        let mut network_magic = [0u8; 4];
        cursor
            .read_exact(&mut network_magic)
            .map_err(|_| FlatFileError::IncorrectMagicNumber)?;
        if network_magic != self.network_magic {
            return Err(FlatFileError::IncorrectMagicNumber);
        }

        bincode::deserialize_from(&mut cursor)
            .map_err(|e| FlatFileError::IncorrectFormat(e.to_string()))
    }
}
