//! Script helpers for payee scripts and `OP_RETURN` collateral commitments.

mod opcode;

pub use opcode::{Opcode, PUSH_20, PUSH_32};

use crate::{Hash, PubKeyHash, PublicKey};

/// Builds `OP_RETURN <32-byte hash>`, the commitment a governance fee transaction must carry.
pub fn op_return_script(hash: &Hash) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    script.push(Opcode::OpReturn.to_u8());
    script.push(PUSH_32);
    script.extend_from_slice(hash);
    script
}

/// Builds a standard pay-to-pubkey-hash script.
pub fn p2pkh_script(pubkey_hash: &PubKeyHash) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(Opcode::OpDup.to_u8());
    script.push(Opcode::OpHash160.to_u8());
    script.push(PUSH_20);
    script.extend_from_slice(pubkey_hash);
    script.push(Opcode::OpEqualVerify.to_u8());
    script.push(Opcode::OpChecksig.to_u8());
    script
}

/// Hash of a public key as used in P2PKH scripts (first 20 bytes of BLAKE3).
pub fn pubkey_hash(pubkey: &PublicKey) -> PubKeyHash {
    let digest = blake3::hash(pubkey);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.as_bytes()[..20]);
    out
}

/// The P2PKH script paying the given public key.
pub fn script_for_pubkey(pubkey: &PublicKey) -> Vec<u8> {
    p2pkh_script(&pubkey_hash(pubkey))
}

/// Extracts the key hash from a P2PKH script.
pub fn extract_p2pkh(script: &[u8]) -> Option<PubKeyHash> {
    // OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG
    if script.len() == 25
        && script[0] == Opcode::OpDup.to_u8()
        && script[1] == Opcode::OpHash160.to_u8()
        && script[2] == PUSH_20
        && script[23] == Opcode::OpEqualVerify.to_u8()
        && script[24] == Opcode::OpChecksig.to_u8()
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        Some(hash)
    } else {
        None
    }
}

fn is_p2sh(script: &[u8]) -> bool {
    // OP_HASH160 <20-byte-hash> OP_EQUAL
    script.len() == 23
        && script[0] == Opcode::OpHash160.to_u8()
        && script[1] == PUSH_20
        && script[22] == Opcode::OpEqual.to_u8()
}

/// True for P2PKH and P2SH scripts.
pub fn is_normal_payment_script(script: &[u8]) -> bool {
    extract_p2pkh(script).is_some() || is_p2sh(script)
}

/// True when the output can never be spent (starts with `OP_RETURN`).
pub fn is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&Opcode::OpReturn.to_u8())
}

/// Hex rendering of a script for logs and reports.
pub fn script_to_string(script: &[u8]) -> String {
    hex::encode(script)
}
