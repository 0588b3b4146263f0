//! Credential generation and hashing.

use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Prefix carried by every issued credential.
pub const CREDENTIAL_PREFIX: &str = "pl_live_";

/// Generate a fresh tenant credential.
///
/// Returns `(raw_credential, hash)`: the raw value is shown exactly once at
/// creation time, only the hash is stored.
pub fn generate_credential() -> (String, String) {
    let mut rng = rand::thread_rng();
    let mut random_bytes = [0u8; 32];
    rng.fill(&mut random_bytes);

    let random_part = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
    let raw = format!("{CREDENTIAL_PREFIX}{random_part}");
    let hash = hash_credential(&raw);
    (raw, hash)
}

/// SHA-256 hex digest of a presented credential.
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of a presented credential against a stored hash.
pub fn verify_credential(credential: &str, stored_hash: &str) -> bool {
    let computed = hash_credential(credential);
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
