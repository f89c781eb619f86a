//! Password credential hashing and validation.
//!
//! Stored credentials are lower-case hex SHA-256 digests of the plaintext.
//! Only one credential type exists.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The single supported credential type.
pub const PASSWORD: &str = "password";

/// Hex SHA-256 digest of `plaintext`, in the form stored on a record.
pub fn hash_password(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check `plaintext` against a stored digest in constant time.
pub fn verify_password(stored: &str, plaintext: &str) -> bool {
    let candidate = hash_password(plaintext);
    stored.as_bytes().ct_eq(candidate.as_bytes()).into()
}
