//! Token generation and secret digests.

use bulwark_core::validation::TOKEN_PLAINTEXT_BYTES;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Base32 alphabet (RFC 4648, no padding).
const TOKEN_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// SHA-256 of a secret. Stores index tokens and keep passwords by this value.
pub type SecretDigest = [u8; 32];

/// Generates a random token plaintext of [`TOKEN_PLAINTEXT_BYTES`] base32
/// characters.
#[must_use]
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_PLAINTEXT_BYTES)
        .map(|_| char::from(TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}

#[must_use]
pub fn digest(secret: &str) -> SecretDigest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(secret.as_bytes()));
    out
}

/// Compares `candidate` against a stored digest in constant time.
#[must_use]
pub fn digest_matches(stored: &SecretDigest, candidate: &str) -> bool {
    stored.as_slice().ct_eq(digest(candidate).as_slice()).into()
}
