//! Cache key derivation
//!
//! Keys must be stable across process restarts because the persistent tier
//! stores them, so hashing uses SHA-256 rather than `DefaultHasher`. The
//! first 128 bits of the digest are rendered in base-36.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Namespace for resource URL keys
pub const RESOURCE_KEY_PREFIX: &str = "res_";

/// Namespace for network request keys
pub const REQUEST_KEY_PREFIX: &str = "api_";

/// Key for a static resource URL
pub fn resource_key(url: &str) -> String {
    let mut key = KeyHasher::new();
    key.push_str(url);
    format!("{}{}", RESOURCE_KEY_PREFIX, key.finalize())
}

/// Key for a network request.
///
/// The method is case-normalized and header names are lowercased and
/// sorted, so logically identical requests share a key.
pub fn request_key(
    method: &str,
    url: &str,
    body: Option<&str>,
    headers: &BTreeMap<String, String>,
) -> String {
    let mut key = KeyHasher::new();
    key.push_str(&method.to_ascii_uppercase());
    key.push_str(url);
    match body {
        Some(body) => {
            key.push_bytes(&[1]);
            key.push_str(body);
        }
        None => key.push_bytes(&[0]),
    }
    key.push_headers(headers);
    format!("{}{}", REQUEST_KEY_PREFIX, key.finalize())
}

/// Incremental key builder over length-prefixed components
#[derive(Debug, Clone)]
pub struct KeyHasher {
    hasher: Sha256,
}

impl KeyHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Length-prefixed so that ("ab", "c") and ("a", "bc") differ
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn push_headers(&mut self, headers: &BTreeMap<String, String>) {
        let normalized: BTreeMap<String, &str> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .collect();

        self.hasher.update((normalized.len() as u64).to_le_bytes());
        for (name, value) in normalized {
            self.push_str(&name);
            self.push_str(value);
        }
    }

    /// Base-36 rendering of the leading 128 bits of the digest
    pub fn finalize(self) -> String {
        let digest = self.hasher.finalize();
        let mut head = [0u8; 16];
        head.copy_from_slice(&digest[..16]);
        to_base36(u128::from_be_bytes(head))
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn to_base36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(25);
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    // Only ASCII digits were pushed
    String::from_utf8(digits).unwrap_or_default()
}
