//! Cache key derivation.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Key identifying one resolved backend call.
///
/// Derived from the resolved backend URL and the headers forwarded to the
/// backend. Header names are compared case-insensitively and the headers are
/// hashed in sorted order, so two requests that produce the same backend call
/// share a fingerprint whatever order their headers arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(url: &str, headers: &BTreeMap<String, String>) -> Self {
        let normalized: BTreeMap<String, &str> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        for (name, value) in &normalized {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
