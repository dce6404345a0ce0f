//! Input hashing for change detection.
//!
//! Hashes are computed over a canonical encoding of resolved inputs (object
//! keys sorted at every level) so the same inputs always produce the same
//! hash. Secret inputs only ever enter the hash, and the recorded state, as
//! their SHA-256 digest.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::output::{PropertyMap, PropertySet};

/// Prefix marking a recorded value as a digest of a secret.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Hasher for resolved resource inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputHasher;

impl InputHasher {
    /// Creates a new input hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the recorded form of a secret value: `sha256:<hex>`.
    #[must_use]
    pub fn digest(&self, value: &Value) -> String {
        let mut hasher = Sha256::new();
        feed(&mut hasher, value);
        format!("{DIGEST_PREFIX}{}", hex::encode(hasher.finalize()))
    }

    /// Returns the inputs as they are persisted: secret values are replaced
    /// by their digest, everything else is kept verbatim.
    #[must_use]
    pub fn recordable(&self, inputs: &PropertySet) -> PropertyMap {
        inputs
            .values
            .iter()
            .map(|(name, value)| {
                let recorded = if inputs.is_secret(name) {
                    Value::String(self.digest(value))
                } else {
                    value.clone()
                };
                (name.clone(), recorded)
            })
            .collect()
    }

    /// Returns the outputs as they are persisted. An output echoing the secret
    /// input of the same name is replaced by that input's digest; other
    /// outputs, sensitive or not, are kept verbatim.
    #[must_use]
    pub fn recordable_outputs(&self, outputs: &PropertySet, inputs: &PropertySet) -> PropertyMap {
        outputs
            .values
            .iter()
            .map(|(name, value)| {
                let echoed = inputs.is_secret(name) && inputs.get(name) == Some(value);
                let recorded = if echoed {
                    Value::String(self.digest(value))
                } else {
                    value.clone()
                };
                (name.clone(), recorded)
            })
            .collect()
    }

    /// Puts back echoed secret outputs recorded as digests, taking the
    /// plaintext from the current inputs. A digest that does not match the
    /// current input is left as recorded.
    #[must_use]
    pub fn restore_echoed(&self, mut outputs: PropertySet, inputs: &PropertySet) -> PropertySet {
        for (name, value) in &mut outputs.values {
            let Some(input) = inputs.get(name).filter(|_| inputs.is_secret(name)) else {
                continue;
            };
            if value.as_str() == Some(self.digest(input).as_str()) {
                *value = input.clone();
            }
        }
        outputs
    }

    /// Computes the hash of a full set of resolved inputs.
    #[must_use]
    pub fn hash_inputs(&self, inputs: &PropertySet) -> String {
        self.hash_recorded(&self.recordable(inputs))
    }

    /// Computes the hash of inputs already in recorded form.
    #[must_use]
    pub fn hash_recorded(&self, recorded: &PropertyMap) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in recorded {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            feed(&mut hasher, value);
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn feed(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
        Value::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                feed(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::Object(entries) => {
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(key.as_bytes());
                feed(hasher, &entries[key.as_str()]);
            }
            hasher.update(b"}");
        }
    }
}
