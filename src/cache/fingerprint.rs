//! Content-addressed request fingerprints.

use crate::routing::Tier;
use serde::{Deserialize, Serialize};

/// Bumped whenever normalization or field layout changes.
const FINGERPRINT_VERSION: &str = "tierflow-v1";

/// Deterministic hash identifying a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash normalized system instructions, user content and the tier/model pair.
    pub fn compute(system_prompt: &str, user_content: &str, tier: Tier, model: &str) -> Self {
        let system = normalize(system_prompt);
        let user = normalize(user_content);
        Self(hash_fields(&[
            FINGERPRINT_VERSION,
            tier.as_str(),
            model.trim(),
            &system,
            &user,
        ]))
    }

    /// Wrap a previously computed hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize text so formatting noise does not defeat the cache.
///
/// Line endings become `\n`, trailing whitespace on each line is dropped and
/// the whole text is trimmed. Interior spacing is kept.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Length-prefixed so field boundaries cannot be forged by content.
fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in fields {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
