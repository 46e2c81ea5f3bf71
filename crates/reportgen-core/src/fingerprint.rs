//! Task dedupe keys

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Dedupe key over source content, template version and provider class
///
/// Two non-terminal tasks never share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the three components into a lowercase hex key.
    ///
    /// Components are NUL-separated so `("ab", "c")` and `("a", "bc")` differ.
    pub fn compute(content: &[u8], template_version: &str, provider_class: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hasher.update([0u8]);
        hasher.update(template_version.as_bytes());
        hasher.update([0u8]);
        hasher.update(provider_class.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
