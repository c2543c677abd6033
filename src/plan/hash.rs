//! Plan fingerprinting.
//!
//! Task runs record which plan they were applied against. The fingerprint
//! is a SHA-256 over the raw plan document, so reformatting the file also
//! changes it.

use sha2::{Digest, Sha256};

/// Hasher for plan documents.
#[derive(Debug, Default)]
pub struct PlanHasher;

impl PlanHasher {
    /// Creates a new plan hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hex fingerprint of a plan document.
    #[must_use]
    pub fn fingerprint(&self, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short fingerprint (first 8 characters) for display purposes.
    #[must_use]
    pub fn short(fingerprint: &str) -> String {
        fingerprint.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let hasher = PlanHasher::new();
        assert_eq!(hasher.fingerprint("a: 1"), hasher.fingerprint("a: 1"));
        assert_ne!(hasher.fingerprint("a: 1"), hasher.fingerprint("a: 2"));
        assert_eq!(hasher.fingerprint("").len(), 64);
    }

    #[test]
    fn test_short() {
        assert_eq!(PlanHasher::short("abcdef1234567890"), "abcdef12");
    }
}
