//! Commitment hashing for the commit-reveal scheme.
//!
//! A commitment is the hex SHA-256 of the canonical JSON encoding of the
//! outcome map followed by the salt bytes. BTreeMap ordering makes the JSON
//! canonical, so the same submission always hashes the same.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

pub fn commitment_hash(value: &BTreeMap<String, f64>, salt: &str) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a reveal against its stored commitment.
pub fn verify_reveal(value: &BTreeMap<String, f64>, salt: &str, commit_hash: &str) -> bool {
    commitment_hash(value, salt).eq_ignore_ascii_case(commit_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn round_trip_verifies() {
        let v = value(&[("yes", 0.7), ("no", 0.3)]);
        let hash = commitment_hash(&v, "salt-1");
        assert!(verify_reveal(&v, "salt-1", &hash));
    }

    #[test]
    fn tampered_value_is_rejected() {
        let v = value(&[("yes", 0.7)]);
        let hash = commitment_hash(&v, "salt-1");

        let tampered = value(&[("yes", 0.71)]);
        assert!(!verify_reveal(&tampered, "salt-1", &hash));
    }

    #[test]
    fn tampered_salt_is_rejected() {
        let v = value(&[("yes", 0.7)]);
        let hash = commitment_hash(&v, "salt-1");
        assert!(!verify_reveal(&v, "salt-2", &hash));
    }

    #[test]
    fn insertion_order_does_not_change_the_hash() {
        let mut a = BTreeMap::new();
        a.insert("yes".to_string(), 0.7);
        a.insert("no".to_string(), 0.3);

        let mut b = BTreeMap::new();
        b.insert("no".to_string(), 0.3);
        b.insert("yes".to_string(), 0.7);

        assert_eq!(commitment_hash(&a, "s"), commitment_hash(&b, "s"));
    }

    #[test]
    fn hash_is_case_insensitive_on_compare() {
        let v = value(&[("yes", 0.5)]);
        let hash = commitment_hash(&v, "s").to_uppercase();
        assert!(verify_reveal(&v, "s", &hash));
    }
}
