//! Deterministic backend names for Subscriptions.

use std::fmt::Debug;

use sha2::{Digest, Sha256};

/// Maps a Subscription identity to the name used on a backend.
pub trait NameMapper: Send + Sync + Debug {
    fn map_subscription_name(&self, name: &str, namespace: &str) -> String;
}

/// Name built from a readable prefix of the Subscription name followed by a
/// hash of its full identity. Stable across restarts and replicas, unique
/// per (domain, namespace, name).
#[derive(Debug, Clone)]
pub struct HashedNameMapper {
    domain: String,
    max_len: usize,
    hash_len: usize,
}

impl HashedNameMapper {
    /// `hash_len` is clamped to the SHA-256 hex length and to `max_len`.
    pub fn new(domain: impl Into<String>, max_len: usize, hash_len: usize) -> Self {
        let hash_len = hash_len.min(64).min(max_len);
        Self {
            domain: domain.into(),
            max_len,
            hash_len,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

impl NameMapper for HashedNameMapper {
    fn map_subscription_name(&self, name: &str, namespace: &str) -> String {
        let hash = hash_full_name(&self.domain, namespace, name);
        let readable: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let keep = readable.len().min(self.max_len - self.hash_len);
        format!("{}{}", &readable[..keep], &hash[..self.hash_len])
    }
}

/// Hex SHA-256 of the full Subscription identity.
pub fn hash_full_name(domain: &str, namespace: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(b"/");
    hasher.update(namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_bounded_and_stable() {
        let mapper = HashedNameMapper::new("example.com", 50, 40);
        let name = mapper.map_subscription_name("a-very-long-subscription-name-indeed", "default");
        assert_eq!(name.len(), 50);
        assert!(name.starts_with("a-very-lon"));
        assert_eq!(
            name,
            mapper.map_subscription_name("a-very-long-subscription-name-indeed", "default")
        );
    }

    #[test]
    fn test_name_is_unique_per_namespace_and_domain() {
        let a = HashedNameMapper::new("one", 48, 24);
        let b = HashedNameMapper::new("two", 48, 24);
        let ns1 = a.map_subscription_name("orders", "shop");
        let ns2 = a.map_subscription_name("orders", "billing");
        let other_domain = b.map_subscription_name("orders", "shop");
        assert_ne!(ns1, ns2);
        assert_ne!(ns1, other_domain);

        // separator keeps "ab"/"c" apart from "a"/"bc"
        assert_ne!(
            a.map_subscription_name("c", "ab"),
            a.map_subscription_name("bc", "a")
        );
    }

    #[test]
    fn test_name_drops_illegal_characters() {
        let mapper = HashedNameMapper::new("", 48, 24);
        let name = mapper.map_subscription_name("orders.v1", "shop");
        assert!(name.starts_with("ordersv1"));
        assert!(!name.contains('.'));
    }
}
