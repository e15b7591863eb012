//! Identity tokens for concepts and instances.
//!
//! An [`Identity`] is an opaque, globally unique, human-readable token naming
//! a concept, a slot, or an instance. Identities are compared by exact value
//! and are immutable once assigned.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque unique name for a concept, slot, or instance.
///
/// Backed by `Arc<str>` so instances and query patterns can share identity
/// tokens without copying. Comparison is exact and case-sensitive; one store
/// must use a single consistent casing discipline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<str>);

impl Identity {
    /// Create an identity from any string-like value.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// The underlying token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Identity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_by_exact_value() {
        assert_eq!(Identity::new("p1"), Identity::new("p1"));
        assert_ne!(Identity::new("p1"), Identity::new("P1"));
    }

    #[test]
    fn clone_shares_the_token() {
        let a = Identity::new("person-42");
        let b = a.clone();
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut ids = vec![Identity::new("c"), Identity::new("a"), Identity::new("b")];
        ids.sort();
        let tokens: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }

    #[test]
    fn serde_roundtrip_is_a_bare_string() {
        let id = Identity::new("p1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"p1\"");
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_is_the_raw_token() {
        assert_eq!(Identity::new("p1").to_string(), "p1");
    }
}
