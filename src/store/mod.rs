//! Instance store: identity → instance persistence plus matcher coordination.
//!
//! The store owns the only truly shared mutable state in the system, a
//! concurrent identity → snapshot map (hot, DashMap) optionally backed by a
//! durable document tier (redb, one document per identity). Writes to the
//! same identity are serialized by the map's per-entry locking; queries run
//! against snapshots and never see a half-applied write. Registered matchers
//! are notified of every mutation so backend-mirroring strategies stay
//! current, and queries route to the first registered matcher that handles
//! the query shape.

pub mod durable;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::StoreError;
use crate::identity::Identity;
use crate::instance::Instance;
use crate::matcher::{CancelToken, InstanceSource, MatchContext, MatcherRegistry};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Write discipline for [`InstanceStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Insert or replace.
    #[default]
    Upsert,
    /// Strict insert: fail with `IdentityConflict` if the identity is taken.
    Insert,
}

/// Identity → instance store with pluggable matching.
pub struct InstanceStore {
    live: DashMap<Identity, Arc<Instance>>,
    durable: Option<durable::DurableStore>,
    matchers: MatcherRegistry,
}

impl InstanceStore {
    /// Create a memory-only store (no persistence).
    pub fn in_memory(matchers: MatcherRegistry) -> Self {
        Self {
            live: DashMap::new(),
            durable: None,
            matchers,
        }
    }

    /// Open a persistent store, replaying persisted documents into the live
    /// map and into the matcher backends.
    pub fn open(data_dir: &Path, matchers: MatcherRegistry) -> StoreResult<Self> {
        let durable = durable::DurableStore::open(data_dir)?;
        let persisted = durable.all()?;
        let store = Self {
            live: DashMap::new(),
            durable: Some(durable),
            matchers,
        };
        let replayed = persisted.len();
        for instance in persisted {
            for matcher in store.matchers.iter() {
                matcher.instance_added(&instance)?;
            }
            store
                .live
                .insert(instance.identity().clone(), Arc::new(instance));
        }
        tracing::info!(
            target: "semblance::store",
            replayed,
            matchers = ?store.matchers.names(),
            "opened instance store"
        );
        Ok(store)
    }

    /// Insert or replace an instance atomically.
    ///
    /// With [`WriteMode::Insert`] an occupied identity fails with
    /// [`StoreError::IdentityConflict`]. The per-identity entry lock is held
    /// for the whole mutation, so no two writers race on one identity.
    pub fn add(&self, instance: Instance, mode: WriteMode) -> StoreResult<()> {
        let identity = instance.identity().clone();
        let entry = self.live.entry(identity.clone());
        if mode == WriteMode::Insert
            && matches!(&entry, dashmap::mapref::entry::Entry::Occupied(_))
        {
            return Err(StoreError::IdentityConflict {
                identity: identity.to_string(),
            });
        }

        if let Some(durable) = &self.durable {
            durable.put(&instance)?;
        }
        let snapshot = Arc::new(instance);
        entry.insert(Arc::clone(&snapshot));

        // Mirroring matchers are updated after the snapshot is visible; a
        // failing backend surfaces here instead of being swallowed.
        for matcher in self.matchers.iter() {
            matcher.instance_added(&snapshot)?;
        }
        tracing::debug!(target: "semblance::store", identity = %identity, "instance added");
        Ok(())
    }

    /// Remove an identity. Idempotent: removing an absent identity returns
    /// `false`, never an error.
    pub fn remove(&self, identity: &Identity) -> StoreResult<bool> {
        let found_live = self.live.remove(identity).is_some();
        let found_durable = match &self.durable {
            Some(durable) => durable.remove(identity)?,
            None => false,
        };
        let found = found_live || found_durable;
        if found {
            for matcher in self.matchers.iter() {
                matcher.instance_removed(identity)?;
            }
            tracing::debug!(target: "semblance::store", identity = %identity, "instance removed");
        }
        Ok(found)
    }

    /// Resolve a stored instance snapshot.
    pub fn get(&self, identity: &Identity) -> StoreResult<Arc<Instance>> {
        self.live
            .get(identity)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::NotFound {
                identity: identity.to_string(),
            })
    }

    /// Match a query instance against the store.
    ///
    /// Routes to the first registered matcher whose `handles_query` accepts
    /// the shape; fails with [`StoreError::NoCapableMatcher`] if none does.
    /// The query instance is never persisted as a side effect.
    pub fn query(&self, query: &Instance) -> StoreResult<BTreeSet<Identity>> {
        self.query_cancellable(query, CancelToken::new())
    }

    /// [`InstanceStore::query`] with a caller-owned cancellation flag.
    pub fn query_cancellable(
        &self,
        query: &Instance,
        cancel: CancelToken,
    ) -> StoreResult<BTreeSet<Identity>> {
        let matcher = self
            .matchers
            .route(query)
            .ok_or(StoreError::NoCapableMatcher)?;
        tracing::debug!(
            target: "semblance::store",
            matcher = matcher.name(),
            slots = query.slot_count(),
            "routing query"
        );
        let ctx = MatchContext::with_cancel(self, cancel);
        Ok(matcher.find_matches(query, &ctx)?)
    }

    /// Pairwise test: does the stored instance satisfy the query under the
    /// same matcher `query` would route to?
    pub fn matches(&self, identity: &Identity, query: &Instance) -> StoreResult<bool> {
        let candidate = self.get(identity)?;
        let matcher = self
            .matchers
            .route(query)
            .ok_or(StoreError::NoCapableMatcher)?;
        let ctx = MatchContext::new(self);
        Ok(matcher.matches(query, &candidate, &ctx)?)
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Names of registered matchers in routing order.
    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.names()
    }
}

impl InstanceSource for InstanceStore {
    fn instance(&self, identity: &Identity) -> Option<Arc<Instance>> {
        self.live.get(identity).map(|e| Arc::clone(e.value()))
    }

    fn identities(&self) -> Vec<Identity> {
        self.live.iter().map(|e| e.key().clone()).collect()
    }
}

impl std::fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStore")
            .field("instances", &self.live.len())
            .field("matchers", &self.matchers.names())
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Value;
    use crate::matcher::structural::StructuralMatcher;
    use crate::schema::MemorySchema;

    fn store() -> InstanceStore {
        let schema = Arc::new(MemorySchema::new());
        let mut matchers = MatcherRegistry::new();
        matchers.register(Box::new(StructuralMatcher::new(schema)));
        InstanceStore::in_memory(matchers)
    }

    #[test]
    fn add_then_get_roundtrips() {
        let s = store();
        let instance = Instance::new("p1").with_slot("age", Value::Number(42.0));
        s.add(instance.clone(), WriteMode::Upsert).unwrap();
        let got = s.get(&Identity::new("p1")).unwrap();
        assert_eq!(*got, instance);
    }

    #[test]
    fn strict_insert_conflicts_on_occupied_identity() {
        let s = store();
        s.add(Instance::new("p1"), WriteMode::Insert).unwrap();
        let err = s.add(Instance::new("p1"), WriteMode::Insert).unwrap_err();
        assert!(matches!(err, StoreError::IdentityConflict { .. }));
        // Upsert replaces fine.
        s.add(
            Instance::new("p1").with_slot("age", Value::Number(1.0)),
            WriteMode::Upsert,
        )
        .unwrap();
    }

    #[test]
    fn remove_is_idempotent() {
        let s = store();
        s.add(Instance::new("p1"), WriteMode::Upsert).unwrap();
        assert!(s.remove(&Identity::new("p1")).unwrap());
        assert!(!s.remove(&Identity::new("p1")).unwrap());
        assert!(matches!(
            s.get(&Identity::new("p1")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn query_routes_to_structural_matcher() {
        let s = store();
        s.add(
            Instance::new("p1").with_slot("age", Value::Number(42.0)),
            WriteMode::Upsert,
        )
        .unwrap();
        let hits = s
            .query(&Instance::new("q").with_slot("age", Value::Number(42.0)))
            .unwrap();
        assert_eq!(hits, BTreeSet::from([Identity::new("p1")]));

        let misses = s
            .query(&Instance::new("q").with_slot("age", Value::Number(43.0)))
            .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn query_without_matchers_is_an_explicit_error() {
        let s = InstanceStore::in_memory(MatcherRegistry::new());
        let err = s.query(&Instance::new("q")).unwrap_err();
        assert!(matches!(err, StoreError::NoCapableMatcher));
    }

    #[test]
    fn matches_resolves_then_tests() {
        let s = store();
        s.add(
            Instance::new("p1").with_slot("age", Value::Number(42.0)),
            WriteMode::Upsert,
        )
        .unwrap();
        let q = Instance::new("q").with_slot("age", Value::Number(42.0));
        assert!(s.matches(&Identity::new("p1"), &q).unwrap());
        assert!(matches!(
            s.matches(&Identity::new("ghost"), &q),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn read_your_writes_within_one_store() {
        let s = store();
        s.add(
            Instance::new("p1").with_slot("age", Value::Number(1.0)),
            WriteMode::Upsert,
        )
        .unwrap();
        s.add(
            Instance::new("p1").with_slot("age", Value::Number(2.0)),
            WriteMode::Upsert,
        )
        .unwrap();
        let hits = s
            .query(&Instance::new("q").with_slot("age", Value::Number(2.0)))
            .unwrap();
        assert_eq!(hits.len(), 1);
        let stale = s
            .query(&Instance::new("q").with_slot("age", Value::Number(1.0)))
            .unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn concurrent_writers_on_distinct_identities() {
        let s = Arc::new(store());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    s.add(
                        Instance::new(format!("p{i}")).with_slot("n", Value::Number(i as f64)),
                        WriteMode::Insert,
                    )
                    .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.len(), 32);
    }
}
