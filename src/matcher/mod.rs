//! Pluggable instance matching.
//!
//! A [`Matcher`] is a strategy that evaluates query instances against stored
//! instances. Matchers are registered with a [`MatcherRegistry`] in a fixed
//! order; routing picks the first matcher whose `handles_query` accepts the
//! query shape, so registration order is the tie-break when several qualify.
//! A matcher that cannot answer a shape declines it up front — there is no
//! silent partial matching.
//!
//! # Variants
//!
//! - [`structural::StructuralMatcher`]: direct recursive graph walk, no
//!   external backend, handles every query shape
//! - [`ontology::OntologyMatcher`]: compiles queries to SPARQL and delegates
//!   to the binding query engine; declines disjunctive shapes
//! - [`custom::CustomValueMatcher`]: bespoke per-value-type rules (e.g. a
//!   wildcard pattern language over free text)

pub mod custom;
pub mod ontology;
pub mod structural;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::MatchError;
use crate::identity::Identity;
use crate::instance::Instance;

/// Result type for matcher operations.
pub type MatchResult<T> = std::result::Result<T, MatchError>;

// ---------------------------------------------------------------------------
// Instance source
// ---------------------------------------------------------------------------

/// Read-only view of stored instances handed to matchers.
///
/// Matchers never mutate the store; this seam is all they see of it.
pub trait InstanceSource: Send + Sync {
    /// Resolve one instance by identity.
    fn instance(&self, identity: &Identity) -> Option<Arc<Instance>>;

    /// Identities of all stored instances (snapshot).
    fn identities(&self) -> Vec<Identity>;
}

/// Standalone in-memory source, for running matchers without a full store.
#[derive(Debug, Default)]
pub struct MemorySource {
    instances: DashMap<Identity, Arc<Instance>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instance: Instance) {
        self.instances
            .insert(instance.identity().clone(), Arc::new(instance));
    }
}

impl InstanceSource for MemorySource {
    fn instance(&self, identity: &Identity) -> Option<Arc<Instance>> {
        self.instances.get(identity).map(|e| Arc::clone(e.value()))
    }

    fn identities(&self) -> Vec<Identity> {
        self.instances.iter().map(|e| e.key().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked at backend round-trip boundaries.
///
/// Cloning shares the flag; the transport cancels it when a connection drops
/// and in-flight matching aborts at its next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Abort with [`MatchError::Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> MatchResult<()> {
        if self.is_cancelled() {
            Err(MatchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-call context handed to a matcher: the instance view plus the
/// cancellation flag of the surrounding request.
pub struct MatchContext<'a> {
    pub source: &'a dyn InstanceSource,
    pub cancel: CancelToken,
}

impl<'a> MatchContext<'a> {
    pub fn new(source: &'a dyn InstanceSource) -> Self {
        Self {
            source,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(source: &'a dyn InstanceSource, cancel: CancelToken) -> Self {
        Self { source, cancel }
    }
}

// ---------------------------------------------------------------------------
// Matcher trait
// ---------------------------------------------------------------------------

/// A matching strategy over query instances.
///
/// Implementations accept and return only [`Identity`] and [`Instance`]
/// values, never backend-specific types. A matcher must not fail for a
/// well-formed query it declared it handles; transient backend trouble
/// surfaces as an explicit error, never as a silently empty result.
pub trait Matcher: Send + Sync {
    /// Human-readable name for diagnostics and tracing.
    fn name(&self) -> &str;

    /// Whether this matcher can answer the given query shape at all.
    ///
    /// Callers must check this before delegating.
    fn handles_query(&self, query: &Instance) -> bool;

    /// Identities of all stored instances satisfying the query under this
    /// matcher's semantics. Order-independent, duplicate-free.
    fn find_matches(
        &self,
        query: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<BTreeSet<Identity>>;

    /// Pairwise test: does `candidate` satisfy `query` under this matcher's
    /// exact semantics? Used when the caller already holds a pre-filtered
    /// candidate.
    fn matches(
        &self,
        query: &Instance,
        candidate: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<bool>;

    /// Store notification: an instance was added or replaced. Matchers that
    /// mirror instances into a backend keep themselves current here.
    fn instance_added(&self, _instance: &Instance) -> MatchResult<()> {
        Ok(())
    }

    /// Store notification: an instance was removed.
    fn instance_removed(&self, _identity: &Identity) -> MatchResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({})", self.name())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered registry of matching strategies.
///
/// Built once at process start and injected where matching is needed; there
/// is no hidden global registry.
pub struct MatcherRegistry {
    matchers: Vec<Box<dyn Matcher>>,
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.matchers.iter().map(|m| m.name()).collect();
        f.debug_struct("MatcherRegistry")
            .field("matchers", &names)
            .finish()
    }
}

impl MatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Register a matcher. Registration order decides routing ties.
    pub fn register(&mut self, matcher: Box<dyn Matcher>) {
        self.matchers.push(matcher);
    }

    /// Number of registered matchers.
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// List registered matcher names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// First registered matcher that handles the query shape, if any.
    pub fn route(&self, query: &Instance) -> Option<&dyn Matcher> {
        self.matchers
            .iter()
            .map(|m| m.as_ref())
            .find(|m| m.handles_query(query))
    }

    /// Iterate matchers in registration order (for store notifications).
    pub fn iter(&self) -> impl Iterator<Item = &dyn Matcher> {
        self.matchers.iter().map(|m| m.as_ref())
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stub matcher with a fixed capability answer and a distinguishable result.
    struct Stub {
        name: &'static str,
        handles: bool,
        answer: &'static str,
    }

    impl Matcher for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn handles_query(&self, _query: &Instance) -> bool {
            self.handles
        }

        fn find_matches(
            &self,
            _query: &Instance,
            _ctx: &MatchContext<'_>,
        ) -> MatchResult<BTreeSet<Identity>> {
            Ok(BTreeSet::from([Identity::new(self.answer)]))
        }

        fn matches(
            &self,
            _query: &Instance,
            _candidate: &Instance,
            _ctx: &MatchContext<'_>,
        ) -> MatchResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn route_prefers_registration_order() {
        let mut reg = MatcherRegistry::new();
        reg.register(Box::new(Stub {
            name: "first",
            handles: true,
            answer: "from-first",
        }));
        reg.register(Box::new(Stub {
            name: "second",
            handles: true,
            answer: "from-second",
        }));

        let query = Instance::new("q");
        let chosen = reg.route(&query).unwrap();
        assert_eq!(chosen.name(), "first");

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let result = chosen.find_matches(&query, &ctx).unwrap();
        assert!(result.contains(&Identity::new("from-first")));
    }

    #[test]
    fn route_skips_declining_matchers() {
        let mut reg = MatcherRegistry::new();
        reg.register(Box::new(Stub {
            name: "declines",
            handles: false,
            answer: "unused",
        }));
        reg.register(Box::new(Stub {
            name: "accepts",
            handles: true,
            answer: "used",
        }));
        assert_eq!(reg.route(&Instance::new("q")).unwrap().name(), "accepts");
    }

    #[test]
    fn route_on_empty_registry_is_none() {
        let reg = MatcherRegistry::new();
        assert!(reg.route(&Instance::new("q")).is_none());
    }

    #[test]
    fn cancel_token_checkpoint() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(token.checkpoint(), Err(MatchError::Cancelled)));

        // Clones share the flag.
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn memory_source_snapshot() {
        let source = MemorySource::new();
        source.insert(Instance::new("a"));
        source.insert(Instance::new("b"));
        assert_eq!(source.identities().len(), 2);
        assert!(source.instance(&Identity::new("a")).is_some());
        assert!(source.instance(&Identity::new("c")).is_none());
    }
}
