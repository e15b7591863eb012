//! Instance snapshots: slot/value graphs rooted at one identity.
//!
//! An [`Instance`] is an immutable value snapshot of a directed attribute
//! graph: a root [`Identity`], an optional concept reference, and a set of
//! (slot, value) pairs where a value is a literal or a reference to another
//! instance's identity. Updates create a new snapshot, never mutate in place,
//! which keeps concurrent matching safe.
//!
//! A *query instance* is an ordinary `Instance` used as a match pattern:
//! slots present constrain matching, slots absent are unconstrained. The
//! [`Value::AnyOf`] variant expresses per-slot disjunction and is only
//! meaningful in query patterns.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// A slot value: a literal or a reference to another instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Numeric literal.
    Number(f64),
    /// Free-text literal.
    Text(String),
    /// Boolean literal.
    Boolean(bool),
    /// Reference to another instance by identity.
    Reference(Identity),
    /// Disjunction of alternatives; a candidate value must satisfy at least
    /// one. Query-pattern only.
    AnyOf(Vec<Value>),
}

impl Value {
    /// Convenience constructor for text values.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Convenience constructor for references.
    pub fn reference(id: impl Into<Identity>) -> Self {
        Value::Reference(id.into())
    }

    /// Whether this value (or any nested alternative) is a disjunction.
    pub fn is_disjunctive(&self) -> bool {
        matches!(self, Value::AnyOf(_))
    }
}

/// Immutable snapshot of a slot/value graph rooted at one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    identity: Identity,
    // No skip_serializing_if here: bincode is positional and cannot cope
    // with absent fields.
    #[serde(default)]
    concept: Option<Identity>,
    #[serde(default)]
    slots: BTreeMap<Identity, Vec<Value>>,
}

impl Instance {
    /// Create an empty instance rooted at the given identity.
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self {
            identity: identity.into(),
            concept: None,
            slots: BTreeMap::new(),
        }
    }

    /// Constrain this instance to a concept (used for subsumption matching).
    pub fn with_concept(mut self, concept: impl Into<Identity>) -> Self {
        self.concept = Some(concept.into());
        self
    }

    /// Append a value to a slot. Slots hold multiple values; appending the
    /// same slot twice accumulates.
    pub fn with_slot(mut self, slot: impl Into<Identity>, value: Value) -> Self {
        self.slots.entry(slot.into()).or_default().push(value);
        self
    }

    /// The root identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The concept reference, if constrained.
    pub fn concept(&self) -> Option<&Identity> {
        self.concept.as_ref()
    }

    /// All (slot, values) pairs in slot order.
    pub fn slots(&self) -> impl Iterator<Item = (&Identity, &[Value])> {
        self.slots.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Values of one slot, if present.
    pub fn slot(&self, slot: &Identity) -> Option<&[Value]> {
        self.slots.get(slot).map(|v| v.as_slice())
    }

    /// Number of constrained slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// A query instance with no concept and no slots constrains nothing:
    /// every stored instance matches it.
    pub fn is_vacuous(&self) -> bool {
        self.concept.is_none() && self.slots.is_empty()
    }

    /// Whether any slot value uses [`Value::AnyOf`] disjunction.
    pub fn has_disjunction(&self) -> bool {
        self.slots
            .values()
            .flatten()
            .any(|v| v.is_disjunctive())
    }

    /// Identities of all instances referenced from slot values, including
    /// alternatives inside disjunctions.
    pub fn referenced_identities(&self) -> BTreeSet<Identity> {
        fn collect(value: &Value, out: &mut BTreeSet<Identity>) {
            match value {
                Value::Reference(id) => {
                    out.insert(id.clone());
                }
                Value::AnyOf(alts) => {
                    for alt in alts {
                        collect(alt, out);
                    }
                }
                _ => {}
            }
        }

        let mut out = BTreeSet::new();
        for values in self.slots.values() {
            for value in values {
                collect(value, &mut out);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Instance {
        Instance::new("p1")
            .with_concept("Person")
            .with_slot("age", Value::Number(42.0))
            .with_slot("name", Value::text("Ada"))
            .with_slot("employer", Value::reference("org1"))
    }

    #[test]
    fn builder_accumulates_slot_values() {
        let i = Instance::new("p1")
            .with_slot("alias", Value::text("Ada"))
            .with_slot("alias", Value::text("Countess"));
        assert_eq!(i.slot(&Identity::new("alias")).unwrap().len(), 2);
    }

    #[test]
    fn vacuous_means_no_concept_and_no_slots() {
        assert!(Instance::new("q").is_vacuous());
        assert!(!Instance::new("q").with_concept("Person").is_vacuous());
        assert!(!person().is_vacuous());
    }

    #[test]
    fn disjunction_is_detected() {
        let q = Instance::new("q").with_slot(
            "age",
            Value::AnyOf(vec![Value::Number(41.0), Value::Number(42.0)]),
        );
        assert!(q.has_disjunction());
        assert!(!person().has_disjunction());
    }

    #[test]
    fn referenced_identities_includes_disjunction_alternatives() {
        let q = Instance::new("q")
            .with_slot("employer", Value::reference("org1"))
            .with_slot(
                "friend",
                Value::AnyOf(vec![Value::reference("p2"), Value::reference("p3")]),
            );
        let refs = q.referenced_identities();
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&Identity::new("org1")));
        assert!(refs.contains(&Identity::new("p3")));
    }

    #[test]
    fn wire_roundtrip_preserves_structure() {
        let i = person();
        let json = serde_json::to_string(&i).unwrap();
        let back: Instance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, i);
    }

    #[test]
    fn wire_format_shape() {
        let i = Instance::new("p1").with_slot("age", Value::Number(42.0));
        let doc = serde_json::to_value(&i).unwrap();
        assert_eq!(doc["identity"], "p1");
        assert_eq!(doc["slots"]["age"][0]["number"], 42.0);
    }

    #[test]
    fn persisted_roundtrip_via_bincode() {
        let i = person();
        let bytes = bincode::serialize(&i).unwrap();
        let back: Instance = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, i);
    }
}
