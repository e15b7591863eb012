//! Concept schema collaborator seam.
//!
//! The concept/schema model is owned externally; semblance holds concept
//! references by identity only and asks the model about subsumption and slot
//! typing through [`SchemaModel`]. [`MemorySchema`] is the in-process
//! implementation used by the CLI, the server, and tests.

use std::collections::BTreeMap;

use crate::identity::Identity;

/// Declared value type of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Number,
    Text,
    Boolean,
    /// Reference slot constrained to instances of a concept.
    InstanceOf(Identity),
    /// A named literal type with bespoke matching semantics
    /// (see `matcher::custom`).
    Named(String),
}

/// Read-only view of an externally-owned concept hierarchy.
///
/// Implementations must be consistent within one store: the same concept
/// identities, the same ancestor chains, for the store's whole lifetime.
pub trait SchemaModel: Send + Sync {
    /// Whether `concept` is `ancestor` or a (transitive) descendant of it.
    fn subsumes(&self, ancestor: &Identity, concept: &Identity) -> bool;

    /// All transitive ancestors of a concept, nearest first.
    fn ancestors(&self, concept: &Identity) -> Vec<Identity>;

    /// Declared value type of a slot, if the schema knows it.
    fn slot_value_type(&self, slot: &Identity) -> Option<ValueType>;

    /// Direct `(child, parent)` concept pairs, for mirroring the hierarchy
    /// into a triple-store backend. Models that cannot enumerate their
    /// hierarchy return nothing.
    fn parent_links(&self) -> Vec<(Identity, Identity)> {
        Vec::new()
    }
}

/// In-memory schema: parent links plus slot typings.
#[derive(Debug, Default)]
pub struct MemorySchema {
    parents: BTreeMap<Identity, Identity>,
    slot_types: BTreeMap<Identity, ValueType>,
}

impl MemorySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `child` as a direct subconcept of `parent`.
    pub fn add_concept(mut self, child: impl Into<Identity>, parent: impl Into<Identity>) -> Self {
        self.parents.insert(child.into(), parent.into());
        self
    }

    /// Declare a slot's value type.
    pub fn add_slot(mut self, slot: impl Into<Identity>, value_type: ValueType) -> Self {
        self.slot_types.insert(slot.into(), value_type);
        self
    }
}

impl SchemaModel for MemorySchema {
    fn subsumes(&self, ancestor: &Identity, concept: &Identity) -> bool {
        if ancestor == concept {
            return true;
        }
        let mut current = concept;
        // Parent chains are trees here; depth-bound guards against
        // accidentally cyclic declarations.
        for _ in 0..self.parents.len() {
            match self.parents.get(current) {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    fn ancestors(&self, concept: &Identity) -> Vec<Identity> {
        let mut out = Vec::new();
        let mut current = concept;
        for _ in 0..self.parents.len() {
            match self.parents.get(current) {
                Some(parent) => {
                    out.push(parent.clone());
                    current = parent;
                }
                None => break,
            }
        }
        out
    }

    fn slot_value_type(&self, slot: &Identity) -> Option<ValueType> {
        self.slot_types.get(slot).cloned()
    }

    fn parent_links(&self) -> Vec<(Identity, Identity)> {
        self.parents
            .iter()
            .map(|(child, parent)| (child.clone(), parent.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> MemorySchema {
        MemorySchema::new()
            .add_concept("Dog", "Mammal")
            .add_concept("Mammal", "Animal")
            .add_concept("Plant", "Organism")
            .add_slot("age", ValueType::Number)
            .add_slot("bio", ValueType::Named("free-text".into()))
    }

    #[test]
    fn subsumes_is_reflexive_and_transitive() {
        let s = taxonomy();
        let dog = Identity::new("Dog");
        let animal = Identity::new("Animal");
        assert!(s.subsumes(&dog, &dog));
        assert!(s.subsumes(&animal, &dog));
        assert!(!s.subsumes(&dog, &animal));
        assert!(!s.subsumes(&Identity::new("Plant"), &dog));
    }

    #[test]
    fn ancestors_nearest_first() {
        let s = taxonomy();
        let chain = s.ancestors(&Identity::new("Dog"));
        let tokens: Vec<&str> = chain.iter().map(|i| i.as_str()).collect();
        assert_eq!(tokens, vec!["Mammal", "Animal"]);
    }

    #[test]
    fn slot_types_resolve() {
        let s = taxonomy();
        assert_eq!(
            s.slot_value_type(&Identity::new("age")),
            Some(ValueType::Number)
        );
        assert_eq!(
            s.slot_value_type(&Identity::new("bio")),
            Some(ValueType::Named("free-text".into()))
        );
        assert_eq!(s.slot_value_type(&Identity::new("unknown")), None);
    }
}
