//! Structural matcher: direct recursive walk of the instance graph.
//!
//! No external backend. Slot values are tested for compatibility literal by
//! literal; reference values match either by identity or by recursively
//! matching the referenced subgraphs, with a visited set guarding cycles.
//! Handles every query shape, so it is the natural last entry in a registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::identity::Identity;
use crate::instance::{Instance, Value};
use crate::schema::{SchemaModel, ValueType};

use super::custom::ValueRule;
use super::{MatchContext, MatchResult, Matcher};

/// Bound on reference-chain recursion, against pathological graphs the
/// visited set alone cannot cheaply bound.
const MAX_REFERENCE_DEPTH: usize = 64;

/// Matcher that walks the instance graph directly.
pub struct StructuralMatcher {
    schema: Arc<dyn SchemaModel>,
    rules: Vec<Arc<dyn ValueRule>>,
}

impl StructuralMatcher {
    pub fn new(schema: Arc<dyn SchemaModel>) -> Self {
        Self {
            schema,
            rules: Vec::new(),
        }
    }

    /// Install a per-value-type rule, consulted for text slots whose schema
    /// type is the rule's named type.
    pub fn with_rule(mut self, rule: Arc<dyn ValueRule>) -> Self {
        self.rules.push(rule);
        self
    }

    fn rule_for(&self, slot: &Identity) -> Option<&dyn ValueRule> {
        match self.schema.slot_value_type(slot)? {
            ValueType::Named(type_name) => self
                .rules
                .iter()
                .find(|r| r.type_name() == type_name)
                .map(|r| r.as_ref()),
            _ => None,
        }
    }

    fn instance_matches(
        &self,
        query: &Instance,
        candidate: &Instance,
        ctx: &MatchContext<'_>,
        depth: usize,
        visited: &mut BTreeSet<(Identity, Identity)>,
    ) -> MatchResult<bool> {
        if let Some(wanted) = query.concept() {
            match candidate.concept() {
                Some(actual) if self.schema.subsumes(wanted, actual) => {}
                _ => return Ok(false),
            }
        }

        for (slot, query_values) in query.slots() {
            let Some(candidate_values) = candidate.slot(slot) else {
                // Present slots must be satisfied; the candidate lacks this one.
                return Ok(false);
            };
            for query_value in query_values {
                let mut satisfied = false;
                for candidate_value in candidate_values {
                    if self.value_matches(slot, query_value, candidate_value, ctx, depth, visited)? {
                        satisfied = true;
                        break;
                    }
                }
                if !satisfied {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    fn value_matches(
        &self,
        slot: &Identity,
        query_value: &Value,
        candidate_value: &Value,
        ctx: &MatchContext<'_>,
        depth: usize,
        visited: &mut BTreeSet<(Identity, Identity)>,
    ) -> MatchResult<bool> {
        match (query_value, candidate_value) {
            (Value::AnyOf(alternatives), _) => {
                for alt in alternatives {
                    if self.value_matches(slot, alt, candidate_value, ctx, depth, visited)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Value::Number(q), Value::Number(c)) => Ok(q == c),
            (Value::Boolean(q), Value::Boolean(c)) => Ok(q == c),
            (Value::Text(pattern), Value::Text(actual)) => match self.rule_for(slot) {
                Some(rule) => Ok(rule.matches(pattern, actual)),
                None => Ok(pattern == actual),
            },
            (Value::Reference(wanted), Value::Reference(actual)) => {
                if wanted == actual {
                    return Ok(true);
                }
                self.reference_matches(wanted, actual, ctx, depth, visited)
            }
            _ => Ok(false),
        }
    }

    /// Reference-subgraph matching: treat the instance stored under the
    /// query-side identity as a sub-pattern for the candidate-side instance.
    fn reference_matches(
        &self,
        wanted: &Identity,
        actual: &Identity,
        ctx: &MatchContext<'_>,
        depth: usize,
        visited: &mut BTreeSet<(Identity, Identity)>,
    ) -> MatchResult<bool> {
        if depth >= MAX_REFERENCE_DEPTH {
            return Ok(false);
        }
        // Already-in-progress pairs are assumed compatible; this breaks
        // reference cycles without rejecting them.
        if !visited.insert((wanted.clone(), actual.clone())) {
            return Ok(true);
        }

        let (Some(sub_pattern), Some(sub_candidate)) =
            (ctx.source.instance(wanted), ctx.source.instance(actual))
        else {
            return Ok(false);
        };

        self.instance_matches(&sub_pattern, &sub_candidate, ctx, depth + 1, visited)
    }
}

impl Matcher for StructuralMatcher {
    fn name(&self) -> &str {
        "structural"
    }

    fn handles_query(&self, _query: &Instance) -> bool {
        true
    }

    fn find_matches(
        &self,
        query: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<BTreeSet<Identity>> {
        let mut hits = BTreeSet::new();
        for identity in ctx.source.identities() {
            ctx.cancel.checkpoint()?;
            let Some(candidate) = ctx.source.instance(&identity) else {
                continue; // removed between snapshot and resolve
            };
            let mut visited = BTreeSet::new();
            if self.instance_matches(query, &candidate, ctx, 0, &mut visited)? {
                hits.insert(identity);
            }
        }
        Ok(hits)
    }

    fn matches(
        &self,
        query: &Instance,
        candidate: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<bool> {
        ctx.cancel.checkpoint()?;
        let mut visited = BTreeSet::new();
        self.instance_matches(query, candidate, ctx, 0, &mut visited)
    }
}
