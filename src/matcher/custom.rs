//! Custom per-value-type matching rules.
//!
//! A [`ValueRule`] carries bespoke equality-or-pattern semantics for one
//! named literal type from the schema (e.g. a `free-text` slot matched with
//! a mini wildcard language instead of plain equality). Rules plug into the
//! structural walk, and [`CustomValueMatcher`] exposes a rule as a standalone
//! registry entry that only bids on queries where a slot of its type is
//! present.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;

use crate::identity::Identity;
use crate::instance::Instance;
use crate::schema::{SchemaModel, ValueType};

use super::structural::StructuralMatcher;
use super::{MatchContext, MatchResult, Matcher};

/// Bespoke matching semantics for one named literal value type.
pub trait ValueRule: Send + Sync {
    /// The schema value-type name this rule handles (see [`ValueType::Named`]).
    fn type_name(&self) -> &str;

    /// Does `actual` satisfy `pattern` under this rule?
    fn matches(&self, pattern: &str, actual: &str) -> bool;
}

/// Wildcard pattern rule over free text: `*` matches any run, `?` matches
/// one character, everything else is literal. Case-insensitive.
pub struct WildcardRule {
    type_name: String,
    compiled: DashMap<String, Regex>,
}

impl WildcardRule {
    /// Rule for the conventional `free-text` value type.
    pub fn new() -> Self {
        Self::for_type("free-text")
    }

    /// Rule for an arbitrarily named text value type.
    pub fn for_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            compiled: DashMap::new(),
        }
    }

    fn compile(pattern: &str) -> Option<Regex> {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push_str("(?is)^");
        for ch in pattern.chars() {
            match ch {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');
        Regex::new(&source).ok()
    }
}

impl Default for WildcardRule {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueRule for WildcardRule {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn matches(&self, pattern: &str, actual: &str) -> bool {
        if let Some(re) = self.compiled.get(pattern) {
            return re.is_match(actual);
        }
        match Self::compile(pattern) {
            Some(re) => {
                let hit = re.is_match(actual);
                self.compiled.insert(pattern.to_string(), re);
                hit
            }
            // An uncompilable pattern falls back to plain equality.
            None => pattern == actual,
        }
    }
}

/// Standalone matcher wrapping one value rule.
///
/// Consulted only when the query constrains at least one slot whose
/// schema-declared value type is the rule's named type; all other query
/// shapes are declined so routing falls through to the general matchers.
pub struct CustomValueMatcher {
    name: String,
    rule_type: String,
    schema: Arc<dyn SchemaModel>,
    inner: StructuralMatcher,
}

impl CustomValueMatcher {
    pub fn new(schema: Arc<dyn SchemaModel>, rule: Arc<dyn ValueRule>) -> Self {
        let rule_type = rule.type_name().to_string();
        let inner = StructuralMatcher::new(Arc::clone(&schema)).with_rule(rule);
        Self {
            name: format!("custom:{rule_type}"),
            rule_type,
            schema,
            inner,
        }
    }

    fn query_uses_rule_type(&self, query: &Instance) -> bool {
        query.slots().any(|(slot, _)| {
            matches!(
                self.schema.slot_value_type(slot),
                Some(ValueType::Named(ref t)) if *t == self.rule_type
            )
        })
    }
}

impl Matcher for CustomValueMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles_query(&self, query: &Instance) -> bool {
        self.query_uses_rule_type(query)
    }

    fn find_matches(
        &self,
        query: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<BTreeSet<Identity>> {
        self.inner.find_matches(query, ctx)
    }

    fn matches(
        &self,
        query: &Instance,
        candidate: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<bool> {
        self.inner.matches(query, candidate, ctx)
    }
}
