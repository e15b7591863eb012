//! Binding query engine: ask/select queries over a backend knowledge base.
//!
//! The engine abstracts a backend's query capability behind [`QueryEngine`]:
//! boolean `ask` queries, tabular `select` queries returning typed
//! [`Binding`]s, and a table of backend-specific named constants callers may
//! interpolate into otherwise backend-agnostic query text.
//!
//! The engine is read-only against the backend and holds no mutable state
//! beyond its handle to the bound knowledge base.

pub mod sparql;

use std::collections::BTreeMap;

use crate::error::QueryError;
use crate::identity::Identity;

/// Result type for query engine operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// One typed value inside a binding row.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A named node resolved back to an identity token where possible.
    Named(Identity),
    /// Text literal.
    Text(String),
    /// Numeric literal.
    Number(f64),
    /// Boolean literal.
    Boolean(bool),
}

/// One row of a select-query result: per query variable, in declaration
/// order, the bound term (or `None` where the backend left it unbound).
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    values: Vec<(String, Option<Term>)>,
}

impl Binding {
    pub fn new(values: Vec<(String, Option<Term>)>) -> Self {
        Self { values }
    }

    /// The bound term for a variable, if any.
    pub fn get(&self, variable: &str) -> Option<&Term> {
        self.values
            .iter()
            .find(|(var, _)| var == variable)
            .and_then(|(_, term)| term.as_ref())
    }

    /// All (variable, term) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Term>)> {
        self.values
            .iter()
            .map(|(var, term)| (var.as_str(), term.as_ref()))
    }

    /// Number of query variables (bound or not).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ask/select queries over a bound knowledge base.
///
/// `select` results are fully materialized, finite, and restartable; row
/// order is backend-determined unless the query itself sorts. Both operations
/// fail with [`QueryError::Language`] for unparseable query text and
/// [`QueryError::BackendUnavailable`] when the knowledge base cannot be
/// reached; long-running evaluations are cut off with [`QueryError::Timeout`].
pub trait QueryEngine: Send + Sync {
    /// Evaluate a boolean-valued query.
    fn ask(&self, query: &str) -> QueryResult<bool>;

    /// Evaluate a tabular query into a materialized binding set.
    fn select(&self, query: &str) -> QueryResult<Vec<Binding>>;

    /// Backend-specific named constants (well-known vocabulary terms) for
    /// interpolation into query text.
    fn constants(&self) -> &BTreeMap<String, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_lookup_by_variable() {
        let b = Binding::new(vec![
            ("x".into(), Some(Term::Named(Identity::new("p1")))),
            ("age".into(), Some(Term::Number(42.0))),
            ("gap".into(), None),
        ]);
        assert_eq!(b.len(), 3);
        assert_eq!(b.get("age"), Some(&Term::Number(42.0)));
        assert_eq!(b.get("gap"), None);
        assert_eq!(b.get("missing"), None);
    }

    #[test]
    fn binding_preserves_declaration_order() {
        let b = Binding::new(vec![
            ("b".into(), Some(Term::Boolean(true))),
            ("a".into(), Some(Term::Text("x".into()))),
        ]);
        let vars: Vec<&str> = b.iter().map(|(var, _)| var).collect();
        assert_eq!(vars, vec!["b", "a"]);
    }
}
