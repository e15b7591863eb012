//! SPARQL binding query engine backed by oxigraph.
//!
//! Identities map to IRIs under the `urn:semblance:id:` namespace; the
//! vocabulary predicates used by the ontology matcher live under
//! `urn:semblance:vocab:`. Query evaluation runs on a worker thread so a
//! slow backend evaluation is cut off at the configured timeout instead of
//! hanging the serving thread.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::mpsc;
use std::time::Duration;

use oxigraph::model::vocab::xsd;
use oxigraph::model::Term as OxTerm;
use oxigraph::sparql::{Query, QueryResults};
use oxigraph::store::Store;

use crate::error::QueryError;
use crate::identity::Identity;

use super::{Binding, QueryEngine, QueryResult, Term};

/// IRI namespace for identity tokens.
pub const ID_NS: &str = "urn:semblance:id:";

/// Predicate linking an instance to its concept.
pub const VOCAB_INSTANCE_OF: &str = "urn:semblance:vocab:instance-of";

/// Predicate linking a concept to its direct parent concept.
pub const VOCAB_SUBCONCEPT_OF: &str = "urn:semblance:vocab:subconcept-of";

/// Concept object used for instances with no declared concept, so every
/// mirrored instance carries at least one triple.
pub const VOCAB_THING: &str = "urn:semblance:vocab:thing";

/// Percent-encode an identity token into the IRI-safe subset.
///
/// Unreserved characters pass through; everything else is `%XX` encoded so
/// arbitrary human-readable tokens form valid IRIs.
fn iri_encode(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for byte in token.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

fn iri_decode(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut chars = encoded.bytes();
    while let Some(b) = chars.next() {
        if b == b'%' {
            let hi = chars.next()?;
            let lo = chars.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}

/// IRI for an identity token.
pub fn identity_iri(identity: &Identity) -> String {
    format!("{ID_NS}{}", iri_encode(identity.as_str()))
}

/// Recover an identity token from an IRI minted by [`identity_iri`].
pub fn iri_identity(iri: &str) -> Option<Identity> {
    let encoded = iri.strip_prefix(ID_NS)?;
    iri_decode(encoded).map(Identity::from)
}

/// SPARQL-capable binding query engine over an oxigraph store.
pub struct SparqlEngine {
    store: Store,
    constants: BTreeMap<String, String>,
    timeout: Duration,
}

impl SparqlEngine {
    /// Wrap an existing oxigraph store handle.
    pub fn new(store: Store, timeout: Duration) -> Self {
        let mut constants = BTreeMap::new();
        constants.insert("ns".to_string(), ID_NS.to_string());
        constants.insert("instance_of".to_string(), VOCAB_INSTANCE_OF.to_string());
        constants.insert("subconcept_of".to_string(), VOCAB_SUBCONCEPT_OF.to_string());
        Self {
            store,
            constants,
            timeout,
        }
    }

    /// Create an engine over a fresh in-memory store.
    pub fn in_memory(timeout: Duration) -> QueryResult<Self> {
        let store = Store::new().map_err(|e| QueryError::BackendUnavailable {
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self::new(store, timeout))
    }

    /// Parse query text, surfacing compiler rejections as language errors.
    fn compile(query: &str) -> QueryResult<Query> {
        Query::parse(query, None).map_err(|e| QueryError::Language {
            message: e.to_string(),
        })
    }

    /// Run an evaluation on a worker thread, bounded by the timeout.
    ///
    /// oxigraph evaluation cannot be preempted mid-flight; on timeout the
    /// worker's eventual result is discarded and the caller gets
    /// [`QueryError::Timeout`] with no partial bindings.
    fn evaluate<T, F>(&self, f: F) -> QueryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Store) -> QueryResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let store = self.store.clone();
        std::thread::spawn(move || {
            let _ = tx.send(f(store));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(QueryError::Timeout {
                budget_ms: self.timeout.as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(QueryError::BackendUnavailable {
                message: "query worker terminated unexpectedly".into(),
            }),
        }
    }
}

impl QueryEngine for SparqlEngine {
    fn ask(&self, query: &str) -> QueryResult<bool> {
        let compiled = Self::compile(query)?;
        self.evaluate(move |store| {
            let results = store
                .query(compiled)
                .map_err(|e| QueryError::BackendUnavailable {
                    message: e.to_string(),
                })?;
            match results {
                QueryResults::Boolean(b) => Ok(b),
                _ => Err(QueryError::ResultShape {
                    message: "expected a boolean result from an ask query".into(),
                }),
            }
        })
    }

    fn select(&self, query: &str) -> QueryResult<Vec<Binding>> {
        let compiled = Self::compile(query)?;
        self.evaluate(move |store| {
            let results = store
                .query(compiled)
                .map_err(|e| QueryError::BackendUnavailable {
                    message: e.to_string(),
                })?;
            match results {
                QueryResults::Solutions(solutions) => {
                    let variables: Vec<String> = solutions
                        .variables()
                        .iter()
                        .map(|v| v.as_str().to_string())
                        .collect();
                    let mut rows = Vec::new();
                    for solution in solutions {
                        let solution = solution.map_err(|e| QueryError::BackendUnavailable {
                            message: format!("solution error: {e}"),
                        })?;
                        let values = variables
                            .iter()
                            .map(|var| {
                                let term = solution.get(var.as_str()).cloned().map(to_term);
                                (var.clone(), term)
                            })
                            .collect();
                        rows.push(Binding::new(values));
                    }
                    Ok(rows)
                }
                QueryResults::Boolean(_) => Err(QueryError::ResultShape {
                    message: "expected tabular solutions from a select query".into(),
                }),
                QueryResults::Graph(_) => Err(QueryError::ResultShape {
                    message: "construct/describe results are not bindings".into(),
                }),
            }
        })
    }

    fn constants(&self) -> &BTreeMap<String, String> {
        &self.constants
    }
}

fn to_term(term: OxTerm) -> Term {
    match term {
        OxTerm::NamedNode(node) => {
            let iri = node.into_string();
            match iri_identity(&iri) {
                Some(id) => Term::Named(id),
                None => Term::Named(Identity::from(iri)),
            }
        }
        OxTerm::Literal(literal) => {
            let datatype = literal.datatype();
            if datatype == xsd::BOOLEAN {
                Term::Boolean(literal.value() == "true")
            } else if datatype == xsd::DOUBLE
                || datatype == xsd::DECIMAL
                || datatype == xsd::INTEGER
            {
                literal
                    .value()
                    .parse()
                    .map(Term::Number)
                    .unwrap_or_else(|_| Term::Text(literal.value().to_string()))
            } else {
                Term::Text(literal.value().to_string())
            }
        }
        other => Term::Text(other.to_string()),
    }
}

impl std::fmt::Debug for SparqlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparqlEngine")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{GraphNameRef, NamedNode, Quad};

    fn seeded_engine() -> SparqlEngine {
        let engine = SparqlEngine::in_memory(Duration::from_secs(5)).unwrap();
        let s = NamedNode::new(identity_iri(&Identity::new("p1"))).unwrap();
        let p = NamedNode::new(identity_iri(&Identity::new("age"))).unwrap();
        let o = oxigraph::model::Literal::from(42.0);
        engine
            .store
            .insert(&Quad::new(s, p, o, GraphNameRef::DefaultGraph))
            .unwrap();
        engine
    }

    #[test]
    fn iri_roundtrip_with_awkward_tokens() {
        for token in ["p1", "person 1", "café/бар", "a%b"] {
            let id = Identity::new(token);
            let iri = identity_iri(&id);
            assert_eq!(iri_identity(&iri), Some(id));
        }
    }

    #[test]
    fn foreign_iri_does_not_decode() {
        assert_eq!(iri_identity("http://example.org/p1"), None);
    }

    #[test]
    fn ask_true_and_false() {
        let engine = seeded_engine();
        let iri = identity_iri(&Identity::new("p1"));
        assert!(engine.ask(&format!("ASK {{ <{iri}> ?p ?o }}")).unwrap());
        assert!(
            !engine
                .ask(&format!("ASK {{ <{ID_NS}nobody> ?p ?o }}"))
                .unwrap()
        );
    }

    #[test]
    fn select_returns_typed_bindings() {
        let engine = seeded_engine();
        let rows = engine
            .select("SELECT ?s ?v WHERE { ?s ?p ?v }")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("s"), Some(&Term::Named(Identity::new("p1"))));
        assert_eq!(rows[0].get("v"), Some(&Term::Number(42.0)));
    }

    #[test]
    fn unparseable_query_is_a_language_error() {
        let engine = seeded_engine();
        let err = engine.ask("THIS IS NOT SPARQL").unwrap_err();
        assert!(matches!(err, QueryError::Language { .. }));
    }

    #[test]
    fn ask_on_select_shape_is_rejected() {
        let engine = seeded_engine();
        let err = engine.ask("SELECT ?s WHERE { ?s ?p ?o }").unwrap_err();
        assert!(matches!(err, QueryError::ResultShape { .. }));
    }

    #[test]
    fn slow_evaluation_times_out_with_no_partial_result() {
        let engine = SparqlEngine::in_memory(Duration::from_millis(20)).unwrap();
        let err = engine
            .evaluate(|_| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(true)
            })
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout { budget_ms: 20 }));
    }

    #[test]
    fn constants_expose_vocabulary() {
        let engine = seeded_engine();
        assert_eq!(engine.constants().get("ns").unwrap(), ID_NS);
        assert_eq!(
            engine.constants().get("instance_of").unwrap(),
            VOCAB_INSTANCE_OF
        );
    }
}
