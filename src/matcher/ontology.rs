//! Ontology-linked matcher: compiles query instances to SPARQL.
//!
//! The matcher mirrors stored instances into its own oxigraph store via the
//! store-notification hooks, and answers queries by compiling the query
//! instance into a conjunctive SPARQL pattern evaluated through the binding
//! query engine.
//!
//! # Compilation rule
//!
//! - every instance carries `?x <instance-of> ?c`; a concept constraint adds
//!   the subsumption sub-query `?c <subconcept-of>* <Concept>`
//! - each constrained slot value becomes one triple pattern: references and
//!   booleans as direct terms, text as a plain literal, numbers through a
//!   value-equality `FILTER` so numeric literal forms compare numerically
//! - instance-level disjunction (`Value::AnyOf`) is NOT expressible here;
//!   the capability flag is off and `handles_query` declines such shapes so
//!   routing falls through to a matcher that can answer them exactly
//! - non-finite numbers (`NaN`, infinities) have no SPARQL literal form and
//!   are likewise declined by `handles_query`

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

use oxigraph::model::{GraphNameRef, Literal, NamedNode, Quad, Term as OxTerm};
use oxigraph::store::Store;

use crate::error::MatchError;
use crate::identity::Identity;
use crate::instance::{Instance, Value};
use crate::query::sparql::{
    identity_iri, SparqlEngine, VOCAB_INSTANCE_OF, VOCAB_SUBCONCEPT_OF, VOCAB_THING,
};
use crate::query::{QueryEngine, Term};

use super::{MatchContext, MatchResult, Matcher};

/// Matcher backed by a triple store with subsumption-aware concept matching.
pub struct OntologyMatcher {
    store: Store,
    engine: SparqlEngine,
    handles_instance_disjunction: bool,
}

impl OntologyMatcher {
    /// Create a matcher over a fresh in-memory triple store.
    pub fn in_memory(query_timeout: Duration) -> MatchResult<Self> {
        let store = Store::new().map_err(|e| MatchError::Sync {
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self::over(store, query_timeout))
    }

    /// Wrap an existing oxigraph store handle (e.g. a persistent one).
    pub fn over(store: Store, query_timeout: Duration) -> Self {
        let engine = SparqlEngine::new(store.clone(), query_timeout);
        Self {
            store,
            engine,
            // The SPARQL compiler here emits pure conjunctions; disjunctive
            // query shapes are declined rather than under-matched.
            handles_instance_disjunction: false,
        }
    }

    /// Capability flag: can this matcher answer disjunctive query shapes?
    pub fn handles_instance_disjunction(&self) -> bool {
        self.handles_instance_disjunction
    }

    /// Mirror a concept hierarchy into the triple store so subsumption
    /// sub-queries can walk it.
    pub fn seed_hierarchy<'a>(
        &self,
        links: impl IntoIterator<Item = (&'a Identity, &'a Identity)>,
    ) -> MatchResult<()> {
        for (child, parent) in links {
            let quad = Quad::new(
                named(child)?,
                vocab(VOCAB_SUBCONCEPT_OF)?,
                named(parent)?,
                GraphNameRef::DefaultGraph,
            );
            self.store.insert(&quad).map_err(|e| MatchError::Sync {
                message: format!("hierarchy insert failed: {e}"),
            })?;
        }
        Ok(())
    }

    fn quads_for(&self, instance: &Instance) -> MatchResult<Vec<Quad>> {
        let subject = named(instance.identity())?;
        let mut quads = Vec::new();

        // Presence triple: instances without a declared concept still show
        // up for vacuous queries.
        let concept_object: OxTerm = match instance.concept() {
            Some(concept) => named(concept)?.into(),
            None => vocab(VOCAB_THING)?.into(),
        };
        quads.push(Quad::new(
            subject.clone(),
            vocab(VOCAB_INSTANCE_OF)?,
            concept_object,
            GraphNameRef::DefaultGraph,
        ));

        for (slot, values) in instance.slots() {
            let predicate = named(slot)?;
            for value in values {
                let object: OxTerm = match value {
                    Value::Number(n) => Literal::from(*n).into(),
                    Value::Text(t) => Literal::new_simple_literal(t).into(),
                    Value::Boolean(b) => Literal::from(*b).into(),
                    Value::Reference(id) => named(id)?.into(),
                    // Disjunctions are query-pattern material, never mirrored.
                    Value::AnyOf(_) => continue,
                };
                quads.push(Quad::new(
                    subject.clone(),
                    predicate.clone(),
                    object,
                    GraphNameRef::DefaultGraph,
                ));
            }
        }

        Ok(quads)
    }

    fn remove_subject(&self, identity: &Identity) -> MatchResult<()> {
        let subject = named(identity)?;
        let existing: Vec<Quad> = self
            .store
            .quads_for_pattern(Some(subject.as_ref().into()), None, None, None)
            .collect::<Result<_, _>>()
            .map_err(|e| MatchError::Sync {
                message: format!("mirror scan failed: {e}"),
            })?;
        for quad in &existing {
            self.store.remove(quad).map_err(|e| MatchError::Sync {
                message: format!("mirror remove failed: {e}"),
            })?;
        }
        Ok(())
    }

    /// Compile the conjunctive body shared by select and ask forms.
    ///
    /// `subject` is either the `?x` variable or a bound candidate IRI.
    fn compile_body(query: &Instance, subject: &str) -> String {
        let mut body = String::new();
        match query.concept() {
            Some(concept) => {
                let _ = writeln!(
                    body,
                    "  {subject} <{VOCAB_INSTANCE_OF}> ?c . ?c <{VOCAB_SUBCONCEPT_OF}>* <{}> .",
                    identity_iri(concept)
                );
            }
            None => {
                let _ = writeln!(body, "  {subject} <{VOCAB_INSTANCE_OF}> ?c .");
            }
        }

        let mut filter_index = 0usize;
        for (slot, values) in query.slots() {
            let predicate = identity_iri(slot);
            for value in values {
                match value {
                    Value::Number(n) => {
                        let _ = writeln!(
                            body,
                            "  {subject} <{predicate}> ?v{filter_index} . FILTER(?v{filter_index} = {n}) ."
                        );
                        filter_index += 1;
                    }
                    Value::Text(t) => {
                        let _ = writeln!(
                            body,
                            "  {subject} <{predicate}> \"{}\" .",
                            escape_literal(t)
                        );
                    }
                    Value::Boolean(b) => {
                        let _ = writeln!(body, "  {subject} <{predicate}> {b} .");
                    }
                    Value::Reference(id) => {
                        let _ = writeln!(body, "  {subject} <{predicate}> <{}> .", identity_iri(id));
                    }
                    // handles_query already declined disjunctive shapes.
                    Value::AnyOf(_) => {}
                }
            }
        }
        body
    }
}

fn named(identity: &Identity) -> MatchResult<NamedNode> {
    NamedNode::new(identity_iri(identity)).map_err(|e| MatchError::Sync {
        message: format!("invalid identity IRI: {e}"),
    })
}

fn vocab(iri: &str) -> MatchResult<NamedNode> {
    NamedNode::new(iri).map_err(|e| MatchError::Sync {
        message: format!("invalid vocabulary IRI: {e}"),
    })
}

// Quotes, backslashes, and line/tab controls must go through ECHAR escapes;
// a raw newline inside a quoted SPARQL literal is a syntax error.
fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

// Non-finite numbers have no SPARQL literal form, so queries carrying them
// cannot be compiled and must be declined up front.
fn value_compilable(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_finite(),
        Value::AnyOf(alternatives) => alternatives.iter().all(value_compilable),
        _ => true,
    }
}

fn query_compilable(query: &Instance) -> bool {
    query
        .slots()
        .all(|(_, values)| values.iter().all(value_compilable))
}

impl Matcher for OntologyMatcher {
    fn name(&self) -> &str {
        "ontology"
    }

    fn handles_query(&self, query: &Instance) -> bool {
        (self.handles_instance_disjunction || !query.has_disjunction())
            && query_compilable(query)
    }

    fn find_matches(
        &self,
        query: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<BTreeSet<Identity>> {
        ctx.cancel.checkpoint()?;
        let sparql = format!(
            "SELECT DISTINCT ?x WHERE {{\n{}}}",
            Self::compile_body(query, "?x")
        );
        tracing::debug!(target: "semblance::matcher", query = %sparql, "compiled instance query");

        let rows = self.engine.select(&sparql)?;
        let mut hits = BTreeSet::new();
        for row in rows {
            if let Some(Term::Named(identity)) = row.get("x") {
                hits.insert(identity.clone());
            }
        }
        Ok(hits)
    }

    /// Answers from the mirror by the candidate's identity, not from the
    /// passed snapshot: a candidate this matcher has never mirrored (no
    /// `instance_added` for it) answers `false` regardless of its slots.
    fn matches(
        &self,
        query: &Instance,
        candidate: &Instance,
        ctx: &MatchContext<'_>,
    ) -> MatchResult<bool> {
        ctx.cancel.checkpoint()?;
        let subject = format!("<{}>", identity_iri(candidate.identity()));
        let sparql = format!("ASK {{\n{}}}", Self::compile_body(query, &subject));
        Ok(self.engine.ask(&sparql)?)
    }

    fn instance_added(&self, instance: &Instance) -> MatchResult<()> {
        // Replace semantics: drop any previous mirror of this identity first.
        self.remove_subject(instance.identity())?;
        for quad in self.quads_for(instance)? {
            self.store.insert(&quad).map_err(|e| MatchError::Sync {
                message: format!("mirror insert failed: {e}"),
            })?;
        }
        Ok(())
    }

    fn instance_removed(&self, identity: &Identity) -> MatchResult<()> {
        self.remove_subject(identity)
    }
}

impl std::fmt::Debug for OntologyMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OntologyMatcher")
            .field(
                "handles_instance_disjunction",
                &self.handles_instance_disjunction,
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MemorySource;
    use crate::schema::{MemorySchema, SchemaModel};

    fn matcher_with_taxonomy() -> OntologyMatcher {
        let matcher = OntologyMatcher::in_memory(Duration::from_secs(5)).unwrap();
        let schema = MemorySchema::new()
            .add_concept("Dog", "Mammal")
            .add_concept("Mammal", "Animal");
        let links = schema.parent_links();
        matcher
            .seed_hierarchy(links.iter().map(|(c, p)| (c, p)))
            .unwrap();
        matcher
    }

    #[test]
    fn slot_equality_matching() {
        let matcher = matcher_with_taxonomy();
        matcher
            .instance_added(&Instance::new("p1").with_slot("age", Value::Number(42.0)))
            .unwrap();
        matcher
            .instance_added(&Instance::new("p2").with_slot("age", Value::Number(7.0)))
            .unwrap();

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let hits = matcher
            .find_matches(
                &Instance::new("q").with_slot("age", Value::Number(42.0)),
                &ctx,
            )
            .unwrap();
        assert_eq!(hits, BTreeSet::from([Identity::new("p1")]));
    }

    #[test]
    fn concept_subsumption_via_property_path() {
        let matcher = matcher_with_taxonomy();
        matcher
            .instance_added(&Instance::new("fido").with_concept("Dog"))
            .unwrap();
        matcher
            .instance_added(&Instance::new("fern").with_concept("Plant"))
            .unwrap();

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let hits = matcher
            .find_matches(&Instance::new("q").with_concept("Animal"), &ctx)
            .unwrap();
        assert_eq!(hits, BTreeSet::from([Identity::new("fido")]));
    }

    #[test]
    fn vacuous_query_sees_every_mirrored_instance() {
        let matcher = matcher_with_taxonomy();
        matcher.instance_added(&Instance::new("bare")).unwrap();
        matcher
            .instance_added(&Instance::new("typed").with_concept("Dog"))
            .unwrap();

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let hits = matcher
            .find_matches(&Instance::new("q"), &ctx)
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn control_characters_in_text_literals_survive_compilation() {
        let matcher = matcher_with_taxonomy();
        matcher
            .instance_added(
                &Instance::new("p1").with_slot("note", Value::text("line1\nline2\t\"quoted\"")),
            )
            .unwrap();
        matcher
            .instance_added(&Instance::new("p2").with_slot("note", Value::text("line1")))
            .unwrap();

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let hits = matcher
            .find_matches(
                &Instance::new("q").with_slot("note", Value::text("line1\nline2\t\"quoted\"")),
                &ctx,
            )
            .unwrap();
        assert_eq!(hits, BTreeSet::from([Identity::new("p1")]));
    }

    #[test]
    fn declines_non_finite_number_shapes() {
        let matcher = matcher_with_taxonomy();
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let query = Instance::new("q").with_slot("age", Value::Number(n));
            assert!(!matcher.handles_query(&query), "should decline {n}");
        }
        assert!(
            matcher.handles_query(&Instance::new("q").with_slot("age", Value::Number(42.0)))
        );
    }

    #[test]
    fn declines_disjunctive_shapes() {
        let matcher = matcher_with_taxonomy();
        assert!(!matcher.handles_instance_disjunction());
        let disjunctive = Instance::new("q").with_slot(
            "age",
            Value::AnyOf(vec![Value::Number(1.0), Value::Number(2.0)]),
        );
        assert!(!matcher.handles_query(&disjunctive));
        assert!(matcher.handles_query(&Instance::new("q")));
    }

    #[test]
    fn replace_discards_stale_slots() {
        let matcher = matcher_with_taxonomy();
        matcher
            .instance_added(&Instance::new("p1").with_slot("age", Value::Number(42.0)))
            .unwrap();
        matcher
            .instance_added(&Instance::new("p1").with_slot("age", Value::Number(43.0)))
            .unwrap();

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let stale = matcher
            .find_matches(
                &Instance::new("q").with_slot("age", Value::Number(42.0)),
                &ctx,
            )
            .unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn pairwise_matches_by_candidate_identity() {
        let matcher = matcher_with_taxonomy();
        let p1 = Instance::new("p1")
            .with_concept("Dog")
            .with_slot("name", Value::text("Fido"));
        matcher.instance_added(&p1).unwrap();

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let query = Instance::new("q").with_concept("Mammal");
        assert!(matcher.matches(&query, &p1, &ctx).unwrap());

        let other = Instance::new("p9").with_concept("Dog");
        assert!(!matcher.matches(&query, &other, &ctx).unwrap());
    }

    #[test]
    fn removal_drops_the_mirror() {
        let matcher = matcher_with_taxonomy();
        matcher
            .instance_added(&Instance::new("p1").with_slot("age", Value::Number(42.0)))
            .unwrap();
        matcher.instance_removed(&Identity::new("p1")).unwrap();

        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let hits = matcher
            .find_matches(&Instance::new("q"), &ctx)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn text_with_quotes_is_escaped() {
        let matcher = matcher_with_taxonomy();
        matcher
            .instance_added(
                &Instance::new("p1").with_slot("motto", Value::text("say \"hi\"")),
            )
            .unwrap();
        let source = MemorySource::new();
        let ctx = MatchContext::new(&source);
        let hits = matcher
            .find_matches(
                &Instance::new("q").with_slot("motto", Value::text("say \"hi\"")),
                &ctx,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
