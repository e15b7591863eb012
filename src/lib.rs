//! # semblance
//!
//! An instance store with pluggable matching and remote action dispatch.
//!
//! ## Architecture
//!
//! - **Instances** (`instance`): identity-keyed frames with multi-valued
//!   slots, including query-side disjunctive slot values
//! - **Matchers** (`matcher`): structural subgraph matching, an
//!   ontology-linked SPARQL backend (oxigraph), and custom per-type value
//!   rules, routed first-capable through a registry
//! - **Store** (`store`): concurrent live map (dashmap) with an optional
//!   durable document tier (redb) replayed on open
//! - **Dispatch** (`dispatch`): a closed action catalogue addressed by
//!   `CATEGORY`/`TYPE` attributes, every outcome a structured response
//! - **Query** (`query`): language-agnostic binding query seam with a
//!   timeout-bounded SPARQL engine behind it
//!
//! ## Library usage
//!
//! ```no_run
//! use semblance::engine::Engine;
//! use semblance::instance::{Instance, Value};
//! use semblance::store::WriteMode;
//!
//! let engine = Engine::in_memory().unwrap();
//! let person = Instance::new("p1").with_slot("age", Value::Number(42.0));
//! engine.store().add(person, WriteMode::Upsert).unwrap();
//! let hits = engine
//!     .store()
//!     .query(&Instance::new("q").with_slot("age", Value::Number(42.0)))
//!     .unwrap();
//! assert_eq!(hits.len(), 1);
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod identity;
pub mod instance;
pub mod matcher;
pub mod paths;
pub mod query;
pub mod schema;
pub mod store;
