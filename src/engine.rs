//! Engine facade: top-level API for the semblance system.
//!
//! The `Engine` owns the instance store with its standard matcher stack and
//! hands out dispatchers over it. Both the CLI and the daemon bootstrap
//! through here so they agree on matcher order and persistence layout.

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::ActionDispatcher;
use crate::error::SemblanceResult;
use crate::matcher::MatcherRegistry;
use crate::matcher::ontology::OntologyMatcher;
use crate::matcher::structural::StructuralMatcher;
use crate::schema::{MemorySchema, SchemaModel};
use crate::store::{InstanceStore, WriteMode};

/// The semblance instance-matching engine.
pub struct Engine {
    config: Config,
    store: Arc<InstanceStore>,
}

impl Engine {
    /// Build an engine with the standard matcher stack over a shared schema.
    ///
    /// The ontology matcher registers first and answers everything it can;
    /// the structural matcher is the universal fallback, which is what picks
    /// up disjunctive queries the ontology backend declines.
    pub fn new(config: Config, schema: Arc<dyn SchemaModel>) -> SemblanceResult<Self> {
        let ontology = OntologyMatcher::in_memory(config.query_timeout())?;
        let links = schema.parent_links();
        ontology.seed_hierarchy(links.iter().map(|(c, p)| (c, p)))?;

        let mut matchers = MatcherRegistry::new();
        matchers.register(Box::new(ontology));
        matchers.register(Box::new(StructuralMatcher::new(Arc::clone(&schema))));

        let store = match &config.store.data_dir {
            Some(dir) => InstanceStore::open(dir, matchers)?,
            None => InstanceStore::in_memory(matchers),
        };
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    /// Engine with default config and an empty schema, memory-only.
    pub fn in_memory() -> SemblanceResult<Self> {
        Self::new(Config::default(), Arc::new(MemorySchema::new()))
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build an action dispatcher over this engine's store.
    pub fn dispatcher(&self) -> ActionDispatcher {
        let mode = if self.config.store.strict_insert {
            WriteMode::Insert
        } else {
            WriteMode::Upsert
        };
        ActionDispatcher::new(Arc::clone(&self.store), mode)
    }

    /// Snapshot of engine statistics.
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            instances: self.store.len(),
            matchers: self
                .store
                .matcher_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            persistent: self.config.store.data_dir.is_some(),
            query_timeout_ms: self.config.query.timeout_ms,
        }
    }
}

/// Engine statistics for `info` output.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub instances: usize,
    pub matchers: Vec<String>,
    pub persistent: bool,
    pub query_timeout_ms: u64,
}

impl fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "instances:     {}", self.instances)?;
        writeln!(f, "matchers:      {}", self.matchers.join(", "))?;
        writeln!(
            f,
            "persistence:   {}",
            if self.persistent { "on disk" } else { "memory" }
        )?;
        write!(f, "query timeout: {}ms", self.query_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Instance, Value};

    #[test]
    fn in_memory_engine_has_the_standard_stack() {
        let engine = Engine::in_memory().unwrap();
        let info = engine.info();
        assert_eq!(info.matchers, vec!["ontology", "structural"]);
        assert!(!info.persistent);
        assert_eq!(info.instances, 0);
    }

    #[test]
    fn disjunctive_queries_fall_through_to_the_structural_matcher() {
        let engine = Engine::in_memory().unwrap();
        engine
            .store()
            .add(
                Instance::new("p1").with_slot("city", Value::Text("Turin".into())),
                WriteMode::Upsert,
            )
            .unwrap();

        let query = Instance::new("q").with_slot(
            "city",
            Value::AnyOf(vec![
                Value::Text("Turin".into()),
                Value::Text("Rome".into()),
            ]),
        );
        let hits = engine.store().query(&query).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn persistent_engine_replays_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.data_dir = Some(dir.path().to_path_buf());

        {
            let engine = Engine::new(config.clone(), Arc::new(MemorySchema::new())).unwrap();
            engine
                .store()
                .add(
                    Instance::new("p1").with_slot("age", Value::Number(42.0)),
                    WriteMode::Upsert,
                )
                .unwrap();
        }

        let engine = Engine::new(config, Arc::new(MemorySchema::new())).unwrap();
        assert_eq!(engine.info().instances, 1);
        let hits = engine
            .store()
            .query(&Instance::new("q").with_slot("age", Value::Number(42.0)))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
