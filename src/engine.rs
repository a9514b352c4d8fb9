//! Engine facade: owns the shared, read-mostly resources of one process.
//!
//! The graph store, endpoint registry, example store and semantic index are
//! built once here and handed to components by `Arc`. Component constructors
//! are cheap, so callers build a fresh one per request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{Agent, AgentConfig};
use crate::concept::ConceptResolver;
use crate::error::{EngineError, GrapeResult};
use crate::exemplar::{ExampleRetriever, ExampleStore};
use crate::federation::{EndpointDescriptor, EndpointRegistry, FederatedConnector};
use crate::graph::executor::{QueryExecutor, RetryPolicy};
use crate::graph::neighborhood::NeighborhoodExpander;
use crate::graph::schema::SchemaBuilder;
use crate::graph::sparql::{GraphStore, HttpSparqlStore, OxigraphStore};
use crate::graph::traverse::PathExplorer;
use crate::proof::ProofEngine;
use crate::semantic::{NgramEmbedder, SemanticIndex};

/// Semantic index settings. `None` in [`EngineConfig`] disables the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticSettings {
    pub min_similarity: f32,
    pub dim: usize,
    pub label_limit: usize,
}

impl Default for SemanticSettings {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
            dim: 256,
            label_limit: 50_000,
        }
    }
}

/// Runtime configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// On-disk store directory. `None` (with no endpoint) for memory-only mode.
    pub store_path: Option<PathBuf>,
    /// Remote SPARQL endpoint used as the primary store.
    pub endpoint: Option<String>,
    /// Per-request timeout for a remote primary store.
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
    pub agent: AgentConfig,
    pub semantic: Option<SemanticSettings>,
    /// Exemplar directory. `None` uses the built-in exemplars.
    pub examples_dir: Option<PathBuf>,
    /// Federation endpoints registered at startup.
    pub endpoints: Vec<(String, EndpointDescriptor)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            endpoint: None,
            store_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            agent: AgentConfig::default(),
            semantic: Some(SemanticSettings::default()),
            examples_dir: None,
            endpoints: Vec::new(),
        }
    }
}

/// The grape-reason engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn GraphStore>,
    /// Set when the primary store is embedded and therefore loadable.
    local: Option<Arc<OxigraphStore>>,
    executor: QueryExecutor,
    registry: Arc<EndpointRegistry>,
    examples: Arc<ExampleStore>,
    semantic: Option<Arc<SemanticIndex>>,
}

impl Engine {
    /// Create a new engine with the given configuration.
    ///
    /// The semantic index is built from the store's labels immediately; call
    /// [`Engine::rebuild_semantic`] after loading more data.
    pub fn new(config: EngineConfig) -> GrapeResult<Self> {
        let (store, local): (Arc<dyn GraphStore>, Option<Arc<OxigraphStore>>) =
            match (&config.store_path, &config.endpoint) {
                (Some(_), Some(_)) => {
                    return Err(EngineError::InvalidConfig {
                        message: "store path and endpoint are mutually exclusive".into(),
                    }
                    .into());
                }
                (Some(path), None) => {
                    let local = Arc::new(OxigraphStore::open(path)?);
                    (local.clone() as Arc<dyn GraphStore>, Some(local))
                }
                (None, Some(url)) => (
                    Arc::new(HttpSparqlStore::new(url.clone(), config.store_timeout)),
                    None,
                ),
                (None, None) => {
                    let local = Arc::new(OxigraphStore::in_memory()?);
                    (local.clone() as Arc<dyn GraphStore>, Some(local))
                }
            };

        tracing::info!(
            store = store.name(),
            endpoints = config.endpoints.len(),
            semantic = config.semantic.is_some(),
            "initializing grape-reason engine"
        );

        let executor = QueryExecutor::new(Arc::clone(&store)).with_policy(config.retry);

        let registry = EndpointRegistry::new();
        for (name, descriptor) in &config.endpoints {
            registry.register(name, descriptor.clone())?;
        }

        let examples = match &config.examples_dir {
            Some(dir) => ExampleStore::from_dir(dir)?,
            None => ExampleStore::default(),
        };

        let engine = Self {
            semantic: config.semantic.map(|s| {
                Arc::new(
                    SemanticIndex::new(Arc::new(NgramEmbedder::new(s.dim)))
                        .with_min_similarity(s.min_similarity),
                )
            }),
            config,
            store,
            local,
            executor,
            registry: Arc::new(registry),
            examples: Arc::new(examples),
        };
        if let Err(e) = engine.rebuild_semantic() {
            tracing::warn!(error = %e, "semantic index not built; resolution falls back to lexical matching");
        }
        Ok(engine)
    }

    /// Load an RDF file into the embedded store. Returns the new quad count.
    pub fn load_file(&self, path: &Path) -> GrapeResult<usize> {
        let local = self.local_store()?;
        local.load_file(path)?;
        let count = local.len()?;
        tracing::info!(path = %path.display(), quads = count, "loaded RDF file");
        Ok(count)
    }

    /// Load a Turtle document into the embedded store. Returns the new quad count.
    pub fn load_turtle(&self, data: &str) -> GrapeResult<usize> {
        let local = self.local_store()?;
        local.load_turtle(data)?;
        Ok(local.len()?)
    }

    fn local_store(&self) -> GrapeResult<&OxigraphStore> {
        self.local.as_deref().ok_or_else(|| {
            EngineError::ReadOnlyStore {
                store: self.store.name().to_string(),
            }
            .into()
        })
    }

    /// Re-read labels from the store into the semantic index. Returns the
    /// number of indexed labels, 0 when the index is disabled.
    pub fn rebuild_semantic(&self) -> GrapeResult<usize> {
        match (&self.semantic, &self.config.semantic) {
            (Some(index), Some(settings)) => {
                index.rebuild_from_store(&self.executor, settings.label_limit)
            }
            _ => Ok(0),
        }
    }

    /// Reload exemplars from the configured directory.
    pub fn reload_examples(&self) -> GrapeResult<usize> {
        match &self.config.examples_dir {
            Some(dir) => Ok(self.examples.reload_dir(dir)?),
            None => Ok(self.examples.len()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// A query executor over the primary store with the configured retry policy.
    pub fn executor(&self) -> QueryExecutor {
        self.executor.clone()
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn examples(&self) -> &Arc<ExampleStore> {
        &self.examples
    }

    pub fn semantic(&self) -> Option<&Arc<SemanticIndex>> {
        self.semantic.as_ref()
    }

    // ── Component constructors ──────────────────────────────────────────

    pub fn agent(&self) -> Agent {
        Agent::new(
            self.executor(),
            Arc::clone(&self.examples),
            Arc::clone(&self.registry),
        )
        .with_semantic(self.semantic.clone())
        .with_config(self.config.agent.clone())
    }

    pub fn resolver(&self) -> ConceptResolver {
        ConceptResolver::new(self.executor()).with_semantic(self.semantic.clone())
    }

    pub fn expander(&self) -> NeighborhoodExpander {
        NeighborhoodExpander::new(self.executor())
    }

    pub fn explorer(&self) -> PathExplorer {
        PathExplorer::new(self.expander(), self.config.agent.explorer.clone())
    }

    pub fn schema_builder(&self) -> SchemaBuilder {
        SchemaBuilder::new(self.executor()).with_hierarchy_depth(self.config.agent.hierarchy_depth)
    }

    pub fn proof_engine(&self) -> ProofEngine {
        ProofEngine::new(self.executor(), self.explorer()).with_policy(self.config.agent.proof_policy)
    }

    pub fn connector(&self) -> FederatedConnector {
        FederatedConnector::new(self.executor(), Arc::clone(&self.registry))
            .with_row_limit(self.config.agent.row_limit)
    }

    pub fn retriever(&self) -> ExampleRetriever {
        ExampleRetriever::new(Arc::clone(&self.examples))
    }

    /// Get engine info summary.
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            store: self.store.name().to_string(),
            persistent: self.config.store_path.is_some(),
            remote: self.config.endpoint.is_some(),
            quad_count: self.local.as_ref().and_then(|s| s.len().ok()),
            endpoint_count: self.registry.len(),
            example_count: self.examples.len(),
            semantic_labels: self.semantic.as_ref().map(|s| s.len()),
        }
    }
}

/// Summary information about the engine.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub store: String,
    pub persistent: bool,
    pub remote: bool,
    /// `None` for remote stores.
    pub quad_count: Option<usize>,
    pub endpoint_count: usize,
    pub example_count: usize,
    /// `None` when the semantic index is disabled.
    pub semantic_labels: Option<usize>,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "grape-reason engine info")?;
        writeln!(f, "  store:        {}", self.store)?;
        writeln!(f, "  persistent:   {}", self.persistent)?;
        writeln!(f, "  remote:       {}", self.remote)?;
        match self.quad_count {
            Some(n) => writeln!(f, "  quads:        {n}")?,
            None => writeln!(f, "  quads:        unknown")?,
        }
        writeln!(f, "  endpoints:    {}", self.endpoint_count)?;
        writeln!(f, "  examples:     {}", self.example_count)?;
        match self.semantic_labels {
            Some(n) => writeln!(f, "  labels:       {n}")?,
            None => writeln!(f, "  labels:       disabled")?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store", &self.store.name())
            .field("endpoints", &self.registry.names())
            .field("examples", &self.examples.len())
            .finish()
    }
}
