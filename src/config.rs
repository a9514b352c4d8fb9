//! TOML configuration file.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration: an in-memory store, built-in exemplars, no federation.
//!
//! ```toml
//! [store]
//! path = "/var/lib/grape/store"
//!
//! [limits]
//! max_hops = 4
//!
//! [[federation.endpoints]]
//! name = "wikidata"
//! url = "https://query.wikidata.org/sparql"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::engine::{EngineConfig, SemanticSettings};
use crate::error::{ConfigError, EngineError};
use crate::federation::EndpointDescriptor;
use crate::graph::executor::RetryPolicy;
use crate::graph::traverse::ExplorerConfig;
use crate::proof::ProofPolicy;

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Root of `grape.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrapeConfig {
    pub store: StoreSection,
    pub retry: RetrySection,
    pub limits: LimitsSection,
    pub semantic: SemanticSection,
    pub examples: ExamplesSection,
    pub federation: FederationSection,
}

/// Where the primary graph lives. Neither `path` nor `endpoint` means in-memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: None,
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Result and search bounds used by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_neighborhood_limit")]
    pub neighborhood_limit: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Edges read per node during path search; unset reads all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbors_per_node: Option<usize>,
    #[serde(default = "default_max_reachable")]
    pub max_reachable: usize,
    #[serde(default = "default_hierarchy_depth")]
    pub hierarchy_depth: usize,
    #[serde(default = "default_scope_limit")]
    pub scope_limit: usize,
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
    #[serde(default = "default_example_count")]
    pub example_count: usize,
    #[serde(default)]
    pub proof_policy: ProofPolicy,
    /// Whole-request deadline in seconds; 0 disables it.
    #[serde(default)]
    pub request_timeout_secs: u64,
}

fn default_top_k() -> usize {
    5
}

fn default_neighborhood_limit() -> usize {
    50
}

fn default_max_hops() -> usize {
    3
}

fn default_max_paths() -> usize {
    10
}

fn default_max_reachable() -> usize {
    1_000
}

fn default_hierarchy_depth() -> usize {
    3
}

fn default_scope_limit() -> usize {
    100
}

fn default_row_limit() -> usize {
    100
}

fn default_example_count() -> usize {
    3
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            neighborhood_limit: default_neighborhood_limit(),
            max_hops: default_max_hops(),
            max_paths: default_max_paths(),
            neighbors_per_node: None,
            max_reachable: default_max_reachable(),
            hierarchy_depth: default_hierarchy_depth(),
            scope_limit: default_scope_limit(),
            row_limit: default_row_limit(),
            example_count: default_example_count(),
            proof_policy: ProofPolicy::default(),
            request_timeout_secs: 0,
        }
    }
}

impl LimitsSection {
    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            top_k: self.top_k,
            neighborhood_limit: self.neighborhood_limit,
            max_hops: self.max_hops,
            explorer: ExplorerConfig {
                max_paths: self.max_paths,
                neighbors_per_node: self.neighbors_per_node,
                max_reachable: self.max_reachable,
                ..ExplorerConfig::default()
            },
            proof_policy: self.proof_policy,
            hierarchy_depth: self.hierarchy_depth,
            scope_limit: self.scope_limit,
            row_limit: self.row_limit,
            example_count: self.example_count,
            request_timeout: (self.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.request_timeout_secs)),
        }
    }
}

/// Label embedding index used as the last resolution strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_dim")]
    pub dim: usize,
    /// Labels read from the store when building the index.
    #[serde(default = "default_label_limit")]
    pub label_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_min_similarity() -> f32 {
    0.5
}

fn default_dim() -> usize {
    256
}

fn default_label_limit() -> usize {
    50_000
}

impl Default for SemanticSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_similarity: default_min_similarity(),
            dim: default_dim(),
            label_limit: default_label_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamplesSection {
    /// Directory of `*.json` exemplar files. Unset uses the built-in set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FederationSection {
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
}

/// One `[[federation.endpoints]]` table: exactly one of `url` or `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl EndpointEntry {
    pub fn to_descriptor(&self) -> Result<EndpointDescriptor, EngineError> {
        match (&self.url, &self.path) {
            (Some(url), None) => Ok(EndpointDescriptor::Sparql {
                url: url.clone(),
                timeout_secs: self.timeout_secs,
            }),
            (None, Some(path)) => Ok(EndpointDescriptor::Oxigraph { path: path.clone() }),
            _ => Err(EngineError::InvalidConfig {
                message: format!(
                    "federation endpoint \"{}\" needs exactly one of `url` or `path`",
                    self.name
                ),
            }),
        }
    }
}

impl GrapeConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Convert to the runtime engine configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig, EngineError> {
        let endpoints = self
            .federation
            .endpoints
            .iter()
            .map(|e| Ok((e.name.clone(), e.to_descriptor()?)))
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(EngineConfig {
            store_path: self.store.path.clone(),
            endpoint: self.store.endpoint.clone(),
            store_timeout: Duration::from_secs(self.store.timeout_secs),
            retry: self.retry.to_policy(),
            agent: self.limits.to_agent_config(),
            semantic: self.semantic.enabled.then(|| SemanticSettings {
                min_similarity: self.semantic.min_similarity,
                dim: self.semantic.dim,
                label_limit: self.semantic.label_limit,
            }),
            examples_dir: self.examples.dir.clone(),
            endpoints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg: GrapeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, GrapeConfig::default());
        assert_eq!(cfg.limits.max_hops, 3);
        assert!(cfg.semantic.enabled);
        assert!(cfg.store.path.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: GrapeConfig = toml::from_str(
            r#"
            [limits]
            max_hops = 5
            proof_policy = "require_predicate"

            [[federation.endpoints]]
            name = "wikidata"
            url = "https://query.wikidata.org/sparql"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.limits.max_hops, 5);
        assert_eq!(cfg.limits.top_k, 5);
        assert_eq!(cfg.limits.proof_policy, ProofPolicy::RequirePredicate);
        assert_eq!(cfg.federation.endpoints.len(), 1);
        assert_eq!(cfg.federation.endpoints[0].timeout_secs, 30);
    }

    #[test]
    fn neighbors_per_node_is_unbounded_unless_set() {
        let cfg: GrapeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.limits.to_agent_config().explorer.neighbors_per_node, None);

        let capped: GrapeConfig =
            toml::from_str("[limits]\nneighbors_per_node = 40\n").unwrap();
        assert_eq!(
            capped.limits.to_agent_config().explorer.neighbors_per_node,
            Some(40)
        );
    }

    #[test]
    fn config_roundtrip_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("grape.toml");

        let mut cfg = GrapeConfig::default();
        cfg.store.endpoint = Some("http://localhost:7878/query".into());
        cfg.limits.row_limit = 42;
        cfg.save(&path).unwrap();

        let loaded = GrapeConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("grape.toml");
        std::fs::write(&path, "[limits]\nmax_hops = \"three\"\n").unwrap();
        assert!(matches!(
            GrapeConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            GrapeConfig::load(&tmp.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn converts_to_engine_config() {
        let mut cfg = GrapeConfig::default();
        cfg.limits.request_timeout_secs = 10;
        cfg.semantic.enabled = false;
        let engine = cfg.to_engine_config().unwrap();
        assert_eq!(engine.agent.request_timeout, Some(Duration::from_secs(10)));
        assert!(engine.semantic.is_none());
        assert_eq!(engine.retry.max_retries, 2);
    }

    #[test]
    fn endpoint_needs_exactly_one_location() {
        let entry = EndpointEntry {
            name: "both".into(),
            url: Some("http://x".into()),
            path: Some("/tmp/x".into()),
            timeout_secs: 5,
        };
        assert!(entry.to_descriptor().is_err());
    }
}
