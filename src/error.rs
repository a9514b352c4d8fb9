//! Rich diagnostic error types for the grape-reason engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the grape-reason engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum GrapeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Example(#[from] ExampleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

/// Failures surfaced by the query executor.
///
/// `Timeout` and `StoreUnavailable` are transient and retried locally;
/// everything else propagates immediately.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum QueryError {
    #[error("malformed query: {message}")]
    #[diagnostic(
        code(grape::query::malformed),
        help(
            "The store rejected the query as syntactically invalid. \
             This is never retried. Check the pattern text supplied to the query builder."
        )
    )]
    Malformed { message: String },

    #[error("query timed out: {message}")]
    #[diagnostic(
        code(grape::query::timeout),
        help(
            "The store did not answer in time, even after retrying. \
             Increase `store.timeout_secs` or lower the result limits."
        )
    )]
    Timeout { message: String },

    #[error("graph store unavailable: {message}")]
    #[diagnostic(
        code(grape::query::unavailable),
        help(
            "The store could not be reached after the configured number of retries. \
             Check the endpoint URL and that the SPARQL service is running."
        )
    )]
    StoreUnavailable { message: String },

    #[error("request cancelled")]
    #[diagnostic(
        code(grape::query::cancelled),
        help("The request was cancelled or its deadline passed; no further store calls were made.")
    )]
    Cancelled,

    #[error("unexpected result shape: expected {expected}")]
    #[diagnostic(
        code(grape::query::unexpected_result),
        help("SELECT queries must return solutions and ASK queries must return a boolean.")
    )]
    UnexpectedResult { expected: &'static str },

    #[error("store rejected the request: {message}")]
    #[diagnostic(
        code(grape::query::rejected),
        help(
            "The endpoint refused the request or answered with something that is not \
             SPARQL results. Retrying will not help; check the endpoint URL and its access rules."
        )
    )]
    Rejected { message: String },
}

impl QueryError {
    /// Whether this failure is network-class and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StoreUnavailable { .. })
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("failed to open graph store at {path}: {message}")]
    #[diagnostic(
        code(grape::store::open),
        help(
            "The embedded store could not be opened. Check that the directory exists, \
             is writable, and is not locked by another process."
        )
    )]
    Open { path: String, message: String },

    #[error("failed to load RDF data: {message}")]
    #[diagnostic(
        code(grape::store::load),
        help("The RDF document could not be parsed. Check that it is valid Turtle.")
    )]
    Load { message: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(grape::store::io),
        help("A filesystem operation failed. Check the path and its permissions.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Federation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FederationError {
    #[error("unknown endpoint: \"{name}\"")]
    #[diagnostic(
        code(grape::federation::unknown_endpoint),
        help(
            "No endpoint is registered under this name. Register it with \
             `FederatedConnector::register` or under `[[federation.endpoints]]` in the config."
        )
    )]
    UnknownEndpoint { name: String },

    #[error("endpoint \"{name}\" could not be opened: {message}")]
    #[diagnostic(
        code(grape::federation::descriptor),
        help("The endpoint descriptor points at a store that could not be opened.")
    )]
    Descriptor { name: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),
}

// ---------------------------------------------------------------------------
// Semantic index errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SemanticError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(grape::semantic::dim_mismatch),
        help(
            "All label embeddings in the index must share one dimension. \
             Rebuild the index with a single embedder."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("semantic index error: {message}")]
    #[diagnostic(
        code(grape::semantic::index),
        help("The approximate nearest-neighbor index encountered an internal error.")
    )]
    Index { message: String },
}

// ---------------------------------------------------------------------------
// Example store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExampleError {
    #[error("failed to read example file {path}")]
    #[diagnostic(
        code(grape::examples::read),
        help("Check that the examples directory exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse example file {path}: {message}")]
    #[diagnostic(
        code(grape::examples::parse),
        help(
            "Example files hold one JSON object or an array of objects with \
             `question` and `sparql` fields."
        )
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    #[diagnostic(
        code(grape::config::read),
        help("Check that the configuration file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}")]
    #[diagnostic(
        code(grape::config::write),
        help("Check that the target directory is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    #[diagnostic(
        code(grape::config::parse),
        help("The file must be valid TOML. Unknown sections are ignored, wrong types are not.")
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(grape::engine::invalid_config),
        help("Check the `[store]` section: set either `path`, `endpoint`, or neither for memory.")
    )]
    InvalidConfig { message: String },

    #[error("store {store} is read-only")]
    #[diagnostic(
        code(grape::engine::read_only),
        help("Remote SPARQL endpoints cannot be loaded into. Use `--store-path` or an in-memory store.")
    )]
    ReadOnlyStore { store: String },
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum AgentError {
    #[error("illegal request state transition: {from} -> {to}")]
    #[diagnostic(
        code(grape::agent::illegal_transition),
        help("Requests move Received -> ResolvingConcepts -> work states -> Narrating -> Answered.")
    )]
    IllegalTransition { from: String, to: String },
}

/// Convenience alias for functions returning grape-reason results.
pub type GrapeResult<T> = std::result::Result<T, GrapeError>;
