//! Graph stores: the queryable endpoint the reasoning core runs against.
//!
//! Two implementations of [`GraphStore`]:
//!
//! - [`OxigraphStore`]: embedded oxigraph, in memory or persisted on disk
//! - [`HttpSparqlStore`]: a remote SPARQL 1.1 protocol endpoint (JSON results)

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use oxigraph::io::RdfFormat;
use oxigraph::model::Term as OxTerm;
use oxigraph::sparql::{QueryResults as OxResults, SparqlEvaluator};
use oxigraph::store::Store;
use serde::Deserialize;

use crate::error::{QueryError, StoreError};

use super::query::{Query, QueryResults, Row, Value};

/// Anything that can execute a structured query.
///
/// Implementations report syntax errors as [`QueryError::Malformed`] and
/// network-class failures as `Timeout` / `StoreUnavailable`; they never retry.
/// Retrying is the executor's job.
pub trait GraphStore: Send + Sync {
    /// Execute one query.
    fn execute(&self, query: &Query) -> Result<QueryResults, QueryError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "store"
    }
}

// ---------------------------------------------------------------------------
// Embedded oxigraph
// ---------------------------------------------------------------------------

/// Embedded SPARQL-capable RDF store.
pub struct OxigraphStore {
    store: Store,
    name: String,
}

impl OxigraphStore {
    /// Create a new in-memory store (no persistence).
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Store::new().map_err(|e| StoreError::Open {
            path: ":memory:".into(),
            message: e.to_string(),
        })?;
        Ok(Self {
            store,
            name: "memory".into(),
        })
    }

    /// Open or create a persistent store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path).map_err(|source| StoreError::Io { source })?;
        let store = Store::open(path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            store,
            name: path.display().to_string(),
        })
    }

    /// Rename the store for log output.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parse a Turtle document into the default graph.
    pub fn load_turtle(&self, data: &str) -> Result<(), StoreError> {
        self.store
            .load_from_reader(RdfFormat::Turtle, data.as_bytes())
            .map_err(|e| StoreError::Load {
                message: e.to_string(),
            })
    }

    /// Load an RDF file, picking the syntax from its extension
    /// (`ttl`, `nt`, `nq`, `trig`, `rdf`, `n3`). Unknown extensions are read as Turtle.
    pub fn load_file(&self, path: &Path) -> Result<(), StoreError> {
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(RdfFormat::from_extension)
            .unwrap_or(RdfFormat::Turtle);
        let file = std::fs::File::open(path).map_err(|source| StoreError::Io { source })?;
        self.store
            .load_from_reader(format, std::io::BufReader::new(file))
            .map_err(|e| StoreError::Load {
                message: format!("{}: {e}", path.display()),
            })
    }

    /// Number of quads in the store.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.store.len().map_err(|e| StoreError::Load {
            message: format!("failed to count quads: {e}"),
        })
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|n| n == 0)
    }

    /// Execute SPARQL text directly.
    ///
    /// The text is parsed before evaluation so syntax errors surface as
    /// [`QueryError::Malformed`] and are never retried.
    pub fn execute_sparql(&self, sparql: &str) -> Result<QueryResults, QueryError> {
        let prepared = SparqlEvaluator::new()
            .parse_query(sparql)
            .map_err(|e| QueryError::Malformed {
                message: e.to_string(),
            })?;
        let results = prepared
            .on_store(&self.store)
            .execute()
            .map_err(|e| QueryError::StoreUnavailable {
                message: e.to_string(),
            })?;

        match results {
            OxResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| QueryError::StoreUnavailable {
                        message: format!("solution error: {e}"),
                    })?;
                    let row: Row = solution
                        .iter()
                        .map(|(var, term)| (var.as_str().to_string(), term_to_value(term)))
                        .collect();
                    rows.push(row);
                }
                Ok(QueryResults::Solutions(rows))
            }
            OxResults::Boolean(b) => Ok(QueryResults::Boolean(b)),
            OxResults::Graph(_) => Err(QueryError::UnexpectedResult {
                expected: "solutions or boolean",
            }),
        }
    }

    /// Get internal store reference (for advanced oxigraph operations).
    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl GraphStore for OxigraphStore {
    fn execute(&self, query: &Query) -> Result<QueryResults, QueryError> {
        self.execute_sparql(&query.to_sparql())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for OxigraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OxigraphStore")
            .field("name", &self.name)
            .finish()
    }
}

fn term_to_value(term: &OxTerm) -> Value {
    match term {
        OxTerm::NamedNode(n) => Value::iri(n.as_str()),
        OxTerm::BlankNode(b) => Value::Blank {
            value: b.as_str().to_string(),
        },
        OxTerm::Literal(l) => Value::Literal {
            value: l.value().to_string(),
            language: l.language().map(str::to_string),
            datatype: Some(l.datatype().as_str().to_string()),
        },
        #[allow(unreachable_patterns)]
        other => Value::literal(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Remote SPARQL endpoint
// ---------------------------------------------------------------------------

/// Maximum number of body bytes quoted back in error messages.
const ERROR_PREVIEW: usize = 300;

/// A remote SPARQL 1.1 protocol endpoint queried with HTTP POST.
pub struct HttpSparqlStore {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpSparqlStore {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("grape-reason/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            endpoint: endpoint.into(),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GraphStore for HttpSparqlStore {
    fn execute(&self, query: &Query) -> Result<QueryResults, QueryError> {
        let sparql = query.to_sparql();
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Accept", "application/sparql-results+json")
            .send_form(&[("query", sparql.as_str())]);

        match response {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|e| QueryError::StoreUnavailable {
                        message: format!("failed to read response body: {e}"),
                    })?;
                parse_results_json(&body)
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let preview: String = body.chars().take(ERROR_PREVIEW).collect();
                Err(classify_status(code, preview))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(classify_transport(transport.kind(), transport.to_string()))
            }
        }
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpSparqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSparqlStore")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Map an HTTP error status onto the failure taxonomy.
///
/// Only 408, 429 and 5xx are transient. Any other client error is final.
fn classify_status(code: u16, body: String) -> QueryError {
    let message = format!("HTTP {code}: {body}");
    match code {
        400 => QueryError::Malformed { message },
        408 | 504 => QueryError::Timeout { message },
        429 | 500..=599 => QueryError::StoreUnavailable { message },
        _ => QueryError::Rejected { message },
    }
}

/// Map a transport failure onto the failure taxonomy.
///
/// A bad URL or scheme cannot succeed on retry; connection-level trouble can.
fn classify_transport(kind: ureq::ErrorKind, message: String) -> QueryError {
    use ureq::ErrorKind;
    match kind {
        ErrorKind::InvalidUrl
        | ErrorKind::UnknownScheme
        | ErrorKind::InvalidProxyUrl
        | ErrorKind::InsecureRequestHttpsOnly
        | ErrorKind::TooManyRedirects
        | ErrorKind::ProxyUnauthorized => QueryError::Rejected { message },
        ErrorKind::Io if message.contains("timed out") => QueryError::Timeout { message },
        _ => QueryError::StoreUnavailable { message },
    }
}

#[derive(Deserialize)]
struct SparqlJson {
    #[serde(default)]
    results: Option<SparqlJsonBindings>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Deserialize)]
struct SparqlJsonBindings {
    bindings: Vec<BTreeMap<String, SparqlJsonTerm>>,
}

#[derive(Deserialize)]
struct SparqlJsonTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(rename = "xml:lang", default)]
    lang: Option<String>,
    #[serde(default)]
    datatype: Option<String>,
}

/// Parse an `application/sparql-results+json` document.
pub fn parse_results_json(body: &str) -> Result<QueryResults, QueryError> {
    let parsed: SparqlJson =
        serde_json::from_str(body).map_err(|e| QueryError::Rejected {
            message: format!("invalid SPARQL JSON results: {e}"),
        })?;

    if let Some(b) = parsed.boolean {
        return Ok(QueryResults::Boolean(b));
    }
    let Some(results) = parsed.results else {
        return Err(QueryError::UnexpectedResult {
            expected: "`results` or `boolean` member",
        });
    };

    let rows = results
        .bindings
        .into_iter()
        .map(|binding| {
            binding
                .into_iter()
                .map(|(var, term)| {
                    let value = match term.kind.as_str() {
                        "uri" => Value::Iri { value: term.value },
                        "bnode" => Value::Blank { value: term.value },
                        _ => Value::Literal {
                            value: term.value,
                            language: term.lang,
                            datatype: term.datatype,
                        },
                    };
                    (var, value)
                })
                .collect::<Row>()
        })
        .collect();
    Ok(QueryResults::Solutions(rows))
}
