//! Federation across knowledge graphs.
//!
//! Remote graphs are registered by name in an [`EndpointRegistry`]. A
//! [`FederatedQuery`] runs one pattern group locally and one remotely, in
//! parallel, then merges the rows on a join variable. Values join when they are
//! identical or linked by `owl:sameAs` / `skos:exactMatch` in either store.
//! Remote rows without a local partner are kept, never dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FederationError, QueryError};
use crate::graph::executor::{QueryExecutor, RetryPolicy};
use crate::graph::neighborhood::NeighborhoodExpander;
use crate::graph::path::Path;
use crate::graph::query::{Filter, Pattern, Query, Row, Term};
use crate::graph::sparql::{GraphStore, HttpSparqlStore, OxigraphStore};
use crate::graph::traverse::{ExplorerConfig, PathExplorer};
use crate::graph::{Entity, vocab};

/// Where a named endpoint lives.
#[derive(Clone)]
pub enum EndpointDescriptor {
    /// A SPARQL 1.1 protocol endpoint.
    Sparql { url: String, timeout_secs: u64 },
    /// An embedded store persisted at a path.
    Oxigraph { path: PathBuf },
    /// A store already open in this process.
    InProcess(Arc<dyn GraphStore>),
}

impl EndpointDescriptor {
    fn open(&self, name: &str) -> Result<Arc<dyn GraphStore>, FederationError> {
        match self {
            Self::Sparql { url, timeout_secs } => Ok(Arc::new(HttpSparqlStore::new(
                url.clone(),
                Duration::from_secs(*timeout_secs),
            ))),
            Self::Oxigraph { path } => OxigraphStore::open(path)
                .map(|s| Arc::new(s.named(name)) as Arc<dyn GraphStore>)
                .map_err(|e| FederationError::Descriptor {
                    name: name.to_string(),
                    message: e.to_string(),
                }),
            Self::InProcess(store) => Ok(Arc::clone(store)),
        }
    }
}

impl std::fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sparql { url, timeout_secs } => f
                .debug_struct("Sparql")
                .field("url", url)
                .field("timeout_secs", timeout_secs)
                .finish(),
            Self::Oxigraph { path } => f.debug_struct("Oxigraph").field("path", path).finish(),
            Self::InProcess(store) => f.debug_tuple("InProcess").field(&store.name()).finish(),
        }
    }
}

impl std::fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sparql { url, .. } => write!(f, "sparql {url}"),
            Self::Oxigraph { path } => write!(f, "oxigraph {}", path.display()),
            Self::InProcess(store) => write!(f, "in-process {}", store.name()),
        }
    }
}

#[derive(Clone)]
struct Registered {
    descriptor: String,
    store: Arc<dyn GraphStore>,
}

/// Name → open endpoint. Copy-on-write: readers take an `Arc` snapshot.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<Arc<HashMap<String, Registered>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<HashMap<String, Registered>> {
        match self.endpoints.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Apply `edit` to a copy of the map and publish it, all under the write lock.
    fn update<R>(&self, edit: impl FnOnce(&mut HashMap<String, Registered>) -> R) -> R {
        let mut guard = match self.endpoints.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (**guard).clone();
        let out = edit(&mut next);
        *guard = Arc::new(next);
        out
    }

    /// Register or replace `name`. Re-registering the same descriptor is a no-op in effect.
    pub fn register(&self, name: &str, descriptor: EndpointDescriptor) -> Result<(), FederationError> {
        let store = descriptor.open(name)?;
        let entry = Registered {
            descriptor: descriptor.to_string(),
            store,
        };
        self.update(|map| map.insert(name.to_string(), entry));
        tracing::info!(endpoint = name, %descriptor, "registered endpoint");
        Ok(())
    }

    /// Remove `name`; returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        if !self.contains(name) {
            return false;
        }
        self.update(|map| map.remove(name).is_some())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn GraphStore>, FederationError> {
        self.snapshot()
            .get(name)
            .map(|r| Arc::clone(&r.store))
            .ok_or_else(|| FederationError::UnknownEndpoint {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    /// `(name, descriptor)` pairs, sorted by name.
    pub fn describe(&self) -> Vec<(String, String)> {
        let snapshot = self.snapshot();
        let mut out: Vec<(String, String)> = snapshot
            .iter()
            .map(|(n, r)| (n.clone(), r.descriptor.clone()))
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.names())
            .finish()
    }
}

/// A local and a remote pattern group joined on one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedQuery {
    pub local: Vec<Pattern>,
    pub remote_name: String,
    pub remote: Vec<Pattern>,
    /// Join variable, with or without `?`.
    pub join_var: String,
}

/// Why two rows were joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinVia {
    Identical,
    /// An `owl:sameAs` or `skos:exactMatch` link between the join values.
    Equivalence,
}

/// One merged result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergedRow {
    Joined { local: Row, remote: Row, via: JoinVia },
    LocalOnly { local: Row },
    RemoteOnly { remote: Row },
}

impl MergedRow {
    /// All bindings in one row; local bindings win on name clashes.
    pub fn combined(&self) -> Row {
        match self {
            Self::Joined { local, remote, .. } => {
                let mut row = local.clone();
                row.extend_from(remote);
                row
            }
            Self::LocalOnly { local } => local.clone(),
            Self::RemoteOnly { remote } => remote.clone(),
        }
    }

    pub fn remote(&self) -> Option<&Row> {
        match self {
            Self::Joined { remote, .. } | Self::RemoteOnly { remote } => Some(remote),
            Self::LocalOnly { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedResult {
    pub rows: Vec<MergedRow>,
    pub local_rows: usize,
    pub remote_rows: usize,
    /// `(local value, remote value)` equivalence links used for joining.
    pub links: Vec<(String, String)>,
}

/// Which store asserted an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentSource {
    Local,
    Remote,
}

/// An entity considered the same as (or close to) another across graphs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alignment {
    pub entity: Entity,
    pub aligned: Entity,
    /// `owl:sameAs`, `skos:exactMatch` or `skos:closeMatch`.
    pub property: Entity,
    pub found_in: AlignmentSource,
    pub remote: String,
}

/// A path found in a bridge graph, reached through an alignment of the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossGraphPath {
    pub source: Entity,
    pub alignment: Alignment,
    pub bridge: String,
    pub path: Path,
}

const ALIGNMENT_PROPERTIES: [&str; 3] = [
    vocab::OWL_SAME_AS,
    vocab::SKOS_EXACT_MATCH,
    vocab::SKOS_CLOSE_MATCH,
];

/// Runs queries across the local store and registered endpoints.
#[derive(Debug, Clone)]
pub struct FederatedConnector {
    local: QueryExecutor,
    registry: Arc<EndpointRegistry>,
    policy: RetryPolicy,
    row_limit: usize,
    /// Aligned entities tried per cross-graph search.
    max_alignments: usize,
}

impl FederatedConnector {
    pub fn new(local: QueryExecutor, registry: Arc<EndpointRegistry>) -> Self {
        let policy = *local.policy();
        Self {
            local,
            registry,
            policy,
            row_limit: 100,
            max_alignments: 5,
        }
    }

    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = limit;
        self
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn register(&self, name: &str, descriptor: EndpointDescriptor) -> Result<(), FederationError> {
        self.registry.register(name, descriptor)
    }

    /// An executor for `name` sharing this request's cancellation and retry policy.
    pub fn remote_executor(&self, name: &str) -> Result<QueryExecutor, FederationError> {
        let store = self.registry.get(name)?;
        Ok(QueryExecutor::new(store)
            .with_policy(self.policy)
            .with_cancel(self.local.cancel_token().clone()))
    }

    pub fn federated_query(&self, request: &FederatedQuery) -> Result<FederatedResult, FederationError> {
        let remote = self.remote_executor(&request.remote_name)?;
        let join = request.join_var.trim_start_matches('?').to_string();

        let local_query = Query::select_all()
            .patterns(request.local.iter().cloned())
            .limit(self.row_limit);
        let remote_query = Query::select_all()
            .patterns(request.remote.iter().cloned())
            .limit(self.row_limit);
        let (local_rows, remote_rows) = rayon::join(
            || self.local.execute(&local_query),
            || remote.execute(&remote_query),
        );
        let (local_rows, remote_rows) = (local_rows?, remote_rows?);

        let local_iris: BTreeSet<String> = join_iris(&local_rows, &join);
        let remote_iris: BTreeSet<String> = join_iris(&remote_rows, &join);
        let links = if local_iris.is_empty() || remote_iris.is_empty() {
            BTreeSet::new()
        } else {
            let (a, b) = rayon::join(
                || equivalence_links(&self.local, &local_iris, &remote_iris),
                || equivalence_links(&remote, &local_iris, &remote_iris),
            );
            let mut links = a?;
            links.extend(b?);
            links
        };

        let rows = merge(&local_rows, &remote_rows, &join, &links);
        tracing::info!(
            remote = %request.remote_name,
            local_rows = local_rows.len(),
            remote_rows = remote_rows.len(),
            links = links.len(),
            merged = rows.len(),
            "federated query"
        );
        Ok(FederatedResult {
            rows,
            local_rows: local_rows.len(),
            remote_rows: remote_rows.len(),
            links: links.into_iter().collect(),
        })
    }

    /// Entities aligned with `entity` via `owl:sameAs`, `skos:exactMatch` or
    /// `skos:closeMatch`, asserted in either store and in either direction.
    pub fn find_alignments(
        &self,
        entity: &Entity,
        remote_name: &str,
    ) -> Result<Vec<Alignment>, FederationError> {
        let remote = self.remote_executor(remote_name)?;
        let (local_hits, remote_hits) = rayon::join(
            || alignments_in(&self.local, entity),
            || alignments_in(&remote, entity),
        );

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (source, hits) in [
            (AlignmentSource::Local, local_hits?),
            (AlignmentSource::Remote, remote_hits?),
        ] {
            for (aligned, property) in hits {
                if seen.insert((aligned.iri.clone(), property.iri.clone(), source)) {
                    out.push(Alignment {
                        entity: entity.clone(),
                        aligned,
                        property,
                        found_in: source,
                        remote: remote_name.to_string(),
                    });
                }
            }
        }
        tracing::debug!(entity = %entity.iri, remote = remote_name, alignments = out.len(), "alignments");
        Ok(out)
    }

    /// Paths inside the `bridge` graph from an entity aligned with `source` to
    /// `target` (or to an entity aligned with `target`).
    pub fn cross_graph_paths(
        &self,
        source: &Entity,
        target: &Entity,
        bridge: &str,
        max_hops: usize,
    ) -> Result<Vec<CrossGraphPath>, FederationError> {
        let source_alignments = self.find_alignments(source, bridge)?;
        if source_alignments.is_empty() {
            tracing::info!(source = %source.iri, bridge, "no alignments for cross-graph search");
            return Ok(Vec::new());
        }

        let mut targets = vec![target.clone()];
        for a in self.find_alignments(target, bridge)? {
            if !targets.contains(&a.aligned) {
                targets.push(a.aligned);
            }
        }

        let explorer = PathExplorer::new(
            NeighborhoodExpander::new(self.remote_executor(bridge)?),
            ExplorerConfig::default(),
        );

        let mut tried = HashSet::new();
        let mut out = Vec::new();
        for alignment in source_alignments {
            if !tried.insert(alignment.aligned.iri.clone()) {
                continue;
            }
            if tried.len() > self.max_alignments {
                break;
            }
            for t in &targets {
                for path in explorer.find_paths(&alignment.aligned, t, max_hops)? {
                    out.push(CrossGraphPath {
                        source: source.clone(),
                        alignment: alignment.clone(),
                        bridge: bridge.to_string(),
                        path,
                    });
                }
            }
        }
        Ok(out)
    }
}

fn join_iris(rows: &[Row], join: &str) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|r| r.iri(join))
        .map(str::to_string)
        .collect()
}

/// `(local, remote)` pairs linked by `owl:sameAs` or `skos:exactMatch` in either direction.
fn equivalence_links(
    executor: &QueryExecutor,
    local: &BTreeSet<String>,
    remote: &BTreeSet<String>,
) -> Result<BTreeSet<(String, String)>, QueryError> {
    let link = |s: &str, p: &str, o: &str| vec![Pattern::triple(Term::var(s), Term::iri(p), Term::var(o))];
    let query = Query::select(["a", "b"])
        .distinct()
        .pattern(Pattern::values("a", local.iter().cloned()))
        .pattern(Pattern::values("b", remote.iter().cloned()))
        .pattern(Pattern::Union(vec![
            link("a", vocab::OWL_SAME_AS, "b"),
            link("b", vocab::OWL_SAME_AS, "a"),
            link("a", vocab::SKOS_EXACT_MATCH, "b"),
            link("b", vocab::SKOS_EXACT_MATCH, "a"),
        ]));
    Ok(executor
        .execute(&query)?
        .iter()
        .filter_map(|r| Some((r.iri("a")?.to_string(), r.iri("b")?.to_string())))
        .collect())
}

fn alignments_in(executor: &QueryExecutor, entity: &Entity) -> Result<Vec<(Entity, Entity)>, QueryError> {
    let query = Query::select(["aligned", "prop"])
        .distinct()
        .pattern(Pattern::values(
            "prop",
            ALIGNMENT_PROPERTIES.iter().map(|p| p.to_string()),
        ))
        .pattern(Pattern::Union(vec![
            vec![Pattern::triple(
                Term::iri(&entity.iri),
                Term::var("prop"),
                Term::var("aligned"),
            )],
            vec![Pattern::triple(
                Term::var("aligned"),
                Term::var("prop"),
                Term::iri(&entity.iri),
            )],
        ]))
        .filter(Filter::IsIri("aligned".into()));
    Ok(executor
        .execute(&query)?
        .iter()
        .filter_map(|r| Some((Entity::new(r.iri("aligned")?), Entity::new(r.iri("prop")?))))
        .filter(|(aligned, _)| aligned != entity)
        .collect())
}

/// Join every remote row with each local row whose join value is identical or
/// linked. Remote rows come first in remote order, then unpartnered local rows.
fn merge(
    local: &[Row],
    remote: &[Row],
    join: &str,
    links: &BTreeSet<(String, String)>,
) -> Vec<MergedRow> {
    let mut used_local = vec![false; local.len()];
    let mut rows = Vec::with_capacity(remote.len() + local.len());

    for r in remote {
        let r_val = r.text(join);
        let mut partnered = false;
        for (i, l) in local.iter().enumerate() {
            let l_val = l.text(join);
            let via = match (l_val, r_val) {
                (Some(a), Some(b)) if a == b => Some(JoinVia::Identical),
                (Some(a), Some(b)) if links.contains(&(a.to_string(), b.to_string())) => {
                    Some(JoinVia::Equivalence)
                }
                _ => None,
            };
            if let Some(via) = via {
                partnered = true;
                used_local[i] = true;
                rows.push(MergedRow::Joined {
                    local: l.clone(),
                    remote: r.clone(),
                    via,
                });
            }
        }
        if !partnered {
            rows.push(MergedRow::RemoteOnly { remote: r.clone() });
        }
    }

    rows.extend(
        local
            .iter()
            .zip(used_local)
            .filter(|(_, used)| !used)
            .map(|(l, _)| MergedRow::LocalOnly { local: l.clone() }),
    );
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::query::Value;

    const LOCAL: &str = r#"
        @prefix ex: <http://local.org/> .
        @prefix owl: <http://www.w3.org/2002/07/owl#> .
        ex:aspirin a ex:Drug ; owl:sameAs <http://remote.org/D001> .
        ex:ibuprofen a ex:Drug .
        ex:paracetamol a ex:Drug .
    "#;

    const REMOTE: &str = r#"
        @prefix r: <http://remote.org/> .
        @prefix skos: <http://www.w3.org/2004/02/skos/core#> .
        r:D001 r:approvedIn "1899" .
        r:D002 r:approvedIn "1961" ; skos:exactMatch <http://local.org/ibuprofen> .
        r:D003 r:approvedIn "2001" .
        r:D001 r:inhibits r:COX1 .
        r:COX1 r:partOf r:Prostaglandin .
    "#;

    fn store(ttl: &str) -> Arc<OxigraphStore> {
        let s = OxigraphStore::in_memory().unwrap();
        s.load_turtle(ttl).unwrap();
        Arc::new(s)
    }

    #[test]
    fn concurrent_registrations_are_all_kept() {
        let registry = EndpointRegistry::new();
        let shared = store(REMOTE);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let registry = &registry;
                let shared = &shared;
                scope.spawn(move || {
                    for i in 0..200 {
                        let descriptor = EndpointDescriptor::InProcess(shared.clone());
                        registry.register(&format!("ep-{t}-{i}"), descriptor).unwrap();
                    }
                });
            }
        });
        assert_eq!(registry.names().len(), 1600);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let registry = &registry;
                scope.spawn(move || {
                    for i in 0..200 {
                        assert!(registry.unregister(&format!("ep-{t}-{i}")));
                    }
                });
            }
        });
        assert_eq!(registry.names().len(), 800);
        assert!(registry.contains("ep-7-199"));
        assert!(!registry.contains("ep-0-0"));
    }

    fn connector() -> FederatedConnector {
        let registry = Arc::new(EndpointRegistry::new());
        registry
            .register("remote", EndpointDescriptor::InProcess(store(REMOTE)))
            .unwrap();
        FederatedConnector::new(QueryExecutor::new(store(LOCAL)), registry)
    }

    fn request() -> FederatedQuery {
        FederatedQuery {
            local: vec![Pattern::triple(
                Term::var("drug"),
                Term::iri(vocab::RDF_TYPE),
                Term::iri("http://local.org/Drug"),
            )],
            remote_name: "remote".into(),
            remote: vec![Pattern::triple(
                Term::var("drug"),
                Term::iri("http://remote.org/approvedIn"),
                Term::var("year"),
            )],
            join_var: "?drug".into(),
        }
    }

    #[test]
    fn unknown_endpoint_fails_fast() {
        let mut req = request();
        req.remote_name = "nowhere".into();
        assert!(matches!(
            connector().federated_query(&req),
            Err(FederationError::UnknownEndpoint { .. })
        ));
    }

    #[test]
    fn joins_through_equivalence_links_from_both_stores() {
        let result = connector().federated_query(&request()).unwrap();
        assert_eq!(result.remote_rows, 3);
        assert_eq!(result.links.len(), 2);

        let joined: Vec<&MergedRow> = result
            .rows
            .iter()
            .filter(|r| matches!(r, MergedRow::Joined { .. }))
            .collect();
        assert_eq!(joined.len(), 2);
        assert!(result.rows.iter().any(|r| matches!(
            r,
            MergedRow::LocalOnly { local } if local.iri("drug") == Some("http://local.org/paracetamol")
        )));
    }

    #[test]
    fn remote_rows_are_never_dropped() {
        let result = connector().federated_query(&request()).unwrap();
        let remote_seen = result.rows.iter().filter_map(MergedRow::remote).count();
        assert_eq!(remote_seen, result.remote_rows);
        assert!(result.rows.iter().any(|r| matches!(r, MergedRow::RemoteOnly { .. })));
    }

    #[test]
    fn identical_values_join_without_links() {
        let local = vec![Row::new().with("x", Value::iri("http://a"))];
        let remote = vec![
            Row::new().with("x", Value::iri("http://a")),
            Row::new().with("x", Value::iri("http://b")),
        ];
        let rows = merge(&local, &remote, "x", &BTreeSet::new());
        assert!(matches!(rows[0], MergedRow::Joined { via: JoinVia::Identical, .. }));
        assert!(matches!(rows[1], MergedRow::RemoteOnly { .. }));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn register_replaces_existing_name() {
        let c = connector();
        c.register("remote", EndpointDescriptor::InProcess(store(LOCAL)))
            .unwrap();
        assert_eq!(c.registry().len(), 1);
        assert!(c.registry().describe()[0].1.starts_with("in-process"));
    }

    #[test]
    fn alignments_from_local_store() {
        let aligned = connector()
            .find_alignments(&Entity::new("http://local.org/aspirin"), "remote")
            .unwrap();
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].aligned.iri, "http://remote.org/D001");
        assert_eq!(aligned[0].found_in, AlignmentSource::Local);
        assert_eq!(aligned[0].property.iri, vocab::OWL_SAME_AS);
    }

    #[test]
    fn alignments_from_remote_store() {
        let aligned = connector()
            .find_alignments(&Entity::new("http://local.org/ibuprofen"), "remote")
            .unwrap();
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].aligned.iri, "http://remote.org/D002");
        assert_eq!(aligned[0].found_in, AlignmentSource::Remote);
    }

    #[test]
    fn cross_graph_path_through_bridge() {
        let paths = connector()
            .cross_graph_paths(
                &Entity::new("http://local.org/aspirin"),
                &Entity::new("http://remote.org/Prostaglandin"),
                "remote",
                3,
            )
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path.len(), 2);
        assert_eq!(paths[0].alignment.aligned.iri, "http://remote.org/D001");
    }
}
