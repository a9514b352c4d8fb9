//! Reasoning narration: turn a request's operation trace into a [`ReasoningPath`].
//!
//! Every operation the orchestrator runs is recorded in a [`Trace`] under a
//! sequence number reserved when the operation is *dispatched*, so concurrent
//! work narrates in logical order regardless of completion order. Narration is
//! a pure function of the trace: one step per operation, nothing summarized out,
//! nodes and edges deduplicated by identity in first-seen order.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::agent::Scenario;
use crate::concept::Resolution;
use crate::exemplar::RankedExample;
use crate::federation::{Alignment, FederatedResult, MergedRow};
use crate::graph::neighborhood::Neighborhood;
use crate::graph::path::Path;
use crate::graph::schema::SchemaContext;
use crate::graph::traverse::Reached;
use crate::graph::{Entity, Relation, vocab};
use crate::proof::{Evidence, Validation};

/// One graph operation and what it produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOp {
    Classify {
        scenario: Scenario,
    },
    Scope {
        context: Vec<Entity>,
        allowed: usize,
    },
    Resolve {
        fragment: String,
        resolution: Resolution,
    },
    Expand {
        neighborhood: Neighborhood,
    },
    FindPaths {
        source: Entity,
        target: Entity,
        max_hops: usize,
        paths: Vec<Path>,
    },
    Reach {
        source: Entity,
        max_hops: usize,
        reached: Vec<Reached>,
    },
    Schema {
        context: SchemaContext,
    },
    Examples {
        examples: Vec<RankedExample>,
    },
    Federate {
        remote: String,
        result: FederatedResult,
    },
    Align {
        entity: Entity,
        remote: String,
        alignments: Vec<Alignment>,
    },
    Validate {
        validation: Validation,
    },
    /// An operation that did not complete.
    Failed {
        operation: String,
        error: String,
    },
}

impl TraceOp {
    /// Short operation name used in narrated steps.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Classify { .. } => "classify",
            Self::Scope { .. } => "scope",
            Self::Resolve { .. } => "resolve",
            Self::Expand { .. } => "expand",
            Self::FindPaths { .. } => "find_paths",
            Self::Reach { .. } => "reach",
            Self::Schema { .. } => "schema",
            Self::Examples { .. } => "examples",
            Self::Federate { .. } => "federate",
            Self::Align { .. } => "align",
            Self::Validate { .. } => "validate",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub seq: u64,
    pub op: TraceOp,
}

/// Request-local, append-only operation log.
#[derive(Debug, Default)]
pub struct Trace {
    next: AtomicU64,
    entries: Mutex<Vec<TraceEntry>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the sequence number for an operation about to start.
    pub fn dispatch(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Record the outcome of a dispatched operation.
    pub fn record(&self, seq: u64, op: TraceOp) {
        let entry = TraceEntry { seq, op };
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    /// Dispatch and record in one go, for operations with no concurrent siblings.
    pub fn push(&self, op: TraceOp) -> u64 {
        let seq = self.dispatch();
        self.record(seq, op);
        seq
    }

    /// Entries in dispatch order.
    pub fn entries(&self) -> Vec<TraceEntry> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One narrated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub seq: u64,
    pub operation: String,
    pub description: String,
    /// Every item the operation produced, one line each.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// The traceable record of one question-answer cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPath {
    pub nodes: Vec<Entity>,
    pub edges: Vec<Relation>,
    pub steps: Vec<ReasoningStep>,
    pub answer: String,
}

/// Deduplicating node/edge accumulator preserving first-seen order.
#[derive(Default)]
struct GraphAccumulator {
    nodes: Vec<Entity>,
    node_index: HashMap<String, usize>,
    edges: Vec<Relation>,
    edge_index: HashMap<(String, String, String), usize>,
}

impl GraphAccumulator {
    fn node(&mut self, entity: &Entity) {
        match self.node_index.get(&entity.iri) {
            Some(&i) => self.nodes[i].merge_label(entity),
            None => {
                self.node_index.insert(entity.iri.clone(), self.nodes.len());
                self.nodes.push(entity.clone());
            }
        }
    }

    fn edge(&mut self, relation: &Relation) {
        self.node(&relation.source);
        self.node(&relation.target);
        let key = (
            relation.source.iri.clone(),
            relation.predicate.iri.clone(),
            relation.target.iri.clone(),
        );
        if !self.edge_index.contains_key(&key) {
            self.edge_index.insert(key, self.edges.len());
            self.edges.push(relation.clone());
        }
    }

    fn path(&mut self, path: &Path) {
        self.node(path.start());
        for relation in path.relations() {
            self.edge(relation);
        }
    }
}

/// Turns traces into reasoning paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasoningNarrator;

impl ReasoningNarrator {
    pub fn narrate(&self, trace: &Trace, answer: impl Into<String>) -> ReasoningPath {
        let mut graph = GraphAccumulator::default();
        let mut steps = Vec::new();

        for entry in trace.entries() {
            collect(&mut graph, &entry.op);
            let (description, details) = describe(&entry.op);
            steps.push(ReasoningStep {
                seq: entry.seq,
                operation: entry.op.name().to_string(),
                description,
                details,
            });
        }

        ReasoningPath {
            nodes: graph.nodes,
            edges: graph.edges,
            steps,
            answer: answer.into(),
        }
    }

    /// Plain-text rendering: numbered steps, then the answer.
    pub fn summary(&self, path: &ReasoningPath) -> String {
        let mut out = format!(
            "Reasoning over {} entities and {} relations in {} steps:\n",
            path.nodes.len(),
            path.edges.len(),
            path.steps.len()
        );
        for (i, step) in path.steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step.description));
            for detail in &step.details {
                out.push_str(&format!("   - {detail}\n"));
            }
        }
        out.push_str(&format!("Answer: {}", path.answer));
        out
    }

    /// The most frequent relation, the most connected entity and overall counts.
    pub fn key_insights(&self, path: &ReasoningPath) -> Vec<String> {
        let mut insights = Vec::new();

        let mut predicates: Vec<(&Entity, usize)> = Vec::new();
        for edge in &path.edges {
            match predicates.iter_mut().find(|(p, _)| *p == &edge.predicate) {
                Some((_, n)) => *n += 1,
                None => predicates.push((&edge.predicate, 1)),
            }
        }
        // max_by_key keeps the last maximum; iterate reversed to keep the first.
        if let Some((predicate, count)) = predicates.iter().rev().max_by_key(|(_, n)| *n) {
            insights.push(format!("Most frequent relation: {predicate} ({count} edges)"));
        }

        let mut degree: Vec<(&Entity, usize)> = path.nodes.iter().map(|n| (n, 0)).collect();
        for edge in &path.edges {
            for (node, d) in degree.iter_mut() {
                if *node == &edge.source || *node == &edge.target {
                    *d += 1;
                }
            }
        }
        if let Some((node, d)) = degree.iter().rev().filter(|(_, d)| *d > 0).max_by_key(|(_, d)| *d) {
            insights.push(format!("Most connected entity: {node} ({d} relations)"));
        }

        insights.push(format!(
            "{} entities and {} relations touched across {} steps",
            path.nodes.len(),
            path.edges.len(),
            path.steps.len()
        ));
        insights
    }
}

fn collect(graph: &mut GraphAccumulator, op: &TraceOp) {
    match op {
        TraceOp::Classify { .. } | TraceOp::Examples { .. } | TraceOp::Failed { .. } => {}
        TraceOp::Scope { context, .. } => context.iter().for_each(|e| graph.node(e)),
        TraceOp::Resolve { resolution, .. } => {
            resolution.matches.iter().for_each(|m| graph.node(&m.entity))
        }
        TraceOp::Expand { neighborhood } => {
            neighborhood.nodes.iter().for_each(|n| graph.node(n));
            neighborhood.edges.iter().for_each(|e| graph.edge(e));
        }
        TraceOp::FindPaths {
            source,
            target,
            paths,
            ..
        } => {
            graph.node(source);
            graph.node(target);
            paths.iter().for_each(|p| graph.path(p));
        }
        TraceOp::Reach { reached, .. } => reached.iter().for_each(|r| graph.node(&r.entity)),
        TraceOp::Schema { context } => {
            context.classes.iter().for_each(|c| graph.node(c));
            let subclass_of = Entity::new(vocab::RDFS_SUBCLASS_OF).with_label("subClassOf");
            for (sub, sup) in &context.class_hierarchy {
                graph.edge(&Relation::new(sub.clone(), subclass_of.clone(), sup.clone()));
            }
            context.properties.iter().for_each(|p| graph.node(&p.property));
        }
        TraceOp::Federate { result, .. } => {
            for merged in &result.rows {
                let (local, remote) = match merged {
                    MergedRow::Joined { local, remote, .. } => (Some(local), Some(remote)),
                    MergedRow::LocalOnly { local } => (Some(local), None),
                    MergedRow::RemoteOnly { remote } => (None, Some(remote)),
                };
                for (_, value) in local.into_iter().chain(remote).flat_map(|row| row.iter()) {
                    if let Some(iri) = value.as_iri() {
                        graph.node(&Entity::new(iri));
                    }
                }
            }
            let same_as = Entity::new(vocab::OWL_SAME_AS).with_label("sameAs");
            for (local, remote) in &result.links {
                graph.edge(&Relation::new(
                    Entity::new(local.as_str()),
                    same_as.clone(),
                    Entity::new(remote.as_str()),
                ));
            }
        }
        TraceOp::Align { alignments, .. } => {
            for a in alignments {
                graph.edge(&Relation::new(
                    a.entity.clone(),
                    a.property.clone(),
                    a.aligned.clone(),
                ));
            }
        }
        TraceOp::Validate { validation } => {
            graph.node(&validation.subject);
            graph.node(&validation.object);
            match &validation.evidence {
                Evidence::Edge(relation) => graph.edge(relation),
                Evidence::Path(path) => graph.path(path),
                Evidence::None => {}
            }
        }
    }
}

fn describe(op: &TraceOp) -> (String, Vec<String>) {
    match op {
        TraceOp::Classify { scenario } => (format!("Classified question as {scenario}"), Vec::new()),
        TraceOp::Scope { context, allowed } => (
            format!(
                "Restricted the search to {allowed} entities around {} context entities",
                context.len()
            ),
            context.iter().map(|e| e.to_string()).collect(),
        ),
        TraceOp::Resolve {
            fragment,
            resolution,
        } => {
            let fallback = if resolution.lexical_fallback {
                " using substring matching"
            } else {
                ""
            };
            let description = match resolution.best() {
                Some(best) => format!(
                    "Resolved \"{fragment}\" to {} ({} match, confidence {:.2}){fallback}",
                    best.entity, best.source, best.confidence
                ),
                None => format!("Found no concept matching \"{fragment}\"{fallback}"),
            };
            let details = resolution
                .matches
                .iter()
                .map(|m| format!("{} <{}> {} {:.2}", m.entity, m.entity.iri, m.source, m.confidence))
                .collect();
            (description, details)
        }
        TraceOp::Expand { neighborhood } => (
            format!(
                "Expanded {}: {} relations to {} neighbors",
                neighborhood.center,
                neighborhood.edges.len(),
                neighborhood.neighbors().count()
            ),
            neighborhood.edges.iter().map(|e| e.to_string()).collect(),
        ),
        TraceOp::FindPaths {
            source,
            target,
            max_hops,
            paths,
        } => {
            let description = match paths.first() {
                Some(first) => format!(
                    "Found {} path(s) of length {} from {source} to {target}",
                    paths.len(),
                    first.len()
                ),
                None => format!("Found no path from {source} to {target} within {max_hops} hops"),
            };
            (description, paths.iter().map(|p| p.to_string()).collect())
        }
        TraceOp::Reach {
            source,
            max_hops,
            reached,
        } => (
            format!(
                "{} entities reachable from {source} within {max_hops} hops",
                reached.len().saturating_sub(1)
            ),
            reached
                .iter()
                .skip(1)
                .map(|r| format!("{} (depth {})", r.entity, r.depth))
                .collect(),
        ),
        TraceOp::Schema { context } => {
            let mut details: Vec<String> = context
                .class_hierarchy
                .iter()
                .map(|(sub, sup)| format!("{sub} subClassOf {sup}"))
                .collect();
            details.extend(context.properties.iter().map(|p| {
                format!("{}: domain {}, range {}", p.property, p.domain, p.range)
            }));
            (
                format!(
                    "Built schema context: {} classes, {} subclass links, {} properties",
                    context.classes.len(),
                    context.class_hierarchy.len(),
                    context.properties.len()
                ),
                details,
            )
        }
        TraceOp::Examples { examples } => (
            format!("Retrieved {} example queries", examples.len()),
            examples
                .iter()
                .map(|e| format!("{} (score {:.2})", e.question, e.score))
                .collect(),
        ),
        TraceOp::Federate { remote, result } => (
            format!(
                "Queried local store and {remote}: {} local rows, {} remote rows, {} equivalence links, {} merged rows",
                result.local_rows,
                result.remote_rows,
                result.links.len(),
                result.rows.len()
            ),
            result
                .links
                .iter()
                .map(|(l, r)| format!("<{l}> = <{r}>"))
                .collect(),
        ),
        TraceOp::Align {
            entity,
            remote,
            alignments,
        } => (
            format!("Found {} alignments for {entity} with {remote}", alignments.len()),
            alignments
                .iter()
                .map(|a| format!("{} -{}-> <{}>", a.entity, a.property, a.aligned.iri))
                .collect(),
        ),
        TraceOp::Validate { validation } => {
            let verdict = if validation.holds { "holds" } else { "is not supported" };
            (
                format!(
                    "Checked whether {} {} {}: {verdict}",
                    validation.subject, validation.predicate, validation.object
                ),
                validation.steps(),
            )
        }
        TraceOp::Failed { operation, error } => (format!("{operation} failed: {error}"), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{ConceptMatch, MatchSource};

    fn e(name: &str) -> Entity {
        Entity::new(format!("http://ex.org/{name}"))
    }

    fn rel(s: &str, p: &str, o: &str) -> Relation {
        Relation::new(e(s), e(p), e(o))
    }

    fn hood(center: &str, edges: Vec<Relation>) -> Neighborhood {
        let center = e(center);
        let mut nodes = vec![center.clone()];
        for edge in &edges {
            if let Some(other) = edge.other_end(&center) {
                if !nodes.contains(other) {
                    nodes.push(other.clone());
                }
            }
        }
        Neighborhood {
            center,
            nodes,
            edges,
        }
    }

    #[test]
    fn steps_follow_dispatch_order_not_completion_order() {
        let trace = Trace::new();
        let first = trace.dispatch();
        let second = trace.dispatch();
        trace.record(second, TraceOp::Expand {
            neighborhood: hood("Berlin", vec![]),
        });
        trace.record(first, TraceOp::Expand {
            neighborhood: hood("Paris", vec![]),
        });

        let path = ReasoningNarrator.narrate(&trace, "done");
        assert_eq!(path.steps.len(), 2);
        assert!(path.steps[0].description.starts_with("Expanded Paris"));
        assert!(path.steps[1].description.starts_with("Expanded Berlin"));
    }

    #[test]
    fn nodes_and_edges_are_deduplicated_first_seen() {
        let trace = Trace::new();
        trace.push(TraceOp::Expand {
            neighborhood: hood("Paris", vec![rel("Paris", "capitalOf", "France")]),
        });
        trace.push(TraceOp::Expand {
            neighborhood: hood("France", vec![
                rel("Paris", "capitalOf", "France"),
                rel("France", "memberOf", "EU"),
            ]),
        });

        let path = ReasoningNarrator.narrate(&trace, "");
        let iris: Vec<&str> = path.nodes.iter().map(|n| n.local_name()).collect();
        assert_eq!(iris, ["Paris", "France", "EU"]);
        assert_eq!(path.edges.len(), 2);
    }

    #[test]
    fn labels_merge_into_earlier_nodes() {
        let trace = Trace::new();
        trace.push(TraceOp::Scope {
            context: vec![e("Paris")],
            allowed: 1,
        });
        trace.push(TraceOp::Resolve {
            fragment: "paris".into(),
            resolution: Resolution {
                matches: vec![ConceptMatch {
                    entity: e("Paris").with_label("Paris, France"),
                    confidence: 1.0,
                    source: MatchSource::Exact,
                }],
                ..Default::default()
            },
        });
        let path = ReasoningNarrator.narrate(&trace, "");
        assert_eq!(path.nodes.len(), 1);
        assert_eq!(path.nodes[0].label.as_deref(), Some("Paris, France"));
        assert!(path.steps[1].description.contains("exact match, confidence 1.00"));
    }

    #[test]
    fn failed_operations_are_kept() {
        let trace = Trace::new();
        trace.push(TraceOp::Failed {
            operation: "expand".into(),
            error: "store unavailable".into(),
        });
        let path = ReasoningNarrator.narrate(&trace, "No answer found in the knowledge graph: store unavailable");
        assert_eq!(path.steps.len(), 1);
        assert_eq!(path.steps[0].operation, "failed");
        assert_eq!(path.steps[0].description, "expand failed: store unavailable");
    }

    #[test]
    fn path_evidence_contributes_edges() {
        let path = Path::from_relations(e("DrugX"), [
            rel("DrugX", "inhibits", "ProteinP"),
            rel("ProteinP", "associatedWith", "DiseaseY"),
        ])
        .unwrap();
        let trace = Trace::new();
        trace.push(TraceOp::FindPaths {
            source: e("DrugX"),
            target: e("DiseaseY"),
            max_hops: 3,
            paths: vec![path],
        });
        let narrated = ReasoningNarrator.narrate(&trace, "yes");
        assert_eq!(narrated.nodes.len(), 3);
        assert_eq!(narrated.edges.len(), 2);
        assert_eq!(
            narrated.steps[0].description,
            "Found 1 path(s) of length 2 from DrugX to DiseaseY"
        );
        assert_eq!(
            narrated.steps[0].details,
            ["DrugX -inhibits-> ProteinP -associatedWith-> DiseaseY"]
        );
    }

    #[test]
    fn federated_rows_contribute_nodes() {
        use crate::federation::JoinVia;
        use crate::graph::query::{Row, Value};

        let result = FederatedResult {
            rows: vec![
                MergedRow::Joined {
                    local: Row::new().with("city", Value::iri("http://ex.org/Paris")),
                    remote: Row::new()
                        .with("city", Value::iri("http://remote.org/Paris"))
                        .with("mayor", Value::iri("http://remote.org/Hidalgo"))
                        .with("since", Value::literal("2014")),
                    via: JoinVia::Equivalence,
                },
                MergedRow::RemoteOnly {
                    remote: Row::new().with("city", Value::iri("http://remote.org/Tokyo")),
                },
            ],
            local_rows: 1,
            remote_rows: 2,
            links: vec![("http://ex.org/Paris".into(), "http://remote.org/Paris".into())],
        };
        let trace = Trace::new();
        trace.push(TraceOp::Federate {
            remote: "remote".into(),
            result,
        });

        let path = ReasoningNarrator.narrate(&trace, "");
        let iris: Vec<&str> = path.nodes.iter().map(|n| n.iri.as_str()).collect();
        for expected in [
            "http://ex.org/Paris",
            "http://remote.org/Paris",
            "http://remote.org/Hidalgo",
            "http://remote.org/Tokyo",
        ] {
            assert!(iris.contains(&expected), "{expected} missing from {iris:?}");
        }
        assert_eq!(path.nodes.len(), 4);
        assert_eq!(path.edges.len(), 1);
    }

    #[test]
    fn insights_and_summary() {
        let trace = Trace::new();
        trace.push(TraceOp::Expand {
            neighborhood: hood("Paris", vec![
                rel("Paris", "locatedIn", "France"),
                rel("Louvre", "locatedIn", "Paris"),
                rel("Paris", "twinnedWith", "Rome"),
            ]),
        });
        let narrator = ReasoningNarrator;
        let path = narrator.narrate(&trace, "Paris has 3 relations");

        let insights = narrator.key_insights(&path);
        assert_eq!(insights[0], "Most frequent relation: locatedIn (2 edges)");
        assert_eq!(insights[1], "Most connected entity: Paris (3 relations)");
        assert_eq!(insights[2], "4 entities and 3 relations touched across 1 steps");

        let summary = narrator.summary(&path);
        assert!(summary.starts_with("Reasoning over 4 entities and 3 relations in 1 steps:\n1. Expanded Paris"));
        assert!(summary.contains("   - Paris -twinnedWith-> Rome\n"));
        assert!(summary.ends_with("Answer: Paris has 3 relations"));
    }
}
