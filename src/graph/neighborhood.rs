//! One-hop neighborhood expansion around an entity.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

use super::executor::QueryExecutor;
use super::query::{Filter, Pattern, Query, Row, Term, Value};
use super::scope::Scope;
use super::{Direction, Entity, Relation, vocab};

/// The relations touching one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighborhood {
    pub center: Entity,
    /// `center` first, then every other endpoint in first-seen order.
    pub nodes: Vec<Entity>,
    /// Every edge has `center` as source or target.
    pub edges: Vec<Relation>,
}

impl Neighborhood {
    fn new(center: Entity) -> Self {
        Self {
            nodes: vec![center.clone()],
            center,
            edges: Vec::new(),
        }
    }

    /// The entities across each edge, excluding the center.
    pub fn neighbors(&self) -> impl Iterator<Item = &Entity> {
        self.nodes.iter().skip(1)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Reads 1-hop relations from the store.
#[derive(Debug, Clone)]
pub struct NeighborhoodExpander {
    executor: QueryExecutor,
    scope: Option<Scope>,
}

impl NeighborhoodExpander {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            executor,
            scope: None,
        }
    }

    /// Restrict results to edges whose other endpoint is in `scope`.
    pub fn with_scope(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// Relations with `entity` as source and/or target, at most `limit` per direction.
    /// `usize::MAX` reads every edge.
    ///
    /// Literal-valued properties are not edges. A self-relation is listed once.
    pub fn expand(
        &self,
        entity: &Entity,
        direction: Direction,
        limit: usize,
    ) -> Result<Neighborhood, QueryError> {
        if limit == 0 {
            return Ok(Neighborhood::new(entity.clone()));
        }

        let mut center = entity.clone();
        if center.label.is_none() {
            if let Some(label) = self.label_of(&center.iri)? {
                center.label = Some(label);
            }
        }

        let mut edges = Vec::new();
        if direction.includes_outgoing() {
            edges.extend(self.outgoing(&center, limit)?);
        }
        if direction.includes_incoming() {
            edges.extend(self.incoming(&center, limit)?);
        }
        self.attach_labels(&center, &mut edges)?;

        let mut hood = Neighborhood::new(center.clone());
        let mut seen_edges = HashSet::new();
        let mut seen_nodes: HashSet<String> = HashSet::from([center.iri.clone()]);
        for edge in edges {
            let Some(other) = edge.other_end(&center) else {
                continue;
            };
            if let Some(scope) = &self.scope {
                if !scope.allows(other) {
                    continue;
                }
            }
            if seen_nodes.insert(other.iri.clone()) {
                hood.nodes.push(other.clone());
            }
            if seen_edges.insert(edge.clone()) {
                hood.edges.push(edge);
            }
        }

        tracing::debug!(
            entity = %center.iri,
            %direction,
            edges = hood.edges.len(),
            "expanded neighborhood"
        );
        Ok(hood)
    }

    fn outgoing(&self, center: &Entity, limit: usize) -> Result<Vec<Relation>, QueryError> {
        let query = Query::select(["p", "o"])
            .distinct()
            .pattern(Pattern::triple(
                Term::iri(&center.iri),
                Term::var("p"),
                Term::var("o"),
            ))
            .filter(Filter::IsIri("o".into()))
            .limit(limit);
        let rows = self.executor.execute(&query)?;
        Ok(dedupe_limit(
            rows.iter().filter_map(|row| {
                let predicate = Entity::new(row.iri("p")?);
                let target = Entity::new(row.iri("o")?);
                Some(Relation::new(center.clone(), predicate, target))
            }),
            limit,
        ))
    }

    fn incoming(&self, center: &Entity, limit: usize) -> Result<Vec<Relation>, QueryError> {
        let query = Query::select(["s", "p"])
            .distinct()
            .pattern(Pattern::triple(
                Term::var("s"),
                Term::var("p"),
                Term::iri(&center.iri),
            ))
            .filter(Filter::IsIri("s".into()))
            .limit(limit);
        let rows = self.executor.execute(&query)?;
        Ok(dedupe_limit(
            rows.iter().filter_map(|row| {
                let source = Entity::new(row.iri("s")?);
                let predicate = Entity::new(row.iri("p")?);
                Some(Relation::new(source, predicate, center.clone()))
            }),
            limit,
        ))
    }

    /// Label every endpoint and predicate of `edges` with one lookup.
    ///
    /// Labels are fetched after the edge limit so extra labels never crowd out edges.
    fn attach_labels(&self, center: &Entity, edges: &mut [Relation]) -> Result<(), QueryError> {
        let mut iris: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for edge in edges.iter() {
            for e in [&edge.source, &edge.predicate, &edge.target] {
                if e.label.is_none() && *e != *center && seen.insert(e.iri.clone()) {
                    iris.push(e.iri.clone());
                }
            }
        }
        if iris.is_empty() {
            return Ok(());
        }

        let labels = self.labels_of(iris)?;
        for edge in edges.iter_mut() {
            for e in [&mut edge.source, &mut edge.predicate, &mut edge.target] {
                if *e == *center {
                    e.merge_label(center);
                } else if e.label.is_none() {
                    e.label = labels.get(&e.iri).cloned();
                }
            }
        }
        Ok(())
    }

    /// One label per IRI, preferring untagged or English labels.
    fn labels_of(&self, iris: Vec<String>) -> Result<HashMap<String, String>, QueryError> {
        let query = Query::select(["e", "label"])
            .pattern(Pattern::values("e", iris))
            .pattern(Pattern::triple(
                Term::var("e"),
                Term::iri(vocab::RDFS_LABEL),
                Term::var("label"),
            ));
        let rows = self.executor.execute(&query)?;

        let mut labels: HashMap<String, (bool, String)> = HashMap::new();
        for row in &rows {
            let (Some(iri), Some(label)) = (row.iri("e"), row.text("label")) else {
                continue;
            };
            let preferred = match row.get("label") {
                Some(Value::Literal { language, .. }) => language
                    .as_deref()
                    .is_none_or(|lang| lang.eq_ignore_ascii_case("en") || lang.starts_with("en-")),
                _ => false,
            };
            match labels.get(iri) {
                Some((true, _)) => {}
                Some((false, _)) if !preferred => {}
                _ => {
                    labels.insert(iri.to_string(), (preferred, label.to_string()));
                }
            }
        }
        Ok(labels.into_iter().map(|(iri, (_, label))| (iri, label)).collect())
    }

    /// The `rdfs:label` of `iri`, if it has one.
    pub fn label_of(&self, iri: &str) -> Result<Option<String>, QueryError> {
        let query = Query::select(["label"])
            .pattern(Pattern::triple(
                Term::iri(iri),
                Term::iri(vocab::RDFS_LABEL),
                Term::var("label"),
            ))
            .limit(1);
        let rows = self.executor.execute(&query)?;
        Ok(rows.first().and_then(|r: &Row| r.text("label")).map(str::to_string))
    }
}

/// Keep the first occurrence of each relation, then cap at `limit`.
fn dedupe_limit(relations: impl Iterator<Item = Relation>, limit: usize) -> Vec<Relation> {
    let mut seen = HashSet::new();
    relations
        .filter(|r| seen.insert(r.clone()))
        .take(limit)
        .collect()
}
