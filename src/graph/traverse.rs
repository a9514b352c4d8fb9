//! Multi-hop path search and bounded reachability.
//!
//! Level-synchronous BFS over the store: each depth expands the whole frontier
//! through the [`NeighborhoodExpander`] (in parallel, merged in frontier order)
//! and records predecessor edges. The search stops at the first depth that
//! reaches the target, so every returned path is minimal.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

use super::neighborhood::{Neighborhood, NeighborhoodExpander};
use super::path::Path;
use super::{Direction, Entity, Relation};

/// Configuration for path search and expansion.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    /// Which edges to follow from each node.
    pub direction: Direction,
    /// Maximum number of minimal paths returned.
    pub max_paths: usize,
    /// Edges read per node and direction. `None` reads every edge, which keeps
    /// `find_paths` exact; a cap can hide paths through high-degree nodes.
    pub neighbors_per_node: Option<usize>,
    /// Cap on entities collected by [`PathExplorer::reachable`].
    pub max_reachable: usize,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Both,
            max_paths: 10,
            neighbors_per_node: None,
            max_reachable: 1_000,
        }
    }
}

/// An entity discovered by expansion and its BFS depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reached {
    pub entity: Entity,
    pub depth: usize,
}

/// Result of [`PathExplorer::explore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum Exploration {
    /// A target was given: minimal paths to it, possibly none.
    Paths(Vec<Path>),
    /// No target: everything reachable within the hop limit.
    Reachable(Vec<Reached>),
}

/// BFS path search over a graph store.
#[derive(Debug, Clone)]
pub struct PathExplorer {
    expander: NeighborhoodExpander,
    config: ExplorerConfig,
}

impl PathExplorer {
    pub fn new(expander: NeighborhoodExpander, config: ExplorerConfig) -> Self {
        Self { expander, config }
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    pub fn expander(&self) -> &NeighborhoodExpander {
        &self.expander
    }

    /// All minimal-length paths from `source` to `target`, at most `max_hops` long.
    ///
    /// `source == target` yields one zero-length path. No path yields an empty vec.
    pub fn find_paths(
        &self,
        source: &Entity,
        target: &Entity,
        max_hops: usize,
    ) -> Result<Vec<Path>, QueryError> {
        if source == target {
            return Ok(vec![Path::new(source.clone())]);
        }

        let mut depth_of: HashMap<String, usize> = HashMap::from([(source.iri.clone(), 0)]);
        let mut preds: HashMap<String, Vec<(Entity, Relation)>> = HashMap::new();
        let mut frontier = vec![source.clone()];

        for depth in 1..=max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for (node, hood) in frontier.iter().zip(self.expand_frontier(&frontier)?) {
                for edge in hood.edges {
                    let Some(other) = edge.other_end(node).cloned() else {
                        continue;
                    };
                    match depth_of.get(&other.iri) {
                        None => {
                            depth_of.insert(other.iri.clone(), depth);
                            preds
                                .entry(other.iri.clone())
                                .or_default()
                                .push((node.clone(), edge));
                            next.push(other);
                        }
                        Some(&d) if d == depth => {
                            let entry = preds.entry(other.iri.clone()).or_default();
                            if !entry.iter().any(|(p, r)| p == node && *r == edge) {
                                entry.push((node.clone(), edge));
                            }
                        }
                        Some(_) => {}
                    }
                }
            }

            if depth_of.contains_key(&target.iri) {
                let paths = self.reconstruct(source, target, &preds);
                tracing::debug!(
                    source = %source.iri,
                    target = %target.iri,
                    depth,
                    paths = paths.len(),
                    "found minimal paths"
                );
                return Ok(paths);
            }
            frontier = next;
        }

        tracing::debug!(source = %source.iri, target = %target.iri, max_hops, "no path found");
        Ok(Vec::new())
    }

    /// Every entity reachable from `source` within `max_hops`, in BFS order.
    ///
    /// The source itself is listed first at depth 0.
    pub fn reachable(&self, source: &Entity, max_hops: usize) -> Result<Vec<Reached>, QueryError> {
        let mut visited: HashSet<String> = HashSet::from([source.iri.clone()]);
        let mut reached = vec![Reached {
            entity: source.clone(),
            depth: 0,
        }];
        let mut frontier = vec![source.clone()];

        'levels: for depth in 1..=max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for hood in self.expand_frontier(&frontier)? {
                for other in hood.neighbors() {
                    if reached.len() >= self.config.max_reachable {
                        break 'levels;
                    }
                    if visited.insert(other.iri.clone()) {
                        reached.push(Reached {
                            entity: other.clone(),
                            depth,
                        });
                        next.push(other.clone());
                    }
                }
            }
            frontier = next;
        }
        Ok(reached)
    }

    /// Paths when a target is given, otherwise the reachable set.
    pub fn explore(
        &self,
        source: &Entity,
        target: Option<&Entity>,
        max_hops: usize,
    ) -> Result<Exploration, QueryError> {
        match target {
            Some(target) => self.find_paths(source, target, max_hops).map(Exploration::Paths),
            None => self.reachable(source, max_hops).map(Exploration::Reachable),
        }
    }

    /// Expand each frontier node concurrently; results keep frontier order.
    fn expand_frontier(&self, frontier: &[Entity]) -> Result<Vec<Neighborhood>, QueryError> {
        frontier
            .par_iter()
            .map(|node| {
                self.expander.expand(
                    node,
                    self.config.direction,
                    self.config.neighbors_per_node.unwrap_or(usize::MAX),
                )
            })
            .collect()
    }

    fn reconstruct(
        &self,
        source: &Entity,
        target: &Entity,
        preds: &HashMap<String, Vec<(Entity, Relation)>>,
    ) -> Vec<Path> {
        let mut chains = Vec::new();
        let mut suffix = Vec::new();
        collect_chains(
            &target.iri,
            &source.iri,
            preds,
            &mut suffix,
            &mut chains,
            self.config.max_paths,
        );
        chains
            .into_iter()
            .filter_map(|chain| Path::from_relations(source.clone(), chain).ok())
            .collect()
    }
}

/// Walk predecessor edges back from `node` to `source`, emitting relation chains
/// in source-to-target order.
fn collect_chains(
    node: &str,
    source: &str,
    preds: &HashMap<String, Vec<(Entity, Relation)>>,
    suffix: &mut Vec<Relation>,
    out: &mut Vec<Vec<Relation>>,
    cap: usize,
) {
    if out.len() >= cap {
        return;
    }
    if node == source {
        out.push(suffix.iter().rev().cloned().collect());
        return;
    }
    let Some(edges) = preds.get(node) else {
        return;
    };
    for (prev, relation) in edges {
        suffix.push(relation.clone());
        collect_chains(&prev.iri, source, preds, suffix, out, cap);
        suffix.pop();
        if out.len() >= cap {
            return;
        }
    }
}
