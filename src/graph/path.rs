//! Paths: a start entity and a chain of relations, each traversed forward or backward.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Entity, Relation};

/// How a step walks its relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    /// From the relation's source to its target.
    Forward,
    /// From the relation's target to its source.
    Backward,
}

/// One hop of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    pub relation: Relation,
    pub direction: StepDirection,
    /// The entity this step arrives at.
    pub node: Entity,
}

/// A relation that does not touch the current end of the path.
#[derive(Debug, Clone, Error)]
#[error("relation {relation} does not touch path end {end}")]
pub struct DisconnectedStep {
    pub relation: Relation,
    pub end: Entity,
}

/// A connected walk through the graph.
///
/// Invariant: each step's relation touches the previous end entity on the side
/// implied by its direction. Enforced by [`Path::push`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    start: Entity,
    steps: Vec<PathStep>,
}

impl Path {
    /// A zero-length path at `start`.
    pub fn new(start: Entity) -> Self {
        Self {
            start,
            steps: Vec::new(),
        }
    }

    /// Build a path by pushing each relation in order.
    pub fn from_relations(
        start: Entity,
        relations: impl IntoIterator<Item = Relation>,
    ) -> Result<Self, DisconnectedStep> {
        let mut path = Self::new(start);
        for relation in relations {
            path.push(relation)?;
        }
        Ok(path)
    }

    /// Append a relation, walking it forward when it leaves the current end and
    /// backward when it arrives there.
    pub fn push(&mut self, relation: Relation) -> Result<(), DisconnectedStep> {
        let end = self.end();
        let (direction, node) = if relation.source == *end {
            (StepDirection::Forward, relation.target.clone())
        } else if relation.target == *end {
            (StepDirection::Backward, relation.source.clone())
        } else {
            return Err(DisconnectedStep {
                end: end.clone(),
                relation,
            });
        };
        self.steps.push(PathStep {
            relation,
            direction,
            node,
        });
        Ok(())
    }

    pub fn start(&self) -> &Entity {
        &self.start
    }

    pub fn end(&self) -> &Entity {
        self.steps.last().map_or(&self.start, |s| &s.node)
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Start followed by each step's node.
    pub fn nodes(&self) -> impl Iterator<Item = &Entity> {
        std::iter::once(&self.start).chain(self.steps.iter().map(|s| &s.node))
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.steps.iter().map(|s| &s.relation)
    }

    pub fn uses_predicate(&self, predicate_iri: &str) -> bool {
        self.relations().any(|r| r.predicate.iri == predicate_iri)
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.start)?;
        for step in &self.steps {
            match step.direction {
                StepDirection::Forward => {
                    write!(f, " -{}-> {}", step.relation.predicate, step.node)?
                }
                StepDirection::Backward => {
                    write!(f, " <-{}- {}", step.relation.predicate, step.node)?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(name: &str) -> Entity {
        Entity::new(format!("http://ex.org/{name}"))
    }

    fn rel(s: &str, p: &str, o: &str) -> Relation {
        Relation::new(e(s), e(p), e(o))
    }

    #[test]
    fn zero_length_path() {
        let path = Path::new(e("a"));
        assert!(path.is_empty());
        assert_eq!(path.end(), &e("a"));
        assert_eq!(path.nodes().count(), 1);
    }

    #[test]
    fn push_picks_direction() {
        let mut path = Path::new(e("a"));
        path.push(rel("a", "p", "b")).unwrap();
        path.push(rel("c", "q", "b")).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.steps()[0].direction, StepDirection::Forward);
        assert_eq!(path.steps()[1].direction, StepDirection::Backward);
        assert_eq!(path.end(), &e("c"));
        assert_eq!(path.to_string(), "a -p-> b <-q- c");
    }

    #[test]
    fn push_rejects_disconnected_relation() {
        let mut path = Path::new(e("a"));
        assert!(path.push(rel("x", "p", "y")).is_err());
        assert!(path.is_empty());
    }

    #[test]
    fn uses_predicate() {
        let path = Path::from_relations(e("a"), [rel("a", "p", "b"), rel("b", "q", "c")]).unwrap();
        assert!(path.uses_predicate("http://ex.org/q"));
        assert!(!path.uses_predicate("http://ex.org/r"));
    }
}
