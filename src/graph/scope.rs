//! Request scoping: restrict discovery to a set of context entities and their
//! immediate neighborhood.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::QueryError;

use super::neighborhood::NeighborhoodExpander;
use super::{Direction, Entity};

/// The IRIs a scoped request may surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    allowed: Arc<HashSet<String>>,
}

impl Scope {
    pub fn from_iris<I, S>(iris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Arc::new(iris.into_iter().map(Into::into).collect()),
        }
    }

    /// The context entities plus every entity one hop away in either direction.
    ///
    /// `per_entity_limit` bounds how many edges are read per context entity and
    /// direction. The expander must be unscoped.
    pub fn around(
        expander: &NeighborhoodExpander,
        context: &[Entity],
        per_entity_limit: usize,
    ) -> Result<Self, QueryError> {
        let mut allowed: HashSet<String> = context.iter().map(|e| e.iri.clone()).collect();
        for entity in context {
            let hood = expander.expand(entity, Direction::Both, per_entity_limit)?;
            allowed.extend(hood.nodes.into_iter().map(|n| n.iri));
        }
        tracing::debug!(
            context = context.len(),
            allowed = allowed.len(),
            "built request scope"
        );
        Ok(Self {
            allowed: Arc::new(allowed),
        })
    }

    pub fn allows(&self, entity: &Entity) -> bool {
        self.allows_iri(&entity.iri)
    }

    pub fn allows_iri(&self, iri: &str) -> bool {
        self.allowed.contains(iri)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::executor::QueryExecutor;
    use crate::graph::sparql::OxigraphStore;

    #[test]
    fn scope_includes_one_hop_neighbors() {
        let store = OxigraphStore::in_memory().unwrap();
        store
            .load_turtle(
                r#"
                @prefix ex: <http://ex.org/> .
                ex:a ex:p ex:b .
                ex:c ex:p ex:a .
                ex:b ex:p ex:d .
            "#,
            )
            .unwrap();
        let expander = NeighborhoodExpander::new(QueryExecutor::new(Arc::new(store)));
        let scope = Scope::around(&expander, &[Entity::new("http://ex.org/a")], 20).unwrap();

        assert!(scope.allows_iri("http://ex.org/a"));
        assert!(scope.allows_iri("http://ex.org/b"));
        assert!(scope.allows_iri("http://ex.org/c"));
        assert!(!scope.allows_iri("http://ex.org/d"));
        assert_eq!(scope.len(), 3);
    }
}
