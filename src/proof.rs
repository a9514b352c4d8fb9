//! Assertion validation: does `(subject, predicate, object)` hold in the graph?
//!
//! A direct triple is the strongest evidence. Failing that, a connecting path of
//! at most `hop_limit` hops counts as support, optionally only when it uses the
//! asserted predicate. The engine never reports `holds` without evidence, and a
//! larger hop limit can only turn a negative answer positive.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::graph::executor::QueryExecutor;
use crate::graph::path::Path;
use crate::graph::query::{Pattern, Query, Term};
use crate::graph::traverse::PathExplorer;
use crate::graph::{Entity, Relation};

/// Default hop limit for path evidence.
pub const DEFAULT_HOP_LIMIT: usize = 3;

/// What counts as path evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofPolicy {
    /// Any connecting path supports the assertion.
    #[default]
    AnyPath,
    /// The path must traverse the asserted predicate at least once.
    RequirePredicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Evidence {
    None,
    /// The triple itself is in the store.
    Edge(Relation),
    /// A minimal connecting path.
    Path(Path),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub subject: Entity,
    pub predicate: Entity,
    pub object: Entity,
    pub holds: bool,
    pub evidence: Evidence,
    pub hop_limit: usize,
    pub policy: ProofPolicy,
}

impl Validation {
    /// One line per proof step, for narration.
    pub fn steps(&self) -> Vec<String> {
        match &self.evidence {
            Evidence::Edge(rel) => vec![format!("Found direct triple: {rel}")],
            Evidence::Path(path) => {
                let mut steps = vec![format!(
                    "No direct triple; found a {}-hop path from {} to {}",
                    path.len(),
                    self.subject,
                    self.object
                )];
                steps.extend(path.relations().map(|r| format!("  {r}")));
                steps
            }
            Evidence::None => vec![format!(
                "No direct triple and no connecting path within {} hops",
                self.hop_limit
            )],
        }
    }
}

/// Validates assertions against the store.
#[derive(Debug, Clone)]
pub struct ProofEngine {
    executor: QueryExecutor,
    explorer: PathExplorer,
    policy: ProofPolicy,
}

impl ProofEngine {
    pub fn new(executor: QueryExecutor, explorer: PathExplorer) -> Self {
        Self {
            executor,
            explorer,
            policy: ProofPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ProofPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn validate(
        &self,
        subject: &Entity,
        predicate: &Entity,
        object: &Entity,
    ) -> Result<Validation, QueryError> {
        self.validate_within(subject, predicate, object, DEFAULT_HOP_LIMIT)
    }

    pub fn validate_within(
        &self,
        subject: &Entity,
        predicate: &Entity,
        object: &Entity,
        hop_limit: usize,
    ) -> Result<Validation, QueryError> {
        let mut validation = Validation {
            subject: subject.clone(),
            predicate: predicate.clone(),
            object: object.clone(),
            holds: false,
            evidence: Evidence::None,
            hop_limit,
            policy: self.policy,
        };

        let direct = Query::ask().pattern(Pattern::triple(
            Term::iri(&subject.iri),
            Term::iri(&predicate.iri),
            Term::iri(&object.iri),
        ));
        if self.executor.ask(&direct)? {
            validation.holds = true;
            validation.evidence = Evidence::Edge(Relation::new(
                subject.clone(),
                predicate.clone(),
                object.clone(),
            ));
            tracing::debug!(subject = %subject.iri, predicate = %predicate.iri, object = %object.iri, "direct triple");
            return Ok(validation);
        }

        // An entity is trivially connected to itself; that is not evidence.
        if subject != object && hop_limit > 0 {
            let paths = self.explorer.find_paths(subject, object, hop_limit)?;
            let chosen = paths.into_iter().find(|p| match self.policy {
                ProofPolicy::AnyPath => !p.is_empty(),
                ProofPolicy::RequirePredicate => p.uses_predicate(&predicate.iri),
            });
            if let Some(path) = chosen {
                validation.holds = true;
                validation.evidence = Evidence::Path(path);
            }
        }

        tracing::debug!(
            subject = %subject.iri,
            predicate = %predicate.iri,
            object = %object.iri,
            holds = validation.holds,
            hop_limit,
            "validated assertion"
        );
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::neighborhood::NeighborhoodExpander;
    use crate::graph::sparql::OxigraphStore;
    use crate::graph::traverse::ExplorerConfig;

    const PHARMA: &str = r#"
        @prefix ex: <http://ex.org/> .
        ex:DrugX ex:inhibits ex:ProteinP .
        ex:ProteinP ex:associatedWith ex:DiseaseY .
        ex:DrugZ ex:treats ex:DiseaseY .
        ex:Far1 ex:r ex:Far2 .
        ex:Far2 ex:r ex:Far3 .
        ex:Far3 ex:r ex:Far4 .
        ex:Far4 ex:r ex:Far5 .
    "#;

    fn engine() -> ProofEngine {
        let store = OxigraphStore::in_memory().unwrap();
        store.load_turtle(PHARMA).unwrap();
        let executor = QueryExecutor::new(Arc::new(store));
        let explorer = PathExplorer::new(
            NeighborhoodExpander::new(executor.clone()),
            ExplorerConfig::default(),
        );
        ProofEngine::new(executor, explorer)
    }

    fn e(name: &str) -> Entity {
        Entity::new(format!("http://ex.org/{name}"))
    }

    #[test]
    fn direct_triple_is_edge_evidence() {
        let v = engine().validate(&e("DrugZ"), &e("treats"), &e("DiseaseY")).unwrap();
        assert!(v.holds);
        assert!(matches!(v.evidence, Evidence::Edge(_)));
    }

    #[test]
    fn two_hop_path_supports_assertion() {
        let v = engine().validate(&e("DrugX"), &e("treats"), &e("DiseaseY")).unwrap();
        assert!(v.holds);
        match &v.evidence {
            Evidence::Path(p) => assert_eq!(p.len(), 2),
            other => panic!("expected path evidence, got {other:?}"),
        }
        assert_eq!(v.steps().len(), 3);
    }

    #[test]
    fn require_predicate_rejects_unrelated_paths() {
        let v = engine()
            .with_policy(ProofPolicy::RequirePredicate)
            .validate(&e("DrugX"), &e("treats"), &e("DiseaseY"))
            .unwrap();
        assert!(!v.holds);
        assert_eq!(v.evidence, Evidence::None);

        let v = engine()
            .with_policy(ProofPolicy::RequirePredicate)
            .validate(&e("DrugX"), &e("associatedWith"), &e("DiseaseY"))
            .unwrap();
        assert!(v.holds);
    }

    #[test]
    fn monotone_in_hop_limit() {
        let engine = engine();
        let mut held = false;
        for limit in 0..=5 {
            let v = engine
                .validate_within(&e("Far1"), &e("r"), &e("Far5"), limit)
                .unwrap();
            assert!(!held || v.holds, "holds at a smaller limit but not at {limit}");
            held = v.holds;
            assert_eq!(v.holds, limit >= 4);
        }
    }

    #[test]
    fn never_holds_without_evidence() {
        let v = engine().validate(&e("DrugX"), &e("treats"), &e("Far5")).unwrap();
        assert!(!v.holds);
        assert_eq!(v.evidence, Evidence::None);

        let same = engine().validate(&e("DrugX"), &e("treats"), &e("DrugX")).unwrap();
        assert!(!same.holds);
    }

    #[test]
    fn proof_through_a_high_degree_node() {
        let mut ttl = String::from("@prefix ex: <http://ex.org/> .\n");
        for i in 0..40 {
            ttl.push_str(&format!("ex:Hub ex:targets ex:Protein{i} .\n"));
        }
        ttl.push_str("ex:Protein33 ex:associatedWith ex:DiseaseQ .\n");

        let store = OxigraphStore::in_memory().unwrap();
        store.load_turtle(&ttl).unwrap();
        let executor = QueryExecutor::new(Arc::new(store));
        let explorer = PathExplorer::new(
            NeighborhoodExpander::new(executor.clone()),
            ExplorerConfig::default(),
        );
        let prover = ProofEngine::new(executor, explorer);

        let v = prover.validate(&e("Hub"), &e("treats"), &e("DiseaseQ")).unwrap();
        assert!(v.holds);
    }
}
