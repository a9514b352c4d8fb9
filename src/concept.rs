//! Concept resolution: map a text fragment to ranked graph entities.
//!
//! Three matchers feed one ranking:
//!
//! - **Exact**: case-insensitive label equality (`rdfs:label`, `skos:prefLabel`,
//!   `skos:altLabel`), confidence 1.0. An absolute IRI the store knows is also exact.
//! - **Lexical**: substring match, used only when nothing matched exactly.
//!   Confidence is `0.9 * len(fragment) / len(label)`.
//! - **Semantic**: nearest neighbors from the [`SemanticIndex`], when one is configured.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::QueryError;
use crate::graph::executor::QueryExecutor;
use crate::graph::query::{Filter, Pattern, Query, Row, Term};
use crate::graph::scope::Scope;
use crate::graph::{Entity, vocab};
use crate::semantic::SemanticIndex;

/// Words dropped from fragments before matching.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "for", "to", "and", "or", "is", "are", "was", "were",
    "what", "which", "who", "whom", "how", "does", "do", "did", "with", "by", "from", "at",
    "about", "me", "tell", "show", "find", "list", "all", "any", "some",
];

/// Confidence ceiling for lexical matches.
const LEXICAL_WEIGHT: f32 = 0.9;

/// Which matcher produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Exact,
    Lexical,
    Semantic,
}

impl std::fmt::Display for MatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Lexical => write!(f, "lexical"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

/// A candidate entity for a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMatch {
    pub entity: Entity,
    /// In [0, 1].
    pub confidence: f32,
    pub source: MatchSource,
}

/// Ranked matches for one fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub matches: Vec<ConceptMatch>,
    /// A semantic index was consulted.
    pub semantic_available: bool,
    /// No exact match existed and substring matching was used.
    pub lexical_fallback: bool,
}

impl Resolution {
    pub fn best(&self) -> Option<&ConceptMatch> {
        self.matches.first()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Resolves fragments against the store and an optional semantic index.
#[derive(Debug, Clone)]
pub struct ConceptResolver {
    executor: QueryExecutor,
    semantic: Option<Arc<SemanticIndex>>,
    scope: Option<Scope>,
    /// Rows read per matcher query.
    candidate_limit: usize,
}

impl ConceptResolver {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            executor,
            semantic: None,
            scope: None,
            candidate_limit: 50,
        }
    }

    pub fn with_semantic(mut self, index: Option<Arc<SemanticIndex>>) -> Self {
        self.semantic = index;
        self
    }

    pub fn with_scope(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.max(1);
        self
    }

    /// Up to `top_k` matches for `fragment`, best first.
    ///
    /// A fragment that normalizes to nothing resolves to an empty result.
    pub fn resolve(&self, fragment: &str, top_k: usize) -> Result<Resolution, QueryError> {
        let mut resolution = Resolution {
            semantic_available: self.semantic.is_some(),
            ..Default::default()
        };
        if top_k == 0 {
            return Ok(resolution);
        }

        let trimmed = fragment.trim();
        if is_absolute_iri(trimmed) {
            if self.known_iri(trimmed)? {
                let entity = Entity::new(trimmed);
                if self.in_scope(&entity) {
                    resolution.matches.push(ConceptMatch {
                        entity,
                        confidence: 1.0,
                        source: MatchSource::Exact,
                    });
                }
            }
            return Ok(resolution);
        }

        let text = normalize(fragment);
        if text.is_empty() {
            return Ok(resolution);
        }

        let mut candidates = self.exact(&text)?;
        candidates.retain(|c| self.in_scope(&c.entity));
        if candidates.is_empty() {
            resolution.lexical_fallback = true;
            candidates = self.lexical(&text)?;
        }

        if let Some(index) = &self.semantic {
            match index.search(&text, top_k * 2) {
                Ok(hits) => candidates.extend(hits.into_iter().map(|h| ConceptMatch {
                    entity: h.entity,
                    confidence: h.similarity,
                    source: MatchSource::Semantic,
                })),
                Err(err) => {
                    tracing::warn!(error = %err, "semantic search failed, continuing without it");
                    resolution.semantic_available = false;
                }
            }
        }

        candidates.retain(|c| self.in_scope(&c.entity));
        resolution.matches = rank(candidates, top_k);
        tracing::debug!(
            fragment = %text,
            matches = resolution.matches.len(),
            lexical_fallback = resolution.lexical_fallback,
            "resolved concept"
        );
        Ok(resolution)
    }

    /// Resolve independent fragments concurrently; output order follows input order.
    pub fn resolve_many<S>(&self, fragments: &[S], top_k: usize) -> Result<Vec<Resolution>, QueryError>
    where
        S: AsRef<str> + Sync,
    {
        fragments
            .par_iter()
            .map(|f| self.resolve(f.as_ref(), top_k))
            .collect()
    }

    fn in_scope(&self, entity: &Entity) -> bool {
        self.scope.as_ref().is_none_or(|s| s.allows(entity))
    }

    fn known_iri(&self, iri: &str) -> Result<bool, QueryError> {
        let query = Query::ask().pattern(Pattern::Union(vec![
            vec![Pattern::triple(Term::iri(iri), Term::var("p"), Term::var("o"))],
            vec![Pattern::triple(Term::var("s"), Term::var("p"), Term::iri(iri))],
        ]));
        self.executor.ask(&query)
    }

    fn label_query(&self, filter: Filter) -> Query {
        let label_of = |p: &str| {
            vec![Pattern::triple(
                Term::var("e"),
                Term::iri(p),
                Term::var("label"),
            )]
        };
        Query::select(["e", "label"])
            .distinct()
            .pattern(Pattern::Union(vec![
                label_of(vocab::RDFS_LABEL),
                label_of(vocab::SKOS_PREF_LABEL),
                label_of(vocab::SKOS_ALT_LABEL),
            ]))
            .filter(Filter::IsIri("e".into()))
            .filter(filter)
            .limit(self.candidate_limit)
    }

    fn exact(&self, text: &str) -> Result<Vec<ConceptMatch>, QueryError> {
        let query = self.label_query(Filter::LabelEquals {
            var: "label".into(),
            text: text.to_string(),
        });
        Ok(self
            .executor
            .execute(&query)?
            .iter()
            .filter_map(labeled_entity)
            .map(|entity| ConceptMatch {
                entity,
                confidence: 1.0,
                source: MatchSource::Exact,
            })
            .collect())
    }

    fn lexical(&self, text: &str) -> Result<Vec<ConceptMatch>, QueryError> {
        let query = self.label_query(Filter::LabelContains {
            var: "label".into(),
            text: text.to_string(),
        });
        let fragment_len = text.chars().count() as f32;
        Ok(self
            .executor
            .execute(&query)?
            .iter()
            .filter_map(labeled_entity)
            .map(|entity| {
                let label_len = entity.display_label().chars().count().max(1) as f32;
                ConceptMatch {
                    confidence: (LEXICAL_WEIGHT * fragment_len / label_len).min(LEXICAL_WEIGHT),
                    entity,
                    source: MatchSource::Lexical,
                }
            })
            .collect())
    }
}

fn labeled_entity(row: &Row) -> Option<Entity> {
    Some(Entity::new(row.iri("e")?).with_label(row.text("label")?))
}

fn is_absolute_iri(s: &str) -> bool {
    !s.contains(char::is_whitespace)
        && (s.starts_with("http://") || s.starts_with("https://") || s.starts_with("urn:"))
}

/// NFKC, lowercase, punctuation trimmed from each word, stopwords removed.
pub fn normalize(fragment: &str) -> String {
    let folded: String = fragment.nfkc().collect::<String>().to_lowercase();
    folded
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deduplicate by IRI keeping the highest confidence, then order: exact first,
/// confidence descending, IRI ascending.
fn rank(candidates: Vec<ConceptMatch>, top_k: usize) -> Vec<ConceptMatch> {
    let mut best: HashMap<String, ConceptMatch> = HashMap::new();
    for candidate in candidates {
        match best.get_mut(&candidate.entity.iri) {
            Some(kept) => {
                let better = candidate.confidence > kept.confidence
                    || (candidate.confidence == kept.confidence && candidate.source < kept.source);
                if better {
                    *kept = candidate;
                }
            }
            None => {
                best.insert(candidate.entity.iri.clone(), candidate);
            }
        }
    }

    let mut ranked: Vec<ConceptMatch> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        (a.source != MatchSource::Exact)
            .cmp(&(b.source != MatchSource::Exact))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.entity.iri.cmp(&b.entity.iri))
    });
    ranked.truncate(top_k);
    ranked
}
