//! Semantic label index: approximate nearest-neighbor search over label embeddings.
//!
//! The index is read-mostly. Readers clone an `Arc` snapshot under a briefly held
//! read lock; [`SemanticIndex::rebuild`] builds a fresh HNSW graph off to the side
//! and swaps it in, so searches never observe a half-built index.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anndists::dist::DistCosine;
use hnsw_rs::hnsw::Hnsw;
use rayon::prelude::*;
use unicode_normalization::UnicodeNormalization;

use crate::error::{GrapeError, SemanticError};
use crate::graph::executor::QueryExecutor;
use crate::graph::query::{Filter, Pattern, Query, Term};
use crate::graph::{Entity, vocab};

/// Turns label text into a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Hashed character-trigram embedder.
///
/// Text is NFKC-normalized, lowercased and padded with spaces; every trigram is
/// hashed (FNV-1a) into one of `dim` buckets and the result is L2-normalized.
/// Cosine similarity then approximates trigram overlap, which tolerates typos
/// and inflection.
#[derive(Debug, Clone, Copy)]
pub struct NgramEmbedder {
    dim: usize,
}

impl NgramEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for NgramEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let normalized: String = text.nfkc().collect::<String>().to_lowercase();
        let chars: Vec<char> = std::iter::once(' ')
            .chain(normalized.split_whitespace().flat_map(|w| w.chars().chain([' '])))
            .collect();

        let mut v = vec![0.0f32; self.dim];
        for window in chars.windows(3) {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for c in window {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    hash ^= u64::from(b);
                    hash = hash.wrapping_mul(0x0100_0000_01b3);
                }
            }
            v[(hash % self.dim as u64) as usize] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

/// A semantic hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub entity: Entity,
    /// Cosine similarity in [0, 1].
    pub similarity: f32,
}

struct Snapshot {
    hnsw: Hnsw<'static, f32, DistCosine>,
    /// HNSW id → labeled entity.
    entries: Vec<Entity>,
}

// Safety: Hnsw uses internal synchronization via atomics/locks and the
// snapshot is never mutated after construction.
unsafe impl Send for Snapshot {}
unsafe impl Sync for Snapshot {}

impl Snapshot {
    fn build(embedder: &dyn Embedder, entries: Vec<Entity>) -> Result<Self, SemanticError> {
        let capacity = entries.len().max(1);
        let max_layer = ((capacity as f64).log2().ceil() as usize).clamp(4, 16);
        let hnsw = Hnsw::new(16, capacity, max_layer, 200, DistCosine {});

        let vectors: Vec<Vec<f32>> = entries
            .par_iter()
            .map(|e| embedder.embed(e.display_label()))
            .collect();

        for (id, vector) in vectors.iter().enumerate() {
            if vector.len() != embedder.dim() {
                return Err(SemanticError::DimensionMismatch {
                    expected: embedder.dim(),
                    actual: vector.len(),
                });
            }
            hnsw.insert((vector.as_slice(), id));
        }
        Ok(Self { hnsw, entries })
    }
}

/// Nearest-neighbor index over entity labels.
pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    snapshot: RwLock<Arc<Snapshot>>,
    min_similarity: f32,
}

impl SemanticIndex {
    /// An empty index. Call [`SemanticIndex::rebuild`] or
    /// [`SemanticIndex::rebuild_from_store`] to populate it.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let snapshot = Snapshot {
            hnsw: Hnsw::new(16, 1, 4, 200, DistCosine {}),
            entries: Vec::new(),
        };
        Self {
            embedder,
            snapshot: RwLock::new(Arc::new(snapshot)),
            min_similarity: 0.5,
        }
    }

    /// Hits below this similarity are discarded.
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity.clamp(0.0, 1.0);
        self
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    /// Number of indexed labels (one entity may carry several).
    pub fn len(&self) -> usize {
        self.current().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Result<Arc<Snapshot>, SemanticError> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| SemanticError::Index {
                message: "semantic index lock poisoned".into(),
            })
    }

    /// Replace the indexed labels. Entities without a label are indexed by local name.
    pub fn rebuild(&self, labeled: Vec<Entity>) -> Result<usize, SemanticError> {
        let fresh = Arc::new(Snapshot::build(self.embedder.as_ref(), labeled)?);
        let count = fresh.entries.len();
        let mut guard = self.snapshot.write().map_err(|_| SemanticError::Index {
            message: "semantic index lock poisoned".into(),
        })?;
        *guard = fresh;
        tracing::info!(labels = count, "semantic index rebuilt");
        Ok(count)
    }

    /// Rebuild from every `rdfs:label`, `skos:prefLabel` and `skos:altLabel` in the store.
    pub fn rebuild_from_store(
        &self,
        executor: &QueryExecutor,
        limit: usize,
    ) -> Result<usize, GrapeError> {
        let label_of = |p: &str| {
            vec![Pattern::triple(
                Term::var("e"),
                Term::iri(p),
                Term::var("label"),
            )]
        };
        let query = Query::select(["e", "label"])
            .distinct()
            .pattern(Pattern::Union(vec![
                label_of(vocab::RDFS_LABEL),
                label_of(vocab::SKOS_PREF_LABEL),
                label_of(vocab::SKOS_ALT_LABEL),
            ]))
            .filter(Filter::IsIri("e".into()))
            .limit(limit);
        let entries: Vec<Entity> = executor
            .execute(&query)?
            .iter()
            .filter_map(|row| Some(Entity::new(row.iri("e")?).with_label(row.text("label")?)))
            .collect();
        Ok(self.rebuild(entries)?)
    }

    /// The `k` nearest labeled entities with similarity at or above the threshold,
    /// one hit per entity (its best label), most similar first.
    pub fn search(&self, text: &str, k: usize) -> Result<Vec<SemanticHit>, SemanticError> {
        let snapshot = self.current()?;
        if snapshot.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(text);
        if query.len() != self.embedder.dim() {
            return Err(SemanticError::DimensionMismatch {
                expected: self.embedder.dim(),
                actual: query.len(),
            });
        }
        if query.iter().all(|x| *x == 0.0) {
            return Ok(Vec::new());
        }

        // Over-fetch: several labels may belong to one entity.
        let fetch = (k * 3).min(snapshot.entries.len());
        let ef_search = (fetch * 2).max(32);
        let neighbours = snapshot.hnsw.search(&query, fetch, ef_search);

        let mut best: HashMap<&str, SemanticHit> = HashMap::new();
        for n in neighbours {
            let Some(entity) = snapshot.entries.get(n.d_id) else {
                continue;
            };
            let similarity = (1.0 - n.distance).clamp(0.0, 1.0);
            if similarity < self.min_similarity {
                continue;
            }
            let hit = best.entry(entity.iri.as_str()).or_insert_with(|| SemanticHit {
                entity: entity.clone(),
                similarity,
            });
            if similarity > hit.similarity {
                hit.similarity = similarity;
                hit.entity = entity.clone();
            }
        }

        let mut hits: Vec<SemanticHit> = best.into_values().collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity.iri.cmp(&b.entity.iri))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("dim", &self.embedder.dim())
            .field("labels", &self.len())
            .field("min_similarity", &self.min_similarity)
            .finish()
    }
}
