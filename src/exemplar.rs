//! Exemplar retrieval: (question, query) pairs ranked by word overlap, for
//! few-shot prompting and for showing the user how a question maps to a query.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ExampleError;

/// One stored exemplar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub question: String,
    pub sparql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Example {
    pub fn new(question: impl Into<String>, sparql: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            sparql: sparql.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An exemplar and its similarity to the asked question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedExample {
    pub question: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Shared words over the larger word set, in [0, 1].
    pub score: f32,
}

/// Built-in exemplars used when no example files are available.
pub fn default_examples() -> Vec<Example> {
    vec![
        Example::new(
            "What are the properties of X?",
            "SELECT ?property ?value WHERE {\n  ?concept ?property ?value .\n}",
        )
        .with_description("Get all properties of a concept"),
        Example::new(
            "What is connected to X?",
            "SELECT ?connected WHERE {\n  { ?concept ?p ?connected }\n  UNION\n  { ?connected ?p ?concept }\n}",
        )
        .with_description("Find all connected entities"),
        Example::new(
            "What are the subclasses of X?",
            "SELECT ?subclass WHERE {\n  ?subclass <http://www.w3.org/2000/01/rdf-schema#subClassOf> ?concept .\n}",
        )
        .with_description("Get subclass hierarchy"),
    ]
}

/// Read-mostly exemplar set with copy-on-write rebuilds.
#[derive(Debug)]
pub struct ExampleStore {
    examples: RwLock<Arc<Vec<Example>>>,
}

impl Default for ExampleStore {
    fn default() -> Self {
        Self::new(default_examples())
    }
}

impl ExampleStore {
    pub fn new(examples: Vec<Example>) -> Self {
        Self {
            examples: RwLock::new(Arc::new(examples)),
        }
    }

    /// Load every `*.json` file in `dir`, falling back to the built-in
    /// exemplars when the directory is missing or yields nothing.
    pub fn from_dir(dir: &Path) -> Result<Self, ExampleError> {
        Ok(Self::new(load_dir(dir)?))
    }

    /// The current exemplar set.
    pub fn snapshot(&self) -> Arc<Vec<Example>> {
        match self.examples.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new exemplar set. Readers holding the previous snapshot keep it.
    pub fn rebuild(&self, examples: Vec<Example>) {
        let fresh = Arc::new(examples);
        let count = fresh.len();
        match self.examples.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        tracing::info!(examples = count, "example store rebuilt");
    }

    pub fn reload_dir(&self, dir: &Path) -> Result<usize, ExampleError> {
        let examples = load_dir(dir)?;
        let count = examples.len();
        self.rebuild(examples);
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Parse one example file: a single object or an array of objects.
pub fn load_file(path: &Path) -> Result<Vec<Example>, ExampleError> {
    let text = std::fs::read_to_string(path).map_err(|source| ExampleError::Read {
        path: path.display().to_string(),
        source,
    })?;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Example>),
        One(Example),
    }

    match serde_json::from_str::<OneOrMany>(&text) {
        Ok(OneOrMany::Many(v)) => Ok(v),
        Ok(OneOrMany::One(e)) => Ok(vec![e]),
        Err(e) => Err(ExampleError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}

/// Load all `*.json` files in `dir` in file-name order. Files that fail to parse
/// are skipped with a warning.
pub fn load_dir(dir: &Path) -> Result<Vec<Example>, ExampleError> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "no example directory, using built-in examples");
        return Ok(default_examples());
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ExampleError::Read {
        path: dir.display().to_string(),
        source,
    })?;
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut examples = Vec::new();
    for file in files {
        match load_file(&file) {
            Ok(mut found) => examples.append(&mut found),
            Err(err) => tracing::warn!(file = %file.display(), error = %err, "skipping example file"),
        }
    }

    if examples.is_empty() {
        tracing::warn!(dir = %dir.display(), "example directory yielded nothing, using built-in examples");
        return Ok(default_examples());
    }
    tracing::info!(dir = %dir.display(), examples = examples.len(), "loaded examples");
    Ok(examples)
}

/// Ranks exemplars against a question.
#[derive(Debug, Clone)]
pub struct ExampleRetriever {
    store: Arc<ExampleStore>,
}

impl ExampleRetriever {
    pub fn new(store: Arc<ExampleStore>) -> Self {
        Self { store }
    }

    /// Up to `top_k` exemplars, highest score first; ties keep insertion order.
    pub fn retrieve(&self, question: &str, top_k: usize) -> Vec<RankedExample> {
        let snapshot = self.store.snapshot();
        let asked = words(question);

        let mut ranked: Vec<RankedExample> = snapshot
            .iter()
            .map(|ex| RankedExample {
                score: overlap(&asked, &words(&ex.question)),
                question: ex.question.clone(),
                query: ex.sparql.clone(),
                description: ex.description.clone(),
            })
            .collect();
        // sort_by is stable.
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        ranked
    }

    /// A few-shot prompt built from the `n` best exemplars.
    pub fn few_shot_prompt(&self, question: &str, n: usize) -> String {
        let mut parts = vec!["Here are some example SPARQL queries:\n".to_string()];
        for (i, ex) in self.retrieve(question, n).iter().enumerate() {
            parts.push(format!("Example {}:", i + 1));
            parts.push(format!("Question: {}", ex.question));
            parts.push(format!("SPARQL:\n{}\n", ex.query));
        }
        parts.push("Now generate SPARQL for this question:".into());
        parts.push(format!("Question: {question}"));
        parts.push("SPARQL:".into());
        parts.join("\n")
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / larger as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever(examples: Vec<Example>) -> ExampleRetriever {
        ExampleRetriever::new(Arc::new(ExampleStore::new(examples)))
    }

    #[test]
    fn scores_by_shared_words() {
        let r = retriever(default_examples());
        let ranked = r.retrieve("What are the subclasses of Person?", 3);
        assert_eq!(ranked[0].question, "What are the subclasses of X?");
        // 5 of 6 words shared with the best exemplar
        assert!((ranked[0].score - 5.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let r = retriever(vec![
            Example::new("alpha beta", "q1"),
            Example::new("alpha gamma", "q2"),
            Example::new("alpha delta", "q3"),
        ]);
        let ranked = r.retrieve("alpha", 3);
        let queries: Vec<&str> = ranked.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, ["q1", "q2", "q3"]);
    }

    #[test]
    fn empty_store_yields_nothing() {
        assert!(retriever(Vec::new()).retrieve("anything", 5).is_empty());
    }

    #[test]
    fn few_shot_prompt_lists_examples() {
        let prompt = retriever(default_examples()).few_shot_prompt("What is connected to Paris?", 2);
        assert!(prompt.starts_with("Here are some example SPARQL queries:"));
        assert!(prompt.contains("Example 1:\nQuestion: What is connected to X?"));
        assert!(prompt.contains("Example 2:"));
        assert!(!prompt.contains("Example 3:"));
        assert!(prompt.ends_with("Question: What is connected to Paris?\nSPARQL:"));
    }

    #[test]
    fn loads_objects_and_arrays_from_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"question": "Who wrote X?", "sparql": "SELECT ?a WHERE { ?a ?p ?b }"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"[{"question": "Q1", "sparql": "S1", "description": "d"}, {"question": "Q2", "sparql": "S2"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let examples = load_dir(dir.path()).unwrap();
        assert_eq!(examples.len(), 3);
        assert_eq!(examples[0].question, "Who wrote X?");
        assert_eq!(examples[1].description.as_deref(), Some("d"));
    }

    #[test]
    fn missing_or_empty_dir_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(load_dir(dir.path()).unwrap().len(), 3);
        assert_eq!(load_dir(&dir.path().join("missing")).unwrap().len(), 3);
    }

    #[test]
    fn rebuild_swaps_without_touching_old_snapshots() {
        let store = ExampleStore::default();
        let before = store.snapshot();
        store.rebuild(vec![Example::new("q", "s")]);
        assert_eq!(before.len(), 3);
        assert_eq!(store.len(), 1);
    }
}
