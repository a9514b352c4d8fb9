//! End-to-end integration tests for the grape-reason engine.
//!
//! These tests go through the public engine facade and the agent, using
//! in-memory oxigraph stores and on-disk stores under a temp dir.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use grape_reason::agent::{FailureKind, RequestState, Scenario};
use grape_reason::config::GrapeConfig;
use grape_reason::engine::{Engine, EngineConfig};
use grape_reason::error::QueryError;
use grape_reason::exemplar::ExampleStore;
use grape_reason::federation::{
    EndpointDescriptor, EndpointRegistry, FederatedConnector, FederatedQuery, MergedRow,
};
use grape_reason::graph::executor::{CancelToken, QueryExecutor};
use grape_reason::graph::query::{Pattern, Query, QueryResults, Term};
use grape_reason::graph::sparql::{GraphStore, OxigraphStore};
use grape_reason::graph::{Direction, Entity};
use grape_reason::proof::Evidence;

const DATA: &str = r#"
    @prefix ex: <http://ex.org/> .
    @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .

    ex:Paris rdfs:label "Paris" ;
        ex:capitalOf ex:France ;
        ex:locatedIn ex:Europe ;
        ex:twinnedWith ex:Rome .
    ex:France rdfs:label "France" .
    ex:Europe rdfs:label "Europe" .
    ex:Rome rdfs:label "Rome" .
    ex:Atlantis rdfs:label "Atlantis" .

    ex:DrugX rdfs:label "DrugX" ; ex:inhibits ex:ProteinP .
    ex:ProteinP rdfs:label "ProteinP" ; ex:associatedWith ex:DiseaseY .
    ex:DiseaseY rdfs:label "DiseaseY" .
    ex:DrugZ rdfs:label "DrugZ" ; ex:treats ex:DiseaseW .
    ex:DiseaseW rdfs:label "DiseaseW" .
"#;

const REMOTE: &str = r#"
    @prefix ex: <http://ex.org/> .
    @prefix wd: <http://wd.org/> .
    ex:Paris wd:population "2100000" .
    ex:Tokyo wd:population "14000000" .
"#;

fn ex(name: &str) -> Entity {
    Entity::new(format!("http://ex.org/{name}"))
}

fn test_engine() -> Engine {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine.load_turtle(DATA).unwrap();
    engine.rebuild_semantic().unwrap();
    engine
}

fn memory_store(data: &str) -> Arc<OxigraphStore> {
    let store = OxigraphStore::in_memory().unwrap();
    store.load_turtle(data).unwrap();
    Arc::new(store)
}

/// Counts store calls and cancels a token once `cancel_after` calls were made.
struct CountingStore {
    inner: Arc<OxigraphStore>,
    calls: AtomicUsize,
    cancel_after: usize,
    token: CancelToken,
}

impl GraphStore for CountingStore {
    fn execute(&self, query: &Query) -> Result<QueryResults, QueryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.cancel_after {
            self.token.cancel();
        }
        self.inner.execute(query)
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn counting_agent(cancel_after: usize) -> (Arc<CountingStore>, grape_reason::agent::Agent, CancelToken) {
    let token = CancelToken::new();
    let store = Arc::new(CountingStore {
        inner: memory_store(DATA),
        calls: AtomicUsize::new(0),
        cancel_after,
        token: token.clone(),
    });
    let agent = grape_reason::agent::Agent::new(
        QueryExecutor::new(store.clone()),
        Arc::new(ExampleStore::default()),
        Arc::new(EndpointRegistry::new()),
    );
    (store, agent, token)
}

#[test]
fn paris_has_three_outgoing_edges() {
    let engine = test_engine();
    let hood = engine
        .expander()
        .expand(&ex("Paris"), Direction::Outgoing, 50)
        .unwrap();
    assert_eq!(hood.edges.len(), 3);
    assert!(hood.edges.iter().all(|e| e.source == ex("Paris")));
    assert_eq!(hood.center.label.as_deref(), Some("Paris"));
}

#[test]
fn disconnected_pair_has_no_paths() {
    let engine = test_engine();
    let paths = engine
        .explorer()
        .find_paths(&ex("Paris"), &ex("Atlantis"), 4)
        .unwrap();
    assert!(paths.is_empty());
}

#[test]
fn paths_have_the_shortest_distance() {
    let engine = test_engine();
    let explorer = engine.explorer();

    let direct = explorer.find_paths(&ex("Paris"), &ex("Rome"), 3).unwrap();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].len(), 1);

    let two = explorer.find_paths(&ex("France"), &ex("Rome"), 3).unwrap();
    assert!(!two.is_empty());
    assert!(two.iter().all(|p| p.len() == 2));
    assert!(two.iter().all(|p| p.start() == &ex("France") && p.end() == &ex("Rome")));

    assert!(explorer.find_paths(&ex("France"), &ex("Rome"), 1).unwrap().is_empty());
}

#[test]
fn self_path_is_zero_length_and_reach_includes_source() {
    let engine = test_engine();
    let explorer = engine.explorer();
    let paths = explorer.find_paths(&ex("Paris"), &ex("Paris"), 3).unwrap();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].is_empty());

    let reached = explorer.reachable(&ex("Paris"), 1).unwrap();
    assert_eq!(reached[0].entity, ex("Paris"));
    assert_eq!(reached[0].depth, 0);
    assert_eq!(reached.len(), 4);
}

#[test]
fn drug_treats_disease_via_two_hop_path() {
    let engine = test_engine();
    let answer = engine.agent().answer("Does DrugX treat DiseaseY?", None);

    assert!(matches!(answer.scenario, Scenario::Validation { .. }));
    assert!(answer.is_answered(), "{answer:?}");
    assert!(answer.answer_text.starts_with("Yes, indirectly"), "{}", answer.answer_text);
    assert!(answer.confidence > 0.0);
    assert!(answer.transitions.contains(&RequestState::Validating));
    assert!(answer.sources.iter().any(|s| s == "http://ex.org/ProteinP"));
    assert!(answer.evidence_query.as_deref().is_some_and(|q| q.contains("ASK")));
}

#[test]
fn proof_is_monotonic_in_hop_limit() {
    let engine = test_engine();
    let prover = engine.proof_engine();
    let treats = ex("treats");

    let mut held = false;
    for hops in 0..=4 {
        let v = prover
            .validate_within(&ex("DrugX"), &treats, &ex("DiseaseY"), hops)
            .unwrap();
        assert!(!held || v.holds, "held at fewer hops but not at {hops}");
        held = v.holds;
        if hops < 2 {
            assert!(!v.holds);
        }
    }
    assert!(held);

    let direct = prover.validate(&ex("DrugZ"), &treats, &ex("DiseaseW")).unwrap();
    assert!(matches!(direct.evidence, Evidence::Edge(_)));
}

#[test]
fn resolution_is_idempotent() {
    let engine = test_engine();
    let resolver = engine.resolver();
    let first = resolver.resolve("Paris", 5).unwrap();
    let second = resolver.resolve("Paris", 5).unwrap();
    assert_eq!(first, second);

    let best = first.best().unwrap();
    assert_eq!(best.entity, ex("Paris"));
    let again = resolver.resolve(best.entity.display_label(), 5).unwrap();
    assert_eq!(again.best().map(|m| &m.entity), Some(&best.entity));
}

#[test]
fn federation_never_drops_remote_rows() {
    let registry = Arc::new(EndpointRegistry::new());
    registry
        .register("wikidata", EndpointDescriptor::InProcess(memory_store(REMOTE)))
        .unwrap();
    let connector = FederatedConnector::new(QueryExecutor::new(memory_store(DATA)), registry);

    let result = connector
        .federated_query(&FederatedQuery {
            local: vec![Pattern::triple(
                Term::var("city"),
                Term::iri("http://ex.org/capitalOf"),
                Term::var("country"),
            )],
            remote_name: "wikidata".into(),
            remote: vec![Pattern::triple(
                Term::var("city"),
                Term::iri("http://wd.org/population"),
                Term::var("pop"),
            )],
            join_var: "city".into(),
        })
        .unwrap();

    assert_eq!(result.remote_rows, 2);
    let remote_seen = result.rows.iter().filter_map(MergedRow::remote).count();
    assert_eq!(remote_seen, result.remote_rows);
    assert!(result.rows.iter().any(|r| matches!(r, MergedRow::Joined { .. })));
    assert!(result.rows.iter().any(|r| matches!(r, MergedRow::RemoteOnly { .. })));
}

#[test]
fn cancelled_before_start_makes_no_store_calls() {
    let (store, agent, token) = counting_agent(usize::MAX);
    token.cancel();
    let answer = agent.answer_with_cancel("What is Paris?", None, token);

    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    assert_eq!(answer.state, RequestState::Errored);
    assert_eq!(answer.failure.map(|f| f.kind), Some(FailureKind::Cancelled));
}

#[test]
fn cancellation_stops_further_store_calls() {
    let (baseline_store, baseline, token) = counting_agent(usize::MAX);
    let full = baseline.answer_with_cancel("What is Paris?", None, token);
    assert!(full.is_answered(), "{full:?}");
    let total = baseline_store.calls.load(Ordering::SeqCst);
    assert!(total > 2);

    let (store, agent, token) = counting_agent(1);
    let answer = agent.answer_with_cancel("What is Paris?", None, token);
    assert_eq!(answer.state, RequestState::Errored);
    assert_eq!(answer.failure.map(|f| f.kind), Some(FailureKind::Cancelled));
    assert!(store.calls.load(Ordering::SeqCst) < total);
}

#[test]
fn on_disk_store_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EngineConfig {
        store_path: Some(dir.path().join("store")),
        ..Default::default()
    };
    {
        let engine = Engine::new(config.clone()).unwrap();
        let quads = engine.load_turtle(DATA).unwrap();
        assert!(quads > 0);
    }

    let engine = Engine::new(config).unwrap();
    let info = engine.info();
    assert!(info.persistent);
    assert!(info.quad_count.unwrap() > 0);
    assert!(info.semantic_labels.unwrap() > 0);

    let answer = engine.agent().answer("What is Paris?", None);
    assert!(answer.is_answered(), "{answer:?}");
}

#[test]
fn config_file_drives_the_engine() {
    let dir = tempfile::TempDir::new().unwrap();
    let remote_dir = dir.path().join("remote");
    {
        let remote = OxigraphStore::open(&remote_dir).unwrap();
        remote.load_turtle(REMOTE).unwrap();
    }

    let config_path = dir.path().join("grape.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            [limits]
            max_hops = 2

            [semantic]
            enabled = false

            [[federation.endpoints]]
            name = "wikidata"
            path = "{}"
            "#,
            remote_dir.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    let config = GrapeConfig::load(&config_path).unwrap();
    let engine = Engine::new(config.to_engine_config().unwrap()).unwrap();
    engine.load_turtle(DATA).unwrap();

    assert_eq!(engine.config().agent.max_hops, 2);
    assert!(engine.semantic().is_none());
    assert_eq!(engine.registry().names(), vec!["wikidata".to_string()]);

    let answer = engine.agent().answer("What does wikidata say about Paris?", None);
    assert!(matches!(answer.scenario, Scenario::Federation { .. }));
}
