//! The question-answering orchestrator.
//!
//! [`Agent::answer`] classifies the question, grounds its fragments in the
//! graph, runs the operations the scenario calls for and narrates the trace.
//! Every outcome, including failures, comes back as an [`Answer`] carrying the
//! reasoning path of whatever ran.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::concept::{ConceptMatch, ConceptResolver, MatchSource, Resolution, normalize};
use crate::error::{AgentError, FederationError, QueryError};
use crate::exemplar::{ExampleRetriever, ExampleStore};
use crate::federation::{EndpointRegistry, FederatedConnector, FederatedQuery};
use crate::graph::executor::{CancelToken, QueryExecutor};
use crate::graph::neighborhood::NeighborhoodExpander;
use crate::graph::query::{Filter, Pattern, Query, Term};
use crate::graph::schema::SchemaBuilder;
use crate::graph::scope::Scope;
use crate::graph::traverse::{ExplorerConfig, PathExplorer};
use crate::graph::{Direction, Entity, Relation};
use crate::narrate::{ReasoningNarrator, ReasoningPath, Trace, TraceOp};
use crate::proof::{Evidence, ProofEngine, ProofPolicy};
use crate::semantic::SemanticIndex;

use super::scenario::{Scenario, classify};
use super::state::{RequestState, RequestStateMachine};

/// Prefix of every negative answer.
pub const NO_ANSWER: &str = "No answer found in the knowledge graph";

/// Longest word window tried when grounding free text.
const MAX_WINDOW: usize = 8;

/// Relations listed in an exploration answer before summarizing the rest.
const LISTED_RELATIONS: usize = 10;

static RE_IRI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<?(https?://[^\s<>]+)>?").unwrap());

/// Tunables for one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Matches kept per resolved fragment.
    pub top_k: usize,
    /// Edges read per direction when exploring a concept.
    pub neighborhood_limit: usize,
    /// Hop bound for path search and proofs.
    pub max_hops: usize,
    pub explorer: ExplorerConfig,
    pub proof_policy: ProofPolicy,
    pub hierarchy_depth: usize,
    /// Edges read per context entity when building a request scope.
    pub scope_limit: usize,
    /// Row cap for each side of a federated query.
    pub row_limit: usize,
    pub example_count: usize,
    /// Deadline for a whole request; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            neighborhood_limit: 50,
            max_hops: 3,
            explorer: ExplorerConfig::default(),
            proof_policy: ProofPolicy::default(),
            hierarchy_depth: 3,
            scope_limit: 100,
            row_limit: 100,
            example_count: 3,
            request_timeout: None,
        }
    }
}

/// Why a request ended `Errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Nothing in the question could be grounded in the graph.
    NoConceptMatch,
    QueryMalformed,
    StoreUnavailable,
    QueryTimeout,
    UnknownEndpoint,
    Cancelled,
    /// The request state machine was driven illegally.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    fn no_concept_match(question: &str) -> Self {
        Self {
            kind: FailureKind::NoConceptMatch,
            message: format!("could not ground \"{question}\" in any known concept"),
        }
    }
}

impl From<QueryError> for Failure {
    fn from(err: QueryError) -> Self {
        let kind = match &err {
            QueryError::Malformed { .. } | QueryError::UnexpectedResult { .. } => {
                FailureKind::QueryMalformed
            }
            QueryError::Timeout { .. } => FailureKind::QueryTimeout,
            QueryError::StoreUnavailable { .. } | QueryError::Rejected { .. } => {
                FailureKind::StoreUnavailable
            }
            QueryError::Cancelled => FailureKind::Cancelled,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<FederationError> for Failure {
    fn from(err: FederationError) -> Self {
        match err {
            FederationError::Query(inner) => inner.into(),
            FederationError::UnknownEndpoint { .. } => Self {
                kind: FailureKind::UnknownEndpoint,
                message: err.to_string(),
            },
            FederationError::Descriptor { .. } => Self {
                kind: FailureKind::StoreUnavailable,
                message: err.to_string(),
            },
        }
    }
}

impl From<AgentError> for Failure {
    fn from(err: AgentError) -> Self {
        Self {
            kind: FailureKind::Internal,
            message: err.to_string(),
        }
    }
}

/// The result of one question-answer cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub scenario: Scenario,
    pub answer_text: String,
    pub reasoning_path: ReasoningPath,
    /// A query that reproduces the supporting evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_query: Option<String>,
    pub state: RequestState,
    pub transitions: Vec<RequestState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    /// Grounding confidence of the answer; 0 for negative outcomes.
    pub confidence: f32,
    /// IRIs of every entity the reasoning touched.
    pub sources: Vec<String>,
}

impl Answer {
    pub fn is_answered(&self) -> bool {
        self.state == RequestState::Answered
    }
}

/// Answers questions over one local store and the registered endpoints.
pub struct Agent {
    executor: QueryExecutor,
    semantic: Option<Arc<SemanticIndex>>,
    examples: Arc<ExampleStore>,
    registry: Arc<EndpointRegistry>,
    config: AgentConfig,
    narrator: ReasoningNarrator,
}

impl Agent {
    pub fn new(
        executor: QueryExecutor,
        examples: Arc<ExampleStore>,
        registry: Arc<EndpointRegistry>,
    ) -> Self {
        Self {
            executor,
            semantic: None,
            examples,
            registry,
            config: AgentConfig::default(),
            narrator: ReasoningNarrator,
        }
    }

    pub fn with_semantic(mut self, index: Option<Arc<SemanticIndex>>) -> Self {
        self.semantic = index;
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer `question`, optionally restricted to `context` and its 1-hop neighborhood.
    pub fn answer(&self, question: &str, context: Option<&[Entity]>) -> Answer {
        let cancel = match self.config.request_timeout {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        };
        self.answer_with_cancel(question, context, cancel)
    }

    /// Like [`Agent::answer`], stopping all store calls once `cancel` fires.
    pub fn answer_with_cancel(
        &self,
        question: &str,
        context: Option<&[Entity]>,
        cancel: CancelToken,
    ) -> Answer {
        let mut request = Request {
            agent: self,
            question,
            executor: self.executor.with_cancel(cancel.clone()),
            scope: None,
            trace: Trace::new(),
            machine: RequestStateMachine::new(),
        };

        let scenario = classify(question, &self.registry.names());
        request.trace.push(TraceOp::Classify {
            scenario: scenario.clone(),
        });
        tracing::info!(question, scenario = %scenario, "answering question");

        let result = request.run(&scenario, context);
        let result = result.and_then(|outcome| {
            request.advance(RequestState::Narrating)?;
            Ok(outcome)
        });

        let (answer_text, confidence, evidence_query, failure) = match result {
            Ok(outcome) => (
                outcome.text,
                outcome.confidence,
                outcome.evidence.map(|q| q.to_sparql()),
                None,
            ),
            Err(mut failure) => {
                if failure.kind == FailureKind::Cancelled && cancel.deadline_passed() {
                    failure = Failure {
                        kind: FailureKind::QueryTimeout,
                        message: "request deadline exceeded".into(),
                    };
                }
                request.machine.fail();
                tracing::warn!(kind = ?failure.kind, message = %failure.message, "request errored");
                (
                    format!("{NO_ANSWER}: {}", failure.message),
                    0.0,
                    None,
                    Some(failure),
                )
            }
        };

        let reasoning_path = self.narrator.narrate(&request.trace, answer_text.clone());
        if request.machine.state() == RequestState::Narrating {
            if let Err(err) = request.machine.advance(RequestState::Answered) {
                tracing::error!(error = %err, "could not finish request");
            }
        }

        let sources = reasoning_path.nodes.iter().map(|n| n.iri.clone()).collect();
        let state = request.machine.state();
        tracing::info!(state = %state, confidence, steps = reasoning_path.steps.len(), "request finished");
        Answer {
            question: question.to_string(),
            scenario,
            answer_text,
            reasoning_path,
            evidence_query,
            state,
            transitions: request.machine.history().to_vec(),
            failure,
            confidence,
            sources,
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("store", &self.executor.store().name())
            .field("semantic", &self.semantic.is_some())
            .field("examples", &self.examples.len())
            .field("endpoints", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

/// What a successful scenario produced.
struct Outcome {
    text: String,
    confidence: f32,
    evidence: Option<Query>,
}

impl Outcome {
    fn negative(reason: impl std::fmt::Display) -> Self {
        Self {
            text: format!("{NO_ANSWER}: {reason}"),
            confidence: 0.0,
            evidence: None,
        }
    }
}

/// Request-local state. Nothing here outlives the request.
struct Request<'a> {
    agent: &'a Agent,
    question: &'a str,
    executor: QueryExecutor,
    scope: Option<Scope>,
    trace: Trace,
    machine: RequestStateMachine,
}

impl Request<'_> {
    fn run(&mut self, scenario: &Scenario, context: Option<&[Entity]>) -> Result<Outcome, Failure> {
        self.advance(RequestState::ResolvingConcepts)?;

        if let Some(context) = context.filter(|c| !c.is_empty()) {
            let expander = NeighborhoodExpander::new(self.executor.clone());
            let limit = self.agent.config.scope_limit;
            let scope = self.traced(
                "scope",
                || Scope::around(&expander, context, limit),
                |scope| TraceOp::Scope {
                    context: context.to_vec(),
                    allowed: scope.len(),
                },
            )?;
            self.scope = Some(scope);
        }

        let specific = match scenario {
            Scenario::ConceptExploration { focus } => return self.explore(focus),
            Scenario::PathFinding { source, target } => self.find_paths(source, target)?,
            Scenario::Federation { focus, remote } => self.federate(focus, remote)?,
            Scenario::Validation { claim } => self.validate(claim)?,
        };
        match specific {
            Some(outcome) => Ok(outcome),
            None => {
                tracing::info!("grounding failed, exploring the whole question");
                let question = self.question;
                self.explore(question)
            }
        }
    }

    fn advance(&mut self, next: RequestState) -> Result<(), Failure> {
        Ok(self.machine.advance(next)?)
    }

    /// Run one operation under a dispatch-time sequence number. Failures are
    /// recorded too, so a partial trace still shows what was attempted.
    fn traced<T, E>(
        &self,
        operation: &str,
        run: impl FnOnce() -> Result<T, E>,
        record: impl FnOnce(&T) -> TraceOp,
    ) -> Result<T, Failure>
    where
        E: Into<Failure> + std::fmt::Display,
    {
        let seq = self.trace.dispatch();
        match run() {
            Ok(value) => {
                self.trace.record(seq, record(&value));
                Ok(value)
            }
            Err(err) => {
                self.trace.record(seq, TraceOp::Failed {
                    operation: operation.to_string(),
                    error: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    fn resolver(&self) -> ConceptResolver {
        ConceptResolver::new(self.executor.clone())
            .with_semantic(self.agent.semantic.clone())
            .with_scope(self.scope.clone())
    }

    fn expander(&self) -> NeighborhoodExpander {
        NeighborhoodExpander::new(self.executor.clone()).with_scope(self.scope.clone())
    }

    fn explorer(&self) -> PathExplorer {
        PathExplorer::new(self.expander(), self.agent.config.explorer.clone())
    }

    /// The best match for `text`: the whole text first, then ever smaller word
    /// windows. The first window size with any match wins.
    fn ground(&self, text: &str) -> Result<Option<ConceptMatch>, Failure> {
        let resolver = self.resolver();
        for group in fragment_windows(text) {
            let seqs: Vec<u64> = group.iter().map(|_| self.trace.dispatch()).collect();
            let resolutions = match resolver.resolve_many(&group, self.agent.config.top_k) {
                Ok(resolutions) => resolutions,
                Err(err) => {
                    self.trace.record(seqs[0], TraceOp::Failed {
                        operation: "resolve".into(),
                        error: err.to_string(),
                    });
                    return Err(err.into());
                }
            };

            let mut best: Option<ConceptMatch> = None;
            for ((seq, fragment), resolution) in seqs.into_iter().zip(group).zip(resolutions) {
                if let Some(candidate) = resolution.best() {
                    if best.as_ref().is_none_or(|b| outranks(candidate, b)) {
                        best = Some(candidate.clone());
                    }
                }
                self.trace.record(seq, TraceOp::Resolve {
                    fragment,
                    resolution,
                });
            }
            if best.is_some() {
                return Ok(best);
            }
        }
        Ok(None)
    }

    fn explore(&mut self, text: &str) -> Result<Outcome, Failure> {
        let Some(grounded) = self.ground(text)? else {
            return Err(Failure::no_concept_match(self.question));
        };
        self.advance(RequestState::Expanding)?;
        let agent = self.agent;
        let config = &agent.config;

        let expander = self.expander();
        let hood = self.traced(
            "expand",
            || expander.expand(&grounded.entity, Direction::Both, config.neighborhood_limit),
            |hood| TraceOp::Expand {
                neighborhood: hood.clone(),
            },
        )?;

        let builder = SchemaBuilder::new(self.executor.clone()).with_hierarchy_depth(config.hierarchy_depth);
        let schema = self.traced(
            "schema",
            || builder.build(std::slice::from_ref(&hood.center)),
            |context| TraceOp::Schema {
                context: context.clone(),
            },
        )?;

        let examples = ExampleRetriever::new(Arc::clone(&agent.examples))
            .retrieve(self.question, config.example_count);
        self.trace.push(TraceOp::Examples { examples });

        let center = &hood.center;
        if hood.is_empty() {
            return Ok(Outcome::negative(format!("{center} has no recorded relations")));
        }

        let mut text = format!(
            "{center} <{}> has {} relations: {}",
            center.iri,
            hood.edges.len(),
            hood.edges
                .iter()
                .take(LISTED_RELATIONS)
                .map(Relation::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        );
        if hood.edges.len() > LISTED_RELATIONS {
            text.push_str(&format!(" and {} more", hood.edges.len() - LISTED_RELATIONS));
        }
        text.push('.');
        if !schema.classes.is_empty() {
            let classes: Vec<String> = schema.classes.iter().map(Entity::to_string).collect();
            text.push_str(&format!(" Related classes: {}.", classes.join(", ")));
        }

        // Both directions, each capped like the expansion that produced the answer.
        let evidence = Query::select(["s", "p", "o"])
            .distinct()
            .pattern(Pattern::Union(vec![
                vec![
                    Pattern::triple(Term::iri(&center.iri), Term::var("p"), Term::var("o")),
                    Pattern::Raw("FILTER(isIRI(?o))".into()),
                ],
                vec![
                    Pattern::triple(Term::var("s"), Term::var("p"), Term::iri(&center.iri)),
                    Pattern::Raw("FILTER(isIRI(?s))".into()),
                ],
            ]))
            .limit(config.neighborhood_limit.saturating_mul(2));
        Ok(Outcome {
            text,
            confidence: grounded.confidence,
            evidence: Some(evidence),
        })
    }

    fn find_paths(&mut self, source: &str, target: &str) -> Result<Option<Outcome>, Failure> {
        let Some(from) = self.ground(source)? else {
            return Ok(None);
        };
        let Some(to) = self.ground(target)? else {
            return Ok(None);
        };
        self.advance(RequestState::PathFinding)?;

        let max_hops = self.agent.config.max_hops;
        let explorer = self.explorer();
        let paths = self.traced(
            "find_paths",
            || explorer.find_paths(&from.entity, &to.entity, max_hops),
            |paths| TraceOp::FindPaths {
                source: from.entity.clone(),
                target: to.entity.clone(),
                max_hops,
                paths: paths.clone(),
            },
        )?;

        let Some(first) = paths.first() else {
            return Ok(Some(Outcome::negative(format!(
                "no path from {} to {} within {max_hops} hops",
                from.entity, to.entity
            ))));
        };
        let text = if first.is_empty() {
            format!("{} and {} are the same entity.", from.entity, to.entity)
        } else {
            let shown: Vec<String> = paths.iter().take(3).map(|p| p.to_string()).collect();
            format!(
                "{} is connected to {} by {} path(s) of length {}: {}",
                from.entity,
                to.entity,
                paths.len(),
                first.len(),
                shown.join("; ")
            )
        };
        Ok(Some(Outcome {
            text,
            confidence: from.confidence.min(to.confidence),
            evidence: ask_for(first.relations()),
        }))
    }

    fn federate(&mut self, focus: &str, remote: &str) -> Result<Option<Outcome>, Failure> {
        let Some(grounded) = self.ground(focus)? else {
            return Ok(None);
        };
        self.advance(RequestState::Federating)?;
        let entity = &grounded.entity;

        let connector = FederatedConnector::new(self.executor.clone(), Arc::clone(&self.agent.registry))
            .with_row_limit(self.agent.config.row_limit);
        let alignments = self.traced(
            "align",
            || connector.find_alignments(entity, remote),
            |alignments| TraceOp::Align {
                entity: entity.clone(),
                remote: remote.to_string(),
                alignments: alignments.clone(),
            },
        )?;

        let mut concepts = vec![entity.iri.clone()];
        for a in &alignments {
            if !concepts.contains(&a.aligned.iri) {
                concepts.push(a.aligned.iri.clone());
            }
        }
        let request = FederatedQuery {
            local: vec![Pattern::values("concept", [entity.iri.clone()])],
            remote_name: remote.to_string(),
            remote: vec![
                Pattern::values("concept", concepts),
                Pattern::triple(Term::var("concept"), Term::var("property"), Term::var("value")),
            ],
            join_var: "concept".into(),
        };
        let result = self.traced(
            "federate",
            || connector.federated_query(&request),
            |result| TraceOp::Federate {
                remote: remote.to_string(),
                result: result.clone(),
            },
        )?;

        if result.remote_rows == 0 {
            return Ok(Some(Outcome::negative(format!("{remote} has no facts about {entity}"))));
        }
        let facts: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.remote())
            .filter_map(|row| {
                let property = Entity::new(row.iri("property")?);
                let value = match row.get("value")? {
                    v if v.as_iri().is_some() => Entity::new(v.lexical()).local_name().to_string(),
                    v => v.lexical().to_string(),
                };
                Some(format!("{} {value}", property.local_name()))
            })
            .take(LISTED_RELATIONS)
            .collect();
        let text = format!(
            "{remote} has {} facts about {entity} (through {} alignments): {}",
            result.remote_rows,
            alignments.len(),
            facts.join("; ")
        );
        Ok(Some(Outcome {
            text,
            confidence: grounded.confidence,
            evidence: Some(Query::select_all().patterns(request.remote)),
        }))
    }

    fn validate(&mut self, claim: &str) -> Result<Option<Outcome>, Failure> {
        let Some((subject, predicate, object, confidence)) = self.parse_claim(claim)? else {
            return Ok(None);
        };
        self.advance(RequestState::Validating)?;

        let config = &self.agent.config;
        let engine = ProofEngine::new(self.executor.clone(), self.explorer()).with_policy(config.proof_policy);
        let validation = self.traced(
            "validate",
            || engine.validate_within(&subject, &predicate, &object, config.max_hops),
            |v| TraceOp::Validate {
                validation: v.clone(),
            },
        )?;

        let checked = Relation::new(subject, predicate, object);
        let outcome = match &validation.evidence {
            Evidence::Edge(edge) => Outcome {
                text: format!("Yes: {edge} is stated directly in the knowledge graph."),
                confidence,
                evidence: ask_for(std::iter::once(edge)),
            },
            Evidence::Path(path) => Outcome {
                text: format!(
                    "Yes, indirectly: {} is linked to {} through a {}-hop path: {path}",
                    checked.source,
                    checked.target,
                    path.len()
                ),
                confidence: confidence * 0.75,
                evidence: ask_for(path.relations()),
            },
            Evidence::None => Outcome {
                evidence: ask_for(std::iter::once(&checked)),
                ..Outcome::negative(format!(
                    "no evidence that {checked} within {} hops",
                    validation.hop_limit
                ))
            },
        };
        Ok(Some(outcome))
    }

    /// Split a claim into subject, predicate and object.
    ///
    /// Three IRIs are taken literally. Otherwise each interior word is tried as
    /// the predicate (matched against predicate IRIs) with the words before and
    /// after it grounded as subject and object.
    fn parse_claim(&self, claim: &str) -> Result<Option<(Entity, Entity, Entity, f32)>, Failure> {
        let iris: Vec<&str> = RE_IRI
            .captures_iter(claim)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if let [s, p, o, ..] = iris[..] {
            return Ok(Some((Entity::new(s), Entity::new(p), Entity::new(o), 1.0)));
        }

        let words: Vec<&str> = claim.split_whitespace().collect();
        for i in 1..words.len().saturating_sub(1) {
            if normalize(words[i]).is_empty() {
                continue;
            }
            let Some(predicate) = self.find_predicate(words[i])? else {
                continue;
            };
            let Some(subject) = self.ground(&words[..i].join(" "))? else {
                continue;
            };
            let Some(object) = self.ground(&words[i + 1..].join(" "))? else {
                continue;
            };
            let confidence = subject.confidence.min(object.confidence);
            return Ok(Some((subject.entity, predicate, object.entity, confidence)));
        }
        Ok(None)
    }

    /// A predicate whose IRI local name contains `word`, trying simple stems
    /// when the word itself matches nothing.
    fn find_predicate(&self, word: &str) -> Result<Option<Entity>, Failure> {
        let needle = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        for stem in stems(&needle) {
            let query = Query::select(["p"])
                .distinct()
                .pattern(Pattern::triple(Term::var("s"), Term::var("p"), Term::var("o")))
                .filter(Filter::LabelContains {
                    var: "p".into(),
                    text: stem.clone(),
                })
                .limit(50);
            let executor = &self.executor;
            let resolution = self.traced(
                "resolve",
                || {
                    executor.execute(&query).map(|rows| {
                        let candidates = rows.iter().filter_map(|r| r.iri("p").map(Entity::new)).collect();
                        predicate_resolution(&stem, candidates)
                    })
                },
                |resolution| TraceOp::Resolve {
                    fragment: stem.clone(),
                    resolution: resolution.clone(),
                },
            )?;
            if let Some(found) = resolution.best() {
                tracing::debug!(word, predicate = %found.entity.iri, "matched predicate");
                return Ok(Some(found.entity.clone()));
            }
        }
        Ok(None)
    }
}

/// Whether `a` should replace `b` as the best grounding.
fn outranks(a: &ConceptMatch, b: &ConceptMatch) -> bool {
    let a_exact = a.source == MatchSource::Exact;
    let b_exact = b.source == MatchSource::Exact;
    (a_exact && !b_exact) || (a_exact == b_exact && a.confidence > b.confidence)
}

/// Word windows of `text`, grouped by size, largest first. Windows that
/// normalize to nothing or to an already-seen fragment are skipped.
fn fragment_windows(text: &str) -> Vec<Vec<String>> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut seen = HashSet::new();
    let mut groups = Vec::new();

    let mut keep = |fragment: String, group: &mut Vec<String>| {
        let key = normalize(&fragment);
        if !key.is_empty() && seen.insert(key) {
            group.push(fragment);
        }
    };

    if words.len() > MAX_WINDOW {
        let mut whole = Vec::new();
        keep(words.join(" "), &mut whole);
        if !whole.is_empty() {
            groups.push(whole);
        }
    }
    for size in (1..=words.len().min(MAX_WINDOW)).rev() {
        let mut group = Vec::new();
        for window in words.windows(size) {
            keep(window.join(" "), &mut group);
        }
        if !group.is_empty() {
            groups.push(group);
        }
    }
    groups
}

/// `word`, then the word without a trailing "s", "es" or "ed".
fn stems(word: &str) -> Vec<String> {
    let mut out = vec![word.to_string()];
    for suffix in ["es", "ed", "s"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.chars().count() >= 3 && !out.iter().any(|s| s == stem) {
                out.push(stem.to_string());
            }
        }
    }
    out.retain(|s| s.chars().count() >= 3);
    out
}

/// Rank predicate IRIs for `stem`: local name equal, then prefix, then
/// containment; shorter local names first within a tier.
fn predicate_resolution(stem: &str, candidates: Vec<Entity>) -> Resolution {
    let mut scored: Vec<(u8, Entity)> = candidates
        .into_iter()
        .filter_map(|p| {
            let local = p.local_name().to_lowercase();
            let tier = if local == stem {
                0
            } else if local.starts_with(stem) {
                1
            } else if local.contains(stem) {
                2
            } else {
                return None;
            };
            Some((tier, p))
        })
        .collect();
    scored.sort_by(|(ta, a), (tb, b)| {
        ta.cmp(tb)
            .then_with(|| a.local_name().len().cmp(&b.local_name().len()))
            .then_with(|| a.iri.cmp(&b.iri))
    });
    let matches = scored
        .into_iter()
        .map(|(tier, entity)| {
            let ratio = stem.len() as f32 / entity.local_name().len().max(1) as f32;
            ConceptMatch {
                confidence: if tier == 0 { 1.0 } else { (0.9 * ratio).min(0.9) },
                source: if tier == 0 {
                    MatchSource::Exact
                } else {
                    MatchSource::Lexical
                },
                entity,
            }
        })
        .collect();
    Resolution {
        matches,
        semantic_available: false,
        lexical_fallback: false,
    }
}

/// An ASK query holding every given relation, or `None` when there are none.
fn ask_for<'r>(relations: impl Iterator<Item = &'r Relation>) -> Option<Query> {
    let patterns: Vec<Pattern> = relations
        .map(|r| {
            Pattern::triple(
                Term::iri(&r.source.iri),
                Term::iri(&r.predicate.iri),
                Term::iri(&r.target.iri),
            )
        })
        .collect();
    if patterns.is_empty() {
        None
    } else {
        Some(Query::ask().patterns(patterns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::EndpointDescriptor;
    use crate::graph::query::QueryResults;
    use crate::graph::sparql::OxigraphStore;

    const CITIES: &str = r#"
        @prefix ex: <http://ex.org/> .
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
        @prefix owl: <http://www.w3.org/2002/07/owl#> .
        ex:Paris rdfs:label "Paris" ;
            a ex:City ;
            ex:capitalOf ex:France ;
            ex:twinnedWith ex:Rome .
        ex:France rdfs:label "France" .
        ex:Rome rdfs:label "Rome" .
        ex:City rdfs:label "City" ; rdfs:subClassOf ex:Place .
        ex:Berlin rdfs:label "Berlin" .
        ex:Paris owl:sameAs <http://remote.org/Q90> .
    "#;

    const REMOTE: &str = r#"
        @prefix r: <http://remote.org/> .
        r:Q90 r:population "2100000" ;
            r:mayor r:Hidalgo .
    "#;

    fn store(data: &str) -> Arc<OxigraphStore> {
        let store = OxigraphStore::in_memory().unwrap();
        store.load_turtle(data).unwrap();
        Arc::new(store)
    }

    fn agent() -> Agent {
        let registry = Arc::new(EndpointRegistry::new());
        registry
            .register("wikidata", EndpointDescriptor::InProcess(store(REMOTE)))
            .unwrap();
        Agent::new(
            QueryExecutor::new(store(CITIES)),
            Arc::new(ExampleStore::default()),
            registry,
        )
    }

    #[test]
    fn exploration_lists_relations() {
        let answer = agent().answer("What is Paris?", None);
        assert!(answer.is_answered(), "{answer:?}");
        assert!(answer.answer_text.starts_with("Paris <http://ex.org/Paris> has"));
        assert!(answer.answer_text.contains("Paris -capitalOf-> France"));
        assert!(answer.evidence_query.as_deref().unwrap().contains("<http://ex.org/Paris> ?p ?o"));
        assert_eq!(answer.confidence, 1.0);
        assert_eq!(
            answer.transitions,
            [
                RequestState::Received,
                RequestState::ResolvingConcepts,
                RequestState::Expanding,
                RequestState::Narrating,
                RequestState::Answered
            ]
        );
        let ops: Vec<&str> = answer
            .reasoning_path
            .steps
            .iter()
            .map(|s| s.operation.as_str())
            .collect();
        assert_eq!(ops, ["classify", "resolve", "expand", "schema", "examples"]);
    }

    #[test]
    fn exploration_evidence_covers_incoming_edges() {
        let answer = agent().answer("What is France?", None);
        assert!(answer.is_answered(), "{answer:?}");
        assert!(answer.answer_text.contains("has 1 relations"), "{}", answer.answer_text);
        assert!(answer.answer_text.contains("Paris -capitalOf-> France"));

        let evidence = answer.evidence_query.unwrap();
        assert!(evidence.contains("UNION"));
        assert!(evidence.contains("?s ?p <http://ex.org/France>"));

        let QueryResults::Solutions(rows) = store(CITIES).execute_sparql(&evidence).unwrap() else {
            panic!("expected solutions");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].iri("s"), Some("http://ex.org/Paris"));
        assert_eq!(rows[0].iri("p"), Some("http://ex.org/capitalOf"));
    }

    #[test]
    fn unknown_concepts_end_errored_without_fabricating() {
        let answer = agent().answer("What is Atlantis?", None);
        assert_eq!(answer.state, RequestState::Errored);
        assert_eq!(answer.failure.as_ref().unwrap().kind, FailureKind::NoConceptMatch);
        assert!(answer.answer_text.starts_with(NO_ANSWER));
        assert!(answer.answer_text.contains("could not ground"));
        assert!(answer.evidence_query.is_none());
        assert!(!answer.reasoning_path.steps.is_empty());
    }

    #[test]
    fn path_question_reports_connection() {
        let answer = agent().answer("How is Rome related to France?", None);
        assert!(answer.is_answered());
        assert!(matches!(answer.scenario, Scenario::PathFinding { .. }));
        assert!(answer.answer_text.contains("path(s) of length 2"));
        assert!(answer.transitions.contains(&RequestState::PathFinding));
        let ask = answer.evidence_query.unwrap();
        assert!(ask.starts_with("ASK"));
        assert!(ask.contains("<http://ex.org/twinnedWith>"));
    }

    #[test]
    fn disconnected_pair_is_a_negative_answer() {
        let answer = agent().answer("How is Berlin related to France?", None);
        assert!(answer.is_answered());
        assert!(answer.answer_text.starts_with(NO_ANSWER));
        assert_eq!(answer.confidence, 0.0);
    }

    #[test]
    fn failed_path_grounding_falls_back_to_exploration() {
        let answer = agent().answer("How is Atlantis related to Paris?", None);
        assert!(answer.is_answered());
        assert!(matches!(answer.scenario, Scenario::PathFinding { .. }));
        assert!(answer.transitions.contains(&RequestState::Expanding));
        assert!(answer.answer_text.starts_with("Paris"));
    }

    #[test]
    fn validation_finds_direct_triple() {
        let answer = agent().answer("Is Paris the capital of France?", None);
        assert!(matches!(answer.scenario, Scenario::Validation { .. }));
        assert!(answer.answer_text.starts_with("Yes:"), "{}", answer.answer_text);
        assert!(answer.transitions.contains(&RequestState::Validating));
    }

    #[test]
    fn federation_keeps_remote_facts() {
        let answer = agent().answer("What does wikidata say about Paris?", None);
        assert!(answer.is_answered(), "{answer:?}");
        assert!(answer.answer_text.starts_with("wikidata has 2 facts about Paris"));
        assert!(answer.answer_text.contains("population 2100000"));
        assert!(answer.sources.iter().any(|s| s == "http://remote.org/Q90"));
    }

    #[test]
    fn cancelled_request_errors_with_partial_trace() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let answer = agent().answer_with_cancel("What is Paris?", None, cancel);
        assert_eq!(answer.state, RequestState::Errored);
        assert_eq!(answer.failure.unwrap().kind, FailureKind::Cancelled);
        assert_eq!(answer.reasoning_path.steps[0].operation, "classify");
        assert_eq!(answer.reasoning_path.steps[1].operation, "failed");
    }

    #[test]
    fn context_scope_restricts_grounding() {
        let context = [Entity::new("http://ex.org/Berlin")];
        let answer = agent().answer("What is Paris?", Some(&context));
        assert_eq!(answer.state, RequestState::Errored);
        assert_eq!(answer.reasoning_path.steps[1].operation, "scope");
    }

    #[test]
    fn windows_shrink_and_skip_stopwords() {
        let groups = fragment_windows("connected to Paris");
        assert_eq!(groups[0], ["connected to Paris"]);
        assert_eq!(groups[1], ["connected to", "to Paris"]);
        // Every single word is a stopword or normalizes like a larger window.
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn predicate_ranking_prefers_exact_then_prefix() {
        let r = predicate_resolution(
            "treat",
            vec![
                Entity::new("http://ex.org/mistreats"),
                Entity::new("http://ex.org/treatsCondition"),
                Entity::new("http://ex.org/treats"),
            ],
        );
        let names: Vec<&str> = r.matches.iter().map(|m| m.entity.local_name()).collect();
        assert_eq!(names, ["treats", "treatsCondition", "mistreats"]);
        assert_eq!(stems("inhibited"), ["inhibited", "inhibit"]);
    }
}
