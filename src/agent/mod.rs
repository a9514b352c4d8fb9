//! Agent layer: answers natural-language questions over the graph.
//!
//! The agent wraps the graph components and adds:
//! - **Classification** of a question into a closed [`Scenario`]
//! - **Grounding** of question fragments through the concept resolver
//! - **A request state machine** (`Received → … → Answered | Errored`)
//! - **Narration** of every operation into a [`ReasoningPath`](crate::narrate::ReasoningPath)

pub mod orchestrator;
pub mod scenario;
pub mod state;

pub use orchestrator::{Agent, AgentConfig, Answer, Failure, FailureKind, NO_ANSWER};
pub use scenario::{Scenario, classify};
pub use state::{RequestState, RequestStateMachine};
