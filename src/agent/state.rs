//! The per-request state machine.
//!
//! `Received → ResolvingConcepts → {Expanding | PathFinding | Federating | Validating}*
//! → Narrating → Answered`, with `Errored` reachable from every non-terminal state.

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    ResolvingConcepts,
    Expanding,
    PathFinding,
    Federating,
    Validating,
    Narrating,
    Answered,
    Errored,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Answered | Self::Errored)
    }

    fn is_work(self) -> bool {
        matches!(
            self,
            Self::Expanding | Self::PathFinding | Self::Federating | Self::Validating
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        if next == Self::Errored {
            return !self.is_terminal();
        }
        match self {
            Self::Received => next == Self::ResolvingConcepts,
            Self::ResolvingConcepts => next.is_work() || next == Self::Narrating,
            s if s.is_work() => next.is_work() || next == Self::Narrating,
            Self::Narrating => next == Self::Answered,
            _ => false,
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::ResolvingConcepts => "resolving_concepts",
            Self::Expanding => "expanding",
            Self::PathFinding => "path_finding",
            Self::Federating => "federating",
            Self::Validating => "validating",
            Self::Narrating => "narrating",
            Self::Answered => "answered",
            Self::Errored => "errored",
        };
        write!(f, "{name}")
    }
}

/// Tracks one request's state and every state it has passed through.
#[derive(Debug, Clone)]
pub struct RequestStateMachine {
    history: Vec<RequestState>,
}

impl Default for RequestStateMachine {
    fn default() -> Self {
        Self {
            history: vec![RequestState::Received],
        }
    }
}

impl RequestStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RequestState {
        self.history
            .last()
            .copied()
            .unwrap_or(RequestState::Received)
    }

    /// States in the order they were entered, starting with `Received`.
    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    pub fn advance(&mut self, next: RequestState) -> Result<(), AgentError> {
        let current = self.state();
        if !current.can_advance_to(next) {
            return Err(AgentError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(from = %current, to = %next, "request state");
        self.history.push(next);
        Ok(())
    }

    /// Move to `Errored` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state().is_terminal() {
            tracing::debug!(from = %self.state(), "request errored");
            self.history.push(RequestState::Errored);
        }
    }
}
