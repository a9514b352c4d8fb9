//! Query execution with retry and request cancellation.
//!
//! Every store call in the crate goes through [`QueryExecutor`]. It is the only
//! place that retries: transient failures (`Timeout`, `StoreUnavailable`) are
//! retried with capped exponential backoff, everything else propagates at once.
//! A [`CancelToken`] is checked before each attempt, so a cancelled request
//! never reaches the store again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::QueryError;

use super::query::{Query, QueryResults, Row};
use super::sparql::GraphStore;

/// Granularity of cancellable waits.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Request-scoped cancellation: an explicit flag plus an optional deadline.
///
/// Clones share the flag, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The deadline, if any, has passed.
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<(), QueryError> {
        if self.is_cancelled() {
            Err(QueryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if the token fires.
    pub fn sleep(&self, duration: Duration) -> Result<(), QueryError> {
        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(until - now));
        }
    }
}

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let wait = self.initial_backoff.as_secs_f64() * factor;
        if !wait.is_finite() || wait >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(wait)
        }
    }

    pub fn is_retryable(&self, error: &QueryError) -> bool {
        error.is_transient()
    }
}

/// Runs structured queries against one store.
///
/// Cheap to clone; [`QueryExecutor::with_cancel`] derives a request-scoped
/// executor sharing the same store.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn GraphStore>,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// A copy of this executor bound to `token`.
    pub fn with_cancel(&self, token: CancelToken) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            cancel: token,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run a query, retrying transient failures per the policy.
    pub fn run(&self, query: &Query) -> Result<QueryResults, QueryError> {
        let mut attempt = 0u32;
        loop {
            self.cancel.check()?;
            tracing::debug!(store = self.store.name(), attempt, "dispatching query");
            match self.store.execute(query) {
                Ok(results) => {
                    // A result that lands after cancellation is discarded.
                    self.cancel.check()?;
                    return Ok(results);
                }
                Err(err) if self.policy.is_retryable(&err) && attempt < self.policy.max_retries => {
                    let wait = self.policy.backoff(attempt);
                    tracing::warn!(
                        store = self.store.name(),
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "transient store failure, retrying"
                    );
                    self.cancel.sleep(wait)?;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!(store = self.store.name(), error = %err, "query failed");
                    return Err(err);
                }
            }
        }
    }

    /// Run a SELECT and return its rows in store order.
    pub fn execute(&self, query: &Query) -> Result<Vec<Row>, QueryError> {
        match self.run(query)? {
            QueryResults::Solutions(rows) => Ok(rows),
            QueryResults::Boolean(_) => Err(QueryError::UnexpectedResult {
                expected: "solutions",
            }),
        }
    }

    /// Run an ASK.
    pub fn ask(&self, query: &Query) -> Result<bool, QueryError> {
        match self.run(query)? {
            QueryResults::Boolean(b) => Ok(b),
            QueryResults::Solutions(_) => Err(QueryError::UnexpectedResult { expected: "boolean" }),
        }
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("store", &self.store.name())
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
