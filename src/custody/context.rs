//! Per-request cancellation and deadline
//!
//! Upload and recognition are the only suspension points that leave the
//! process. Both go through [`RequestContext::run`], which races the call
//! against the request's cancellation token, the stage timeout and the
//! overall deadline. A dropped future never reaches the store.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CustodyError;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context cancelled together with `token` (e.g. a server shutdown
    /// token or a per-connection child token).
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Bound the whole request to `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast if the request was cancelled or its deadline passed.
    pub fn ensure_active(&self) -> Result<(), CustodyError> {
        if self.is_cancelled() {
            return Err(CustodyError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CustodyError::Timeout {
                    stage: "request",
                    after: Duration::ZERO,
                });
            }
        }
        Ok(())
    }

    /// Time budget for a stage: its own limit, capped by the deadline.
    fn budget(&self, limit: Duration) -> Duration {
        self.deadline.map_or(limit, |deadline| {
            limit.min(deadline.saturating_duration_since(Instant::now()))
        })
    }

    /// Run one external call under cancellation and a timeout.
    pub async fn run<F, T, E>(
        &self,
        stage: &'static str,
        limit: Duration,
        fut: F,
    ) -> Result<T, CustodyError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<CustodyError>,
    {
        self.ensure_active()?;
        let budget = self.budget(limit);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                warn!(stage, "Request cancelled");
                Err(CustodyError::Cancelled)
            }
            outcome = tokio::time::timeout(budget, fut) => match outcome {
                Ok(result) => result.map_err(Into::into),
                Err(_) => {
                    warn!(stage, budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX), "Stage timed out");
                    Err(CustodyError::Timeout { stage, after: budget })
                }
            },
        }
    }
}
