use crate::{
    cb::{CircuitBreaker, CircuitBreakerState},
    error::{OperationError, RemoteCallError},
};
use async_trait::async_trait;
use std::{fmt, sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{Instant, sleep, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one status query observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus<S> {
    Running,
    Succeeded(S),
    Failed(String),
}

/// An asynchronous remote operation that is started once and then polled.
#[async_trait]
pub trait RemoteOperation: Send + Sync {
    type Handle: fmt::Display + Send + Sync;
    type Status: Send;
    type Output: Send;

    fn name(&self) -> &str;

    /// Starts the operation. Errors here are `CannotStart`.
    async fn initiate(&self) -> Result<Self::Handle, OperationError>;

    async fn status(
        &self,
        handle: &Self::Handle,
    ) -> Result<OperationStatus<Self::Status>, RemoteCallError>;

    /// Interprets a successful terminal status. Errors here are `ResultProcessing`.
    async fn handle_success(
        &self,
        handle: &Self::Handle,
        status: Self::Status,
    ) -> Result<Self::Output, OperationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    /// Query up to `max_attempts` times, sleeping `interval` in between.
    Attempts { max_attempts: usize, interval: Duration },
    /// Query every `interval` until `timeout` has elapsed since the first query.
    Deadline { interval: Duration, timeout: Duration },
}

impl PollStrategy {
    fn describe(&self) -> String {
        match self {
            PollStrategy::Attempts {
                max_attempts,
                interval,
            } => format!("{max_attempts} attempts at {interval:?}"),
            PollStrategy::Deadline { timeout, .. } => format!("{timeout:?}"),
        }
    }
}

/// Drives a [`RemoteOperation`] to a terminal outcome.
#[derive(Clone)]
pub struct Poller {
    strategy: PollStrategy,
    breaker: CircuitBreaker,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(strategy: PollStrategy) -> Self {
        Self {
            strategy,
            breaker: CircuitBreaker::for_status_queries(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_query_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn strategy(&self) -> PollStrategy {
        self.strategy
    }

    /// Starts the operation and polls it.
    pub async fn run<O: RemoteOperation>(&self, op: &O) -> Result<O::Output, OperationError> {
        let handle = op.initiate().await?;
        info!(operation = op.name(), handle = %handle, "Remote operation started");
        self.poll_until_terminal(op, &handle).await
    }

    /// Polls in the background; the returned handle resolves with the outcome.
    pub fn spawn<O>(
        self,
        op: Arc<O>,
        handle: O::Handle,
    ) -> JoinHandle<Result<O::Output, OperationError>>
    where
        O: RemoteOperation + 'static,
        O::Handle: 'static,
    {
        tokio::spawn(async move { self.poll_until_terminal(op.as_ref(), &handle).await })
    }

    pub async fn poll_until_terminal<O: RemoteOperation>(
        &self,
        op: &O,
        handle: &O::Handle,
    ) -> Result<O::Output, OperationError> {
        let mut breaker = self.breaker.clone();
        match self.strategy {
            PollStrategy::Attempts {
                max_attempts,
                interval,
            } => {
                let max_attempts = max_attempts.max(1);
                for attempt in 1..=max_attempts {
                    if let Some(output) = self.check(op, handle, &mut breaker).await? {
                        return Ok(output);
                    }
                    debug!(operation = op.name(), attempt, max_attempts, "Still running");
                    if attempt < max_attempts {
                        self.pause(op, interval).await?;
                    }
                }
                Err(self.timed_out(op))
            }
            PollStrategy::Deadline { interval, timeout } => {
                let deadline = Instant::now() + timeout;
                loop {
                    let step = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(cancelled(op)),
                        _ = sleep_until(deadline) => return Err(self.timed_out(op)),
                        step = self.check(op, handle, &mut breaker) => step?,
                    };
                    if let Some(output) = step {
                        return Ok(output);
                    }
                    debug!(operation = op.name(), "Still running");

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(cancelled(op)),
                        _ = sleep_until(deadline) => return Err(self.timed_out(op)),
                        _ = sleep(interval) => {}
                    }
                }
            }
        }
    }

    /// One status query. `None` means not terminal yet.
    async fn check<O: RemoteOperation>(
        &self,
        op: &O,
        handle: &O::Handle,
        breaker: &mut CircuitBreaker,
    ) -> Result<Option<O::Output>, OperationError> {
        match op.status(handle).await {
            Ok(OperationStatus::Running) => {
                breaker.record_success();
                Ok(None)
            }
            Ok(OperationStatus::Succeeded(status)) => {
                info!(operation = op.name(), handle = %handle, "Remote operation succeeded");
                op.handle_success(handle, status).await.map(Some)
            }
            Ok(OperationStatus::Failed(reason)) => {
                warn!(operation = op.name(), handle = %handle, reason = %reason, "Remote operation failed");
                Err(OperationError::Unsuccessful {
                    operation: op.name().to_string(),
                    reason,
                })
            }
            Err(RemoteCallError::Transient(reason)) => match breaker.record_failure() {
                CircuitBreakerState::RetryAfter(delay) => {
                    warn!(operation = op.name(), reason = %reason, ?delay, "Status query failed, retrying");
                    self.pause(op, delay).await?;
                    Ok(None)
                }
                CircuitBreakerState::Open { failures } => Err(OperationError::Query {
                    operation: op.name().to_string(),
                    source: RemoteCallError::Transient(format!(
                        "{reason} ({failures} consecutive failures)"
                    )),
                }),
            },
            Err(e @ RemoteCallError::Rejected(_)) => Err(OperationError::Query {
                operation: op.name().to_string(),
                source: e,
            }),
        }
    }

    async fn pause<O: RemoteOperation>(&self, op: &O, delay: Duration) -> Result<(), OperationError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(cancelled(op)),
            _ = sleep(delay) => Ok(()),
        }
    }

    fn timed_out<O: RemoteOperation>(&self, op: &O) -> OperationError {
        warn!(operation = op.name(), waited = %self.strategy.describe(), "Remote operation timed out");
        OperationError::TimedOut {
            operation: op.name().to_string(),
            waited: self.strategy.describe(),
        }
    }
}

fn cancelled<O: RemoteOperation>(op: &O) -> OperationError {
    OperationError::Cancelled {
        operation: op.name().to_string(),
    }
}
