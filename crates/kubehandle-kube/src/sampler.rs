//! Bounded polling
//!
//! A [`Sampler`] calls a probe repeatedly under a [`RetryBudget`], handing
//! every successful value back to the caller. Transient failures (as judged
//! by the budget's classifier) are absorbed and remembered; anything else
//! ends the loop at once. When the budget runs out the loop fails with the
//! last transient failure attached.
//!
//! The timeout is checked after each probe, so a slow probe still delivers
//! its value, and a zero timeout probes exactly once.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use kubehandle_core::{FailureKind, PollOutcome, RetryBudget};
use tokio::time::{Instant, sleep};

/// Why a sampler stopped without producing what the caller wanted
#[derive(Debug)]
pub enum SamplerError<E> {
    /// The budget ran out
    Timeout {
        timeout: Duration,
        last_error: Option<E>,
    },
    /// A probe failed with an error outside the retry set
    Fatal(E),
}

impl<E: fmt::Display> fmt::Display for SamplerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerError::Timeout {
                timeout,
                last_error: Some(e),
            } => write!(f, "timed out after {:?} (last error: {})", timeout, e),
            SamplerError::Timeout { timeout, .. } => write!(f, "timed out after {:?}", timeout),
            SamplerError::Fatal(e) => e.fmt(f),
        }
    }
}

impl<E> std::error::Error for SamplerError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SamplerError::Timeout { last_error, .. } => {
                last_error.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
            }
            SamplerError::Fatal(e) => Some(e),
        }
    }
}

/// Lazy sequence of probe results
///
/// Nothing runs until [`Sampler::next`] is awaited. Each call returns the
/// next successful value; dropping the sampler stops polling. A sampler that
/// has timed out or failed keeps reporting a timeout.
pub struct Sampler<F, E> {
    probe: F,
    budget: RetryBudget,
    started: Option<Instant>,
    last_error: Option<E>,
    iterations: u32,
    finished: bool,
}

impl<F, E> Sampler<F, E> {
    pub fn new(probe: F, budget: RetryBudget) -> Self {
        Self {
            probe,
            budget,
            started: None,
            last_error: None,
            iterations: 0,
            finished: false,
        }
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Probes made so far, successful or not
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn expired(&self) -> bool {
        self.started
            .is_some_and(|start| start.elapsed() >= self.budget.timeout)
    }
}

impl<F, Fut, T, E> Sampler<F, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: FailureKind,
{
    /// Probe until a value arrives, the budget runs out, or a fatal error
    pub async fn next(&mut self) -> Result<T, SamplerError<E>> {
        let timeout = self.budget.timeout;
        if self.finished {
            return Err(SamplerError::Timeout {
                timeout,
                last_error: None,
            });
        }

        if self.iterations > 0 && self.pause().await {
            return Err(SamplerError::Timeout {
                timeout,
                last_error: self.last_error.take(),
            });
        }

        loop {
            self.started.get_or_insert_with(Instant::now);
            let result = (self.probe)().await;
            self.iterations += 1;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.budget.retryable.classify::<T, E>(error) {
                PollOutcome::TransientError(error) => {
                    tracing::debug!(
                        iteration = self.iterations,
                        kind = %error.failure_kind(),
                        error = %error,
                        "transient failure, retrying"
                    );
                    self.last_error = Some(error);
                }
                PollOutcome::FatalError(error) => {
                    self.finished = true;
                    return Err(SamplerError::Fatal(error));
                }
                PollOutcome::Value(value) => return Ok(value),
            }

            if self.pause().await {
                return Err(SamplerError::Timeout {
                    timeout,
                    last_error: self.last_error.take(),
                });
            }
        }
    }

    /// Keep probing until `accept` approves a value
    pub async fn wait_for(
        &mut self,
        mut accept: impl FnMut(&T) -> bool,
    ) -> Result<T, SamplerError<E>> {
        loop {
            let value = self.next().await?;
            if accept(&value) {
                return Ok(value);
            }
        }
    }

    /// End-of-iteration check; `true` once the budget is spent, else sleeps
    async fn pause(&mut self) -> bool {
        if self.expired() {
            self.finished = true;
            return true;
        }
        sleep(self.budget.interval).await;
        false
    }
}

/// Remaining-time budget shared by chained waits
///
/// Each wait started from a deadline gets only the time left, so a sequence
/// of waits never runs past the overall timeout.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Start the clock now
    pub fn after(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `base` with its timeout cut down to the time remaining
    pub fn budget(&self, base: &RetryBudget) -> RetryBudget {
        base.clone().with_timeout(self.remaining())
    }
}
