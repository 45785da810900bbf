//! Retry budgets and transient failure classification
//!
//! Every "wait until X" operation runs under a [`RetryBudget`]. The budget's
//! [`TransientFailureClassifier`] decides, per error, whether a failed probe
//! is worth retrying or must abort the wait.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Status that aborts a status wait unless configured otherwise
pub const DEFAULT_STOP_STATUS: &str = "Failed";

/// Coarse classification of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConnectionReset,
    ConnectionAborted,
    /// The transport gave up after its own retries (connect failures and the like)
    MaxRetries,
    InternalServer,
    ServerTimeout,
    Protocol,
    NotFound,
    Conflict,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectionReset => "ConnectionReset",
            ErrorKind::ConnectionAborted => "ConnectionAborted",
            ErrorKind::MaxRetries => "MaxRetries",
            ErrorKind::InternalServer => "InternalServer",
            ErrorKind::ServerTimeout => "ServerTimeout",
            ErrorKind::Protocol => "Protocol",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Errors that can be sorted into an [`ErrorKind`]
pub trait FailureKind: fmt::Display {
    fn failure_kind(&self) -> ErrorKind;
}

/// Result of a single probe, as seen by the polling loop
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T, E> {
    Value(T),
    TransientError(E),
    FatalError(E),
}

impl<T, E> PollOutcome<T, E> {
    pub fn is_transient(&self) -> bool {
        matches!(self, PollOutcome::TransientError(_))
    }
}

/// Maps error kinds to the message substrings that make them retryable
///
/// A kind mapped to an empty list is retryable whatever its message says.
/// A kind that is absent is never retryable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransientFailureClassifier {
    rules: BTreeMap<ErrorKind, Vec<String>>,
}

impl TransientFailureClassifier {
    /// A classifier that treats nothing as transient
    pub fn none() -> Self {
        Self::default()
    }

    /// The cluster default: network churn, leader elections and webhook timeouts
    pub fn cluster_defaults() -> Self {
        Self::none()
            .with_kind(ErrorKind::ConnectionReset)
            .with_kind(ErrorKind::ConnectionAborted)
            .with_kind(ErrorKind::MaxRetries)
            .with_kind(ErrorKind::ServerTimeout)
            .with_messages(
                ErrorKind::InternalServer,
                [
                    "etcdserver: leader changed",
                    "etcdserver: request timed out",
                    "Internal error occurred: failed calling webhook",
                    "rpc error:",
                ],
            )
    }

    /// Retry every error of `kind`
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.rules.insert(kind, Vec::new());
        self
    }

    /// Retry errors of `kind` only when their message contains one of `messages`
    pub fn with_messages<I, S>(mut self, kind: ErrorKind, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .entry(kind)
            .or_default()
            .extend(messages.into_iter().map(Into::into));
        self
    }

    /// Merge another classifier's rules into this one
    pub fn merge(mut self, other: &Self) -> Self {
        for (kind, messages) in &other.rules {
            match self.rules.get_mut(kind) {
                // already retried regardless of message
                Some(existing) if existing.is_empty() => {}
                Some(existing) if messages.is_empty() => existing.clear(),
                Some(existing) => existing.extend(messages.iter().cloned()),
                None => {
                    self.rules.insert(*kind, messages.clone());
                }
            }
        }
        self
    }

    pub fn covers(&self, kind: ErrorKind) -> bool {
        self.rules.contains_key(&kind)
    }

    /// Whether an error of `kind` with `message` should be retried
    pub fn is_transient(&self, kind: ErrorKind, message: &str) -> bool {
        match self.rules.get(&kind) {
            None => false,
            Some(messages) if messages.is_empty() => true,
            Some(messages) => messages.iter().any(|m| message.contains(m.as_str())),
        }
    }

    /// Sort an error into transient or fatal
    pub fn classify<T, E: FailureKind>(&self, error: E) -> PollOutcome<T, E> {
        if self.is_transient(error.failure_kind(), &error.to_string()) {
            PollOutcome::TransientError(error)
        } else {
            PollOutcome::FatalError(error)
        }
    }
}

/// Time budget for a polling loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryBudget {
    /// Total time the loop may keep retrying
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Sleep between probes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Errors that are retried instead of aborting the loop
    #[serde(default = "TransientFailureClassifier::cluster_defaults")]
    pub retryable: TransientFailureClassifier,

    /// Status that ends a status wait early
    #[serde(default = "default_stop_status")]
    pub stop_status: Option<String>,
}

fn default_stop_status() -> Option<String> {
    Some(DEFAULT_STOP_STATUS.to_string())
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(240),
            interval: Duration::from_secs(1),
            retryable: TransientFailureClassifier::cluster_defaults(),
            stop_status: default_stop_status(),
        }
    }
}

impl RetryBudget {
    /// Create a budget, rejecting a zero poll interval
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        let budget = Self {
            timeout,
            interval,
            ..Self::default()
        };
        budget.validate()?;
        Ok(budget)
    }

    /// A budget that probes exactly once
    pub fn once() -> Self {
        Self {
            timeout: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(CoreError::InvalidBudget {
                message: "poll interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retryable(mut self, retryable: TransientFailureClassifier) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_stop_status(mut self, status: impl Into<String>) -> Self {
        self.stop_status = Some(status.into());
        self
    }

    pub fn without_stop_status(mut self) -> Self {
        self.stop_status = None;
        self
    }
}
