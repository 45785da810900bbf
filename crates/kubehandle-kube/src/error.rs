//! Error types for kubehandle-kube

use kubehandle_core::{CoreError, ErrorKind, FailureKind, ValidationError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for kubehandle-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The object a patch or edit targets does not exist
    #[error("{kind} '{name}' not found{}", namespace_suffix(.namespace))]
    NotFound {
        kind: String,
        name: String,
        namespace: Option<String>,
    },

    /// The cluster serves no usable version of the kind
    #[error("unsupported resource {group}/{kind}: {reason}")]
    UnsupportedResource {
        group: String,
        kind: String,
        reason: String,
    },

    /// A wait did not converge in time
    #[error(transparent)]
    Timeout(#[from] TimeoutExpired),

    /// A body was rejected by its schema
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Body assembly is missing a required field
    #[error("{kind} '{name}' is missing required field '{field}'")]
    MissingField {
        kind: String,
        name: String,
        field: String,
    },

    /// Transport-level failure that is not a Kubernetes API response
    #[error("transport error ({kind}): {message}")]
    Transport { kind: ErrorKind, message: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn namespace_suffix(namespace: &Option<String>) -> String {
    namespace
        .as_ref()
        .map(|ns| format!(" in namespace '{}'", ns))
        .unwrap_or_default()
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<CoreError> for KubeError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnsupportedResource {
                group,
                kind,
                reason,
            } => KubeError::UnsupportedResource {
                group,
                kind,
                reason,
            },
            CoreError::Validation(v) => KubeError::Validation(v),
            CoreError::JsonParse(e) => KubeError::Serialization(e.to_string()),
            CoreError::YamlParse(e) => KubeError::Serialization(e.to_string()),
            other => KubeError::InvalidConfig(other.to_string()),
        }
    }
}

impl KubeError {
    /// Build an API error response, as the API server would return it
    pub fn api(code: u16, reason: &str, message: &str) -> Self {
        KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, KubeError::Timeout(_))
    }
}

impl FailureKind for KubeError {
    fn failure_kind(&self) -> ErrorKind {
        match self {
            KubeError::Api(e) => kube_error_kind(e),
            KubeError::Transport { kind, .. } => *kind,
            KubeError::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }
}

fn kube_error_kind(error: &kube::Error) -> ErrorKind {
    match error {
        kube::Error::Api(resp) => match resp.code {
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            500 | 503 => ErrorKind::InternalServer,
            429 | 504 => ErrorKind::ServerTimeout,
            _ => ErrorKind::Other,
        },
        kube::Error::ReadEvents(io) => io_error_kind(io),
        kube::Error::HyperError(e) => message_kind(&e.to_string()),
        kube::Error::Service(e) => message_kind(&e.to_string()),
        _ => ErrorKind::Other,
    }
}

fn io_error_kind(error: &std::io::Error) -> ErrorKind {
    match error.kind() {
        std::io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
        std::io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
        std::io::ErrorKind::TimedOut => ErrorKind::ServerTimeout,
        _ => ErrorKind::Protocol,
    }
}

/// Connection failures only surface as text through hyper and tower
fn message_kind(message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    if message.contains("connection reset") {
        ErrorKind::ConnectionReset
    } else if message.contains("connection aborted") {
        ErrorKind::ConnectionAborted
    } else if message.contains("incomplete message") || message.contains("broken pipe") {
        ErrorKind::Protocol
    } else if ["certificate", "tls", "handshake"].iter().any(|n| message.contains(n)) {
        // hyper reports these as connect errors too; polling never fixes them
        ErrorKind::Other
    } else if ["connection refused", "dns error", "connect"].iter().any(|n| message.contains(n)) {
        ErrorKind::MaxRetries
    } else {
        ErrorKind::Other
    }
}

/// A wait gave up
///
/// Names the object and what was awaited, plus the last observation and
/// the last transient failure, so a stuck object can be diagnosed without
/// querying the cluster again.
#[derive(Debug)]
pub struct TimeoutExpired {
    pub kind: String,
    pub name: String,
    /// What the wait was for, e.g. `status Running`
    pub waiting_for: String,
    pub timeout: Duration,
    /// Last status or condition seen before giving up
    pub last_observed: Option<String>,
    /// Set when the wait ended early because this stop status was observed
    pub stop_status: Option<String>,
    pub last_error: Option<Box<KubeError>>,
}

impl fmt::Display for TimeoutExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stop_status {
            Some(stop) => write!(
                f,
                "{} '{}' reached stop status {} while waiting for {}",
                self.kind, self.name, stop, self.waiting_for
            )?,
            None => write!(
                f,
                "timed out after {:?} waiting for {} '{}' to reach {}",
                self.timeout, self.kind, self.name, self.waiting_for
            )?,
        }
        if let Some(observed) = &self.last_observed {
            write!(f, " (last observed: {})", observed)?;
        }
        if let Some(error) = &self.last_error {
            write!(f, " (last error: {})", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TimeoutExpired {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
