//! CLI error types with exit code handling
//!
//! Library errors are folded into [`CliError`] so that each failure class
//! leaves the process with its own exit code.

use kubehandle_core::CoreError;
use kubehandle_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// A body failed its schema
    #[error("Validation failed: {message}")]
    #[diagnostic(code(kubehandle::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(kubehandle::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(kubehandle::cli::not_found))]
    NotFound { message: String },

    /// A wait ran out of time
    #[error("{message}")]
    #[diagnostic(
        code(kubehandle::cli::timeout),
        help("raise --timeout or check the object's events")
    )]
    Timeout { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(kubehandle::cli::unsupported),
        help("raise maxApiVersion in the config file if a newer version is served")
    )]
    Unsupported { message: String },

    /// Invalid arguments that clap cannot catch
    #[error("{message}")]
    #[diagnostic(code(kubehandle::cli::usage))]
    Usage { message: String },

    /// Error reported by the cluster or the client
    #[error("Cluster error: {message}")]
    #[diagnostic(code(kubehandle::cli::cluster))]
    Cluster { message: String },

    /// A child process exited unsuccessfully
    #[error("command `{command}` exited with status {code}")]
    #[diagnostic(code(kubehandle::cli::command))]
    Command { command: String, code: i32 },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(kubehandle::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(kubehandle::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Timeout { .. } => exit_codes::TIMEOUT,
            CliError::Unsupported { .. } => exit_codes::UNSUPPORTED,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Cluster { .. } => exit_codes::ERROR,
            CliError::Command { code, .. } => *code,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let message = err.to_string();
        match err {
            KubeError::Timeout(_) => CliError::Timeout { message },
            KubeError::Validation(_) => CliError::validation(message),
            KubeError::UnsupportedResource { .. } => CliError::Unsupported { message },
            KubeError::InvalidConfig(_) | KubeError::MissingField { .. } => CliError::usage(message),
            ref e if e.is_not_found() => CliError::NotFound { message },
            _ => CliError::Cluster { message },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Validation(_) => CliError::validation(message),
            CoreError::UnsupportedResource { .. } => CliError::Unsupported { message },
            CoreError::Io(_) => CliError::Io { message },
            CoreError::YamlParse(_) | CoreError::JsonParse(_) => CliError::usage(message),
            _ => CliError::internal(message),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kubehandle_core::ValidationError;
    use kubehandle_kube::TimeoutExpired;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::validation("x").exit_code(), exit_codes::VALIDATION_ERROR);
        assert_eq!(CliError::config("x").exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(CliError::usage("x").exit_code(), exit_codes::USAGE_ERROR);
        let command = CliError::Command {
            command: "make test".into(),
            code: 3,
        };
        assert_eq!(command.exit_code(), 3);
        insta::assert_snapshot!(command.to_string(), @"command `make test` exited with status 3");
    }

    #[test]
    fn test_from_kube_error() {
        let not_found: CliError = KubeError::api(404, "NotFound", "pods \"web\" not found").into();
        assert_eq!(not_found.exit_code(), exit_codes::NOT_FOUND);

        let forbidden: CliError = KubeError::api(403, "Forbidden", "denied").into();
        assert_eq!(forbidden.exit_code(), exit_codes::ERROR);

        let unsupported: CliError = KubeError::UnsupportedResource {
            group: "example.io".into(),
            kind: "Widget".into(),
            reason: "no version served".into(),
        }
        .into();
        assert_eq!(unsupported.exit_code(), exit_codes::UNSUPPORTED);
    }

    #[test]
    fn test_from_timeout_keeps_message() {
        let err: CliError = KubeError::Timeout(TimeoutExpired {
            kind: "Pod".into(),
            name: "web".into(),
            waiting_for: "status Running".into(),
            timeout: Duration::from_secs(5),
            last_observed: Some("Pending".into()),
            stop_status: None,
            last_error: None,
        })
        .into();
        assert_eq!(err.exit_code(), exit_codes::TIMEOUT);
        assert!(err.to_string().contains("status Running"));
    }

    #[test]
    fn test_from_validation_error() {
        let err: CliError = CoreError::Validation(ValidationError {
            kind: "Pod".into(),
            message: "\"image\" is a required property".into(),
            path: "spec.containers[0]".into(),
            cause: String::new(),
        })
        .into();
        assert_eq!(err.exit_code(), exit_codes::VALIDATION_ERROR);
        assert!(err.to_string().contains("spec.containers[0]"));
    }
}
