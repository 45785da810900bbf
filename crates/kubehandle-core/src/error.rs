//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unsupported resource {group}/{kind}: {reason}")]
    UnsupportedResource {
        group: String,
        kind: String,
        reason: String,
    },

    #[error("Invalid API version: {version}")]
    InvalidVersion { version: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid retry budget: {message}")]
    InvalidBudget { message: String },

    #[error("Invalid schema for {kind}: {message}")]
    InvalidSchema { kind: String, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A body failed schema validation
///
/// `path` is a dotted/bracketed location such as `spec.containers[0].image`,
/// or `(root)` when the body itself is wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failed validation at {path}: {message}")]
pub struct ValidationError {
    pub kind: String,
    pub message: String,
    pub path: String,
    /// Underlying validator message, kept verbatim
    pub cause: String,
}

pub type Result<T> = std::result::Result<T, CoreError>;
