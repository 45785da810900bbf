//! kubehandle Core - cluster-independent building blocks
//!
//! This crate provides the pieces of the resource engine that need no cluster:
//! - `version`: API version ordering and ceiling-bounded selection
//! - `retry`: retry budgets and transient failure classification
//! - `condition`: status conditions and the active-condition rule
//! - `backup`: structural patch backups and JSON merge patches
//! - `schema`: the lazily populated schema validation cache
//! - `redact`: masking sensitive fields for logs

pub mod backup;
pub mod condition;
pub mod error;
pub mod redact;
pub mod retry;
pub mod schema;
pub mod version;

pub use backup::{apply_merge_patch, compose_merge_patches, compute_backup, strip_server_fields};
pub use condition::{ConditionRecord, active_condition, conditions_from_body};
pub use error::{CoreError, Result, ValidationError};
pub use redact::{REDACTED, redact};
pub use retry::{
    DEFAULT_STOP_STATUS, ErrorKind, FailureKind, PollOutcome, RetryBudget,
    TransientFailureClassifier,
};
pub use schema::{
    DirectorySchemaSource, SchemaSource, SchemaValidationCache, StaticSchemaSource,
    ValidationOutcome,
};
pub use version::{ApiVersion, ServedVersion, Stability, resolve_api_version, select_version, split_api_version};
