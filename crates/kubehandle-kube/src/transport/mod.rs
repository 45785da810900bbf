//! Transports to the cluster control plane
//!
//! The engine never talks to the API server directly; it goes through the
//! [`Transport`] trait. Two implementations ship with the crate:
//! - **Cluster** (`KubeTransport`): dynamic objects over a `kube::Client`
//! - **Mock** (`MockTransport`): in-memory objects for tests, with scripted
//!   failures and status progressions

mod cluster;
mod mock;

pub use cluster::KubeTransport;
pub use mock::{MockOp, MockTransport, OperationCounts};

use async_trait::async_trait;
use futures::stream::BoxStream;
use kubehandle_core::ServedVersion;
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Kind plus fully resolved `apiVersion`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType {
    pub api_version: String,
    pub kind: String,
}

impl ResourceType {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// How a patch body is interpreted by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchKind {
    /// RFC 7386 JSON merge patch
    #[default]
    Merge,
    /// Kubernetes strategic merge patch
    Strategic,
}

impl PatchKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            PatchKind::Merge => "application/merge-patch+json",
            PatchKind::Strategic => "application/strategic-merge-patch+json",
        }
    }
}

/// Field and label selectors for list and watch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub fields: Option<String>,
    pub labels: Option<String>,
}

impl Selectors {
    pub fn fields(fields: impl Into<String>) -> Self {
        Self {
            fields: Some(fields.into()),
            labels: None,
        }
    }

    pub fn labels(labels: impl Into<String>) -> Self {
        Self {
            fields: None,
            labels: Some(labels.into()),
        }
    }

    /// Narrow the field selector to a single object name
    pub fn with_name(mut self, name: &str) -> Self {
        let by_name = format!("metadata.name={}", name);
        self.fields = Some(match self.fields {
            Some(existing) if !existing.is_empty() => format!("{},{}", existing, by_name),
            _ => by_name,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// One change observed by a watch
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: JsonValue,
}

/// Finite stream of watch events; ends when the watch timeout elapses
pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Operations the engine needs from the control plane
///
/// `namespace` is `None` for cluster-scoped kinds. Bodies are plain JSON.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Every served version of `kind` in `group` ("" is the core group)
    async fn discover(&self, group: &str, kind: &str) -> Result<Vec<ServedVersion>>;

    /// Get an object by name, `None` if it does not exist
    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>>;

    async fn create(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        body: &JsonValue,
    ) -> Result<JsonValue>;

    async fn patch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        body: &JsonValue,
        kind: PatchKind,
    ) -> Result<JsonValue>;

    /// Delete an object; `false` if it was already absent
    async fn delete(&self, resource: &ResourceType, namespace: Option<&str>, name: &str)
    -> Result<bool>;

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        selectors: &Selectors,
    ) -> Result<Vec<JsonValue>>;

    async fn watch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: Option<&str>,
        selectors: &Selectors,
        timeout: Duration,
    ) -> Result<WatchStream>;
}
