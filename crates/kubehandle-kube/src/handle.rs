//! Resource handles and per-kind capabilities

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crate::error::{KubeError, Result};
use crate::transport::{PatchKind, ResourceType, Transport};

/// How a handle names its API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiGroupRef {
    /// API group to resolve through discovery ("" for core)
    Group(String),
    /// Fully specified `apiVersion`, used as is
    Version(String),
}

impl ApiGroupRef {
    pub fn group(group: impl Into<String>) -> Self {
        ApiGroupRef::Group(group.into())
    }

    pub fn version(api_version: impl Into<String>) -> Self {
        ApiGroupRef::Version(api_version.into())
    }
}

/// Identity of one remote object
///
/// Clones share the resolved `apiVersion`, so discovery runs at most once per
/// handle family.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    kind: String,
    api: ApiGroupRef,
    name: String,
    namespace: Option<String>,
    resolved: Arc<OnceLock<String>>,
}

impl ResourceHandle {
    /// Cluster-scoped handle
    pub fn new(kind: impl Into<String>, api: ApiGroupRef, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            api,
            name: name.into(),
            namespace: None,
            resolved: Arc::new(OnceLock::new()),
        }
    }

    /// Namespaced handle
    pub fn namespaced(
        kind: impl Into<String>,
        api: ApiGroupRef,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(kind, api, name).in_namespace(namespace)
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn api(&self) -> &ApiGroupRef {
        &self.api
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The `apiVersion` if already known, without asking the cluster
    pub fn api_version(&self) -> Option<&str> {
        match &self.api {
            ApiGroupRef::Version(v) => Some(v),
            ApiGroupRef::Group(_) => self.resolved.get().map(String::as_str),
        }
    }

    pub(crate) fn remember_api_version(&self, api_version: String) -> &str {
        self.resolved.get_or_init(|| api_version)
    }

    /// Get display name: namespace/kind/name
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.kind, self.name),
            None => format!("{}/{}", self.kind, self.name),
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// What the engine needs to know about a kind
///
/// Implementations identify the object, build its body and may help a
/// stuck deletion along.
#[async_trait]
pub trait ResourceKind: Send + Sync {
    fn handle(&self) -> &ResourceHandle;

    /// Full body to create, without `apiVersion`
    ///
    /// Fails with [`KubeError::MissingField`] when a required field is unset.
    fn assemble_body(&self) -> Result<JsonValue>;

    /// Dotted body paths masked before the body is logged
    fn sensitive_paths(&self) -> &[String] {
        &[]
    }

    /// Called on every non-terminal iteration of a delete wait
    async fn nudge_delete(&self, _transport: &dyn Transport, _resource: &ResourceType) -> Result<()> {
        Ok(())
    }
}

/// What a [`DynamicResource`] does when its deletion stalls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NudgePolicy {
    #[default]
    None,
    /// Clear `metadata.finalizers` so the deletion can complete
    ClearFinalizers,
}

/// A kind described entirely by data
#[derive(Debug, Clone)]
pub struct DynamicResource {
    handle: ResourceHandle,
    body: JsonValue,
    required: Vec<String>,
    sensitive: Vec<String>,
    nudge: NudgePolicy,
}

impl DynamicResource {
    pub fn new(handle: ResourceHandle) -> Self {
        Self {
            handle,
            body: json!({}),
            required: Vec::new(),
            sensitive: Vec::new(),
            nudge: NudgePolicy::None,
        }
    }

    /// Build from a full manifest with `apiVersion`, `kind` and `metadata.name`
    pub fn from_manifest(manifest: JsonValue) -> Result<Self> {
        let field = |path: &str| {
            manifest
                .pointer(path)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };
        let missing = |field: &str| KubeError::MissingField {
            kind: field_or_unknown(manifest.get("kind")),
            name: field_or_unknown(manifest.pointer("/metadata/name")),
            field: field.to_string(),
        };

        let api_version = field("/apiVersion").ok_or_else(|| missing("apiVersion"))?;
        let kind = field("/kind").ok_or_else(|| missing("kind"))?;
        let name = field("/metadata/name").ok_or_else(|| missing("metadata.name"))?;

        let mut handle = ResourceHandle::new(kind, ApiGroupRef::Version(api_version), name);
        if let Some(ns) = field("/metadata/namespace") {
            handle = handle.in_namespace(ns);
        }
        Ok(Self::new(handle).with_body(manifest))
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = body;
        self
    }

    /// Fail body assembly unless `path` (dotted) is set
    pub fn require(mut self, path: impl Into<String>) -> Self {
        self.required.push(path.into());
        self
    }

    /// Mask `path` (dotted) in logged bodies
    pub fn sensitive(mut self, path: impl Into<String>) -> Self {
        self.sensitive.push(path.into());
        self
    }

    pub fn with_nudge(mut self, nudge: NudgePolicy) -> Self {
        self.nudge = nudge;
        self
    }
}

fn field_or_unknown(value: Option<&JsonValue>) -> String {
    value
        .and_then(JsonValue::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

fn dotted<'a>(body: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.')
        .try_fold(body, |current, segment| current.get(segment))
        .filter(|v| !v.is_null())
}

#[async_trait]
impl ResourceKind for DynamicResource {
    fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    fn assemble_body(&self) -> Result<JsonValue> {
        if let Some(field) = self.required.iter().find(|p| dotted(&self.body, p).is_none()) {
            return Err(KubeError::MissingField {
                kind: self.handle.kind().to_string(),
                name: self.handle.name().to_string(),
                field: field.clone(),
            });
        }
        Ok(self.body.clone())
    }

    fn sensitive_paths(&self) -> &[String] {
        &self.sensitive
    }

    async fn nudge_delete(&self, transport: &dyn Transport, resource: &ResourceType) -> Result<()> {
        match self.nudge {
            NudgePolicy::None => Ok(()),
            NudgePolicy::ClearFinalizers => {
                let patch = json!({"metadata": {"finalizers": null}});
                let result = transport
                    .patch(
                        resource,
                        self.handle.namespace(),
                        self.handle.name(),
                        &patch,
                        PatchKind::Merge,
                    )
                    .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}
