//! API version resolution through cluster discovery

use std::sync::Arc;

use kubehandle_core::{ApiVersion, resolve_api_version};

use crate::error::{KubeError, Result};
use crate::handle::{ApiGroupRef, ResourceHandle};
use crate::transport::Transport;

/// Newest API version used unless configured otherwise
pub const DEFAULT_MAX_VERSION: ApiVersion = ApiVersion::stable(2);

/// Picks the newest served version of a kind that does not exceed a ceiling
///
/// Failing to find one is fatal; resolution is never retried.
#[derive(Clone)]
pub struct ApiVersionResolver {
    transport: Arc<dyn Transport>,
    ceiling: ApiVersion,
}

impl ApiVersionResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            ceiling: DEFAULT_MAX_VERSION,
        }
    }

    pub fn with_ceiling(mut self, ceiling: ApiVersion) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn ceiling(&self) -> &ApiVersion {
        &self.ceiling
    }

    /// Resolve the `apiVersion` for `kind` in `group`
    pub async fn resolve(&self, group: &str, kind: &str) -> Result<String> {
        let (api_version, _) = self.discover(group, kind).await?;
        Ok(api_version)
    }

    /// Resolved `apiVersion` and whether the kind lives in a namespace
    async fn discover(&self, group: &str, kind: &str) -> Result<(String, bool)> {
        let served = self.transport.discover(group, kind).await?;
        let api_version = resolve_api_version(group, kind, &served, &self.ceiling)?;
        let namespaced = served.iter().any(|s| s.namespaced);
        tracing::debug!(
            group,
            kind,
            ceiling = %self.ceiling,
            api_version = %api_version,
            namespaced,
            "resolved api version"
        );
        Ok((api_version, namespaced))
    }

    /// Resolve a handle's `apiVersion`, remembering the answer on the handle
    ///
    /// A handle that names a namespace for a cluster-scoped kind is rejected
    /// and nothing is remembered.
    pub async fn resolve_handle(&self, handle: &ResourceHandle) -> Result<String> {
        let group = match handle.api() {
            ApiGroupRef::Version(api_version) => return Ok(api_version.clone()),
            ApiGroupRef::Group(group) => group,
        };
        if let Some(known) = handle.api_version() {
            return Ok(known.to_string());
        }
        let (resolved, namespaced) = self.discover(group, handle.kind()).await?;
        if !namespaced && handle.namespace().is_some() {
            return Err(KubeError::InvalidConfig(format!(
                "{} is cluster-scoped, {} must not name a namespace",
                handle.kind(),
                handle.display_name()
            )));
        }
        Ok(handle.remember_api_version(resolved).to_string())
    }
}
