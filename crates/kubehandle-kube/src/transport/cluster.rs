//! Transport backed by a live cluster through `kube::Client`

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::{
    Client,
    api::{
        Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
        WatchEvent as KubeWatchEvent, WatchParams,
    },
    core::GroupVersionKind,
    discovery::{self, ApiCapabilities, ApiResource, Discovery, Scope},
};
use kubehandle_core::{ServedVersion, split_api_version};
use serde_json::Value as JsonValue;

use super::{PatchKind, ResourceType, Selectors, Transport, WatchEvent, WatchEventType, WatchStream};
use crate::error::{KubeError, Result};

/// Field manager recorded on patches
const FIELD_MANAGER: &str = "kubehandle";

/// The API server closes watches after at most this many seconds
const MAX_WATCH_SECONDS: u64 = 290;

/// Dynamic-object transport over a `kube::Client`
///
/// `ApiResource`s are looked up per resource type on first use and kept for
/// the lifetime of the transport.
pub struct KubeTransport {
    client: Client,
    resources: Mutex<HashMap<ResourceType, (ApiResource, ApiCapabilities)>>,
}

impl KubeTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster environment
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(KubeError::Api)?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn api_resource(&self, resource: &ResourceType) -> Result<(ApiResource, ApiCapabilities)> {
        if let Some(found) = self.cached(resource) {
            return Ok(found);
        }

        let (group, version) = split_api_version(&resource.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &resource.kind);
        let found = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(KubeError::Api)?;

        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(resource.clone(), found.clone());
        Ok(found)
    }

    fn cached(&self, resource: &ResourceType) -> Option<(ApiResource, ApiCapabilities)> {
        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(resource)
            .cloned()
    }

    /// Api handle for one namespace, or across all namespaces when `None`
    async fn api(&self, resource: &ResourceType, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (ar, caps) = self.api_resource(resource).await?;
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }

    /// Api handle for a single named object
    async fn object_api(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let (ar, caps) = self.api_resource(resource).await?;
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &ar),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &ar),
        })
    }
}

fn to_json(obj: &DynamicObject) -> Result<JsonValue> {
    Ok(serde_json::to_value(obj)?)
}

fn list_params(selectors: &Selectors) -> ListParams {
    let mut params = ListParams::default();
    if let Some(fields) = &selectors.fields {
        params = params.fields(fields);
    }
    if let Some(labels) = &selectors.labels {
        params = params.labels(labels);
    }
    params
}

fn watch_params(selectors: &Selectors, timeout: Duration) -> WatchParams {
    let seconds = timeout.as_secs().clamp(1, MAX_WATCH_SECONDS) as u32;
    let mut params = WatchParams::default().timeout(seconds);
    if let Some(fields) = &selectors.fields {
        params = params.fields(fields);
    }
    if let Some(labels) = &selectors.labels {
        params = params.labels(labels);
    }
    params
}

#[async_trait]
impl Transport for KubeTransport {
    async fn discover(&self, group: &str, kind: &str) -> Result<Vec<ServedVersion>> {
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group])
            .run()
            .await
            .map_err(KubeError::Api)?;

        let mut served = Vec::new();
        for api_group in discovery.groups() {
            for version in api_group.versions() {
                for (ar, caps) in api_group.versioned_resources(version) {
                    if ar.kind == kind {
                        served.push(ServedVersion::new(
                            version,
                            caps.scope == Scope::Namespaced,
                        ));
                    }
                }
            }
        }
        tracing::debug!(group, kind, versions = served.len(), "discovered served versions");
        Ok(served)
    }

    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>> {
        let api = self.object_api(resource, namespace).await?;
        match api.get_opt(name).await.map_err(KubeError::Api)? {
            Some(obj) => Ok(Some(to_json(&obj)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        body: &JsonValue,
    ) -> Result<JsonValue> {
        let api = self.object_api(resource, namespace).await?;
        let obj: DynamicObject = serde_json::from_value(body.clone())?;
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(KubeError::Api)?;
        to_json(&created)
    }

    async fn patch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        body: &JsonValue,
        kind: PatchKind,
    ) -> Result<JsonValue> {
        let api = self.object_api(resource, namespace).await?;
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patch = match kind {
            PatchKind::Merge => Patch::Merge(body),
            PatchKind::Strategic => Patch::Strategic(body),
        };
        let patched = api.patch(name, &params, &patch).await.map_err(KubeError::Api)?;
        to_json(&patched)
    }

    async fn delete(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let api = self.object_api(resource, namespace).await?;
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        selectors: &Selectors,
    ) -> Result<Vec<JsonValue>> {
        let api = self.api(resource, namespace).await?;
        let objects = api
            .list(&list_params(selectors))
            .await
            .map_err(KubeError::Api)?;
        objects.items.iter().map(to_json).collect()
    }

    async fn watch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: Option<&str>,
        selectors: &Selectors,
        timeout: Duration,
    ) -> Result<WatchStream> {
        let api = self.api(resource, namespace).await?;
        let selectors = match name {
            Some(name) => selectors.clone().with_name(name),
            None => selectors.clone(),
        };
        let events = api
            .watch(&watch_params(&selectors, timeout), "0")
            .await
            .map_err(KubeError::Api)?;

        let stream = events
            .map_err(KubeError::Api)
            .try_filter_map(|event| async move {
                let (event_type, obj) = match event {
                    KubeWatchEvent::Added(obj) => (WatchEventType::Added, obj),
                    KubeWatchEvent::Modified(obj) => (WatchEventType::Modified, obj),
                    KubeWatchEvent::Deleted(obj) => (WatchEventType::Deleted, obj),
                    KubeWatchEvent::Bookmark(_) => return Ok(None),
                    KubeWatchEvent::Error(resp) => return Err(KubeError::Api(kube::Error::Api(resp))),
                };
                Ok(Some(WatchEvent {
                    event_type,
                    object: to_json(&obj)?,
                }))
            })
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_timeout_is_clamped() {
        let params = watch_params(&Selectors::default(), Duration::from_secs(600));
        assert_eq!(params.timeout, Some(290));

        let params = watch_params(&Selectors::default(), Duration::ZERO);
        assert_eq!(params.timeout, Some(1));
    }

    #[test]
    fn test_selectors_reach_params() {
        let selectors = Selectors {
            fields: Some("involvedObject.name=web".into()),
            labels: Some("app=web".into()),
        };
        let params = list_params(&selectors);
        assert_eq!(params.field_selector.as_deref(), Some("involvedObject.name=web"));
        assert_eq!(params.label_selector.as_deref(), Some("app=web"));
    }
}
