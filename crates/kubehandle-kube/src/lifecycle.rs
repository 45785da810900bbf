//! Lifecycle of one remote object
//!
//! [`ResourceLifecycle`] drives a single object through
//! `Absent -> Creating -> Present -> Deleting -> Absent`. Every wait is a
//! [`Sampler`] loop on the calling task; a wait that gives up returns one
//! [`TimeoutExpired`] naming the object, what was awaited and the last thing
//! seen.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Event;
use kubehandle_core::{
    ConditionRecord, RetryBudget, SchemaValidationCache, active_condition, apply_merge_patch,
    conditions_from_body, redact,
};
use serde_json::{Map, Value as JsonValue};

use crate::error::{KubeError, Result, TimeoutExpired};
use crate::handle::{ResourceHandle, ResourceKind};
use crate::resolver::ApiVersionResolver;
use crate::sampler::{Sampler, SamplerError};
use crate::transport::{PatchKind, ResourceType, Selectors, Transport, WatchStream};

/// Where an object is in its lifecycle, as last observed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Not observed yet
    #[default]
    Unknown,
    Absent,
    /// Create request sent, not observed since
    Creating,
    Present {
        status: Option<String>,
    },
    /// Deletion requested or `deletionTimestamp` set
    Deleting,
    /// Reached the stop status during a status wait
    Failed {
        status: String,
    },
}

/// One probe of a wait
enum Observed<T> {
    Reached(T),
    /// Not there yet; carries what was seen
    Pending(Option<String>),
    /// Hit the stop status
    Stopped(String),
}

/// Engine for one object of one kind
#[derive(Clone)]
pub struct ResourceLifecycle {
    transport: Arc<dyn Transport>,
    resource: Arc<dyn ResourceKind>,
    resolver: ApiVersionResolver,
    schema: Option<Arc<SchemaValidationCache>>,
    state: Arc<Mutex<LifecycleState>>,
}

impl ResourceLifecycle {
    pub fn new(transport: Arc<dyn Transport>, resource: impl ResourceKind + 'static) -> Self {
        Self {
            resolver: ApiVersionResolver::new(Arc::clone(&transport)),
            transport,
            resource: Arc::new(resource),
            schema: None,
            state: Arc::new(Mutex::new(LifecycleState::Unknown)),
        }
    }

    pub fn with_resolver(mut self, resolver: ApiVersionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Validate bodies against `cache` before create and update
    pub fn with_schema_cache(mut self, cache: Arc<SchemaValidationCache>) -> Self {
        self.schema = Some(cache);
        self
    }

    pub fn handle(&self) -> &ResourceHandle {
        self.resource.handle()
    }

    pub fn resource(&self) -> &dyn ResourceKind {
        self.resource.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> LifecycleState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_state(&self, state: LifecycleState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Record what a get returned
    fn observe(&self, body: Option<&JsonValue>) {
        let state = match body {
            None => LifecycleState::Absent,
            Some(body) if body.pointer("/metadata/deletionTimestamp").is_some() => {
                LifecycleState::Deleting
            }
            Some(body) => LifecycleState::Present {
                status: phase(body),
            },
        };
        self.set_state(state);
    }

    /// Kind plus resolved `apiVersion`
    pub async fn resource_type(&self) -> Result<ResourceType> {
        let api_version = self.resolver.resolve_handle(self.handle()).await?;
        Ok(ResourceType::new(api_version, self.handle().kind()))
    }

    /// Assembled body with identity fields filled in from the handle
    pub async fn body(&self) -> Result<JsonValue> {
        let resource = self.resource_type().await?;
        self.body_for(&resource)
    }

    fn body_for(&self, resource: &ResourceType) -> Result<JsonValue> {
        let handle = self.handle();
        let mut body = self.resource.assemble_body()?;
        let Some(object) = body.as_object_mut() else {
            return Err(KubeError::InvalidConfig(format!(
                "{} body must be a mapping",
                handle.display_name()
            )));
        };

        object.insert("apiVersion".into(), resource.api_version.clone().into());
        object.insert("kind".into(), resource.kind.clone().into());
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = JsonValue::Object(Map::new());
        }
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("name".into(), handle.name().into());
            if let Some(ns) = handle.namespace() {
                metadata.insert("namespace".into(), ns.into());
            }
        }
        Ok(body)
    }

    fn validate(&self, body: &JsonValue) -> Result<()> {
        if let Some(cache) = &self.schema {
            cache.validate(self.handle().kind(), body)?;
        }
        Ok(())
    }

    fn log_body(&self, action: &str, body: &JsonValue) {
        tracing::debug!(
            resource = %self.handle(),
            body = %redact(body, self.resource.sensitive_paths()),
            "{} body", action
        );
    }

    /// Create the object; does not wait
    pub async fn create(&self) -> Result<JsonValue> {
        let resource = self.resource_type().await?;
        let body = self.body_for(&resource)?;
        self.validate(&body)?;
        self.log_body("create", &body);

        tracing::info!(resource = %self.handle(), api_version = %resource.api_version, "creating");
        let previous = self.state();
        self.set_state(LifecycleState::Creating);
        let created = self
            .transport
            .create(&resource, self.handle().namespace(), &body)
            .await
            .inspect_err(|_| self.set_state(previous))?;
        self.observe(Some(&created));
        Ok(created)
    }

    /// Create the object, optionally waiting until it can be read back
    pub async fn deploy(&self, wait: bool, budget: &RetryBudget) -> Result<JsonValue> {
        let created = self.create().await?;
        if wait {
            return self.wait_for_existence(budget).await;
        }
        Ok(created)
    }

    /// Current body, `None` if the object does not exist
    pub async fn instance(&self) -> Result<Option<JsonValue>> {
        let resource = self.resource_type().await?;
        self.fetch(&resource).await
    }

    async fn fetch(&self, resource: &ResourceType) -> Result<Option<JsonValue>> {
        let handle = self.handle();
        let body = self
            .transport
            .get(resource, handle.namespace(), handle.name())
            .await?;
        self.observe(body.as_ref());
        Ok(body)
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.instance().await?.is_some())
    }

    /// `status.phase`, `None` when absent or unreported
    pub async fn status(&self) -> Result<Option<String>> {
        Ok(self.instance().await?.as_ref().and_then(phase))
    }

    pub async fn conditions(&self) -> Result<Vec<ConditionRecord>> {
        Ok(self
            .instance()
            .await?
            .map(|body| conditions_from_body(&body))
            .unwrap_or_default())
    }

    /// Merge-patch the object; does not wait
    pub async fn update(&self, patch: &JsonValue) -> Result<JsonValue> {
        let resource = self.resource_type().await?;
        let handle = self.handle();

        if self.schema.is_some() {
            let mut merged = self.fetch(&resource).await?.ok_or_else(|| self.not_found())?;
            apply_merge_patch(&mut merged, patch);
            self.validate(&merged)?;
        }
        self.log_body("patch", patch);

        tracing::info!(resource = %handle, "patching");
        let patched = self
            .transport
            .patch(&resource, handle.namespace(), handle.name(), patch, PatchKind::Merge)
            .await?;
        self.observe(Some(&patched));
        Ok(patched)
    }

    pub(crate) fn not_found(&self) -> KubeError {
        let handle = self.handle();
        KubeError::NotFound {
            kind: handle.kind().to_string(),
            name: handle.name().to_string(),
            namespace: handle.namespace().map(str::to_string),
        }
    }

    /// Delete the object
    ///
    /// Returns `false` without waiting if it was already absent. When
    /// waiting, the kind is nudged on every poll that still finds it.
    pub async fn delete(&self, wait: bool, budget: &RetryBudget) -> Result<bool> {
        let resource = self.resource_type().await?;
        let handle = self.handle();

        let deleted = self
            .transport
            .delete(&resource, handle.namespace(), handle.name())
            .await?;
        if !deleted {
            tracing::info!(resource = %handle, "already absent");
            self.set_state(LifecycleState::Absent);
            return Ok(false);
        }

        tracing::info!(resource = %handle, "deleting");
        self.set_state(LifecycleState::Deleting);
        if wait {
            self.wait_deleted(&resource, budget).await?;
        }
        Ok(true)
    }

    /// Delete and wait for the object to disappear
    pub async fn clean_up(&self, budget: &RetryBudget) -> Result<bool> {
        self.delete(true, budget).await
    }

    /// Deploy, run `f`, then clean up whether `f` succeeded or not
    ///
    /// An error from `f` wins over a clean-up error.
    pub async fn scoped<F, Fut, T>(&self, budget: &RetryBudget, f: F) -> Result<T>
    where
        F: FnOnce(ResourceLifecycle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.create().await?;
        let outcome = match self.wait_for_existence(budget).await {
            Ok(_) => f(self.clone()).await,
            Err(e) => Err(e),
        };

        let cleanup = self.clean_up(budget).await;
        match (outcome, cleanup) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                tracing::warn!(resource = %self.handle(), error = %cleanup_err, "clean-up failed");
                Err(e)
            }
        }
    }

    /// Objects of this kind in the handle's namespace
    pub async fn list(&self, selectors: &Selectors) -> Result<Vec<JsonValue>> {
        let resource = self.resource_type().await?;
        self.transport
            .list(&resource, self.handle().namespace(), selectors)
            .await
    }

    /// Changes to this object until `timeout` elapses
    pub async fn watch(&self, timeout: Duration) -> Result<WatchStream> {
        let resource = self.resource_type().await?;
        let handle = self.handle();
        self.transport
            .watch(
                &resource,
                handle.namespace(),
                Some(handle.name()),
                &Selectors::default(),
                timeout,
            )
            .await
    }

    /// Events reported about this object until `timeout` elapses
    pub async fn events(&self, timeout: Duration) -> Result<BoxStream<'static, Result<Event>>> {
        let handle = self.handle();
        let selectors = Selectors::fields(format!("involvedObject.name={}", handle.name()));
        let stream = self
            .transport
            .watch(
                &ResourceType::new("v1", "Event"),
                handle.namespace(),
                None,
                &selectors,
                timeout,
            )
            .await?;

        Ok(stream
            .map(|event| event.and_then(|e| Ok(serde_json::from_value::<Event>(e.object)?)))
            .boxed())
    }

    /// Wait until the object can be read
    pub async fn wait_for_existence(&self, budget: &RetryBudget) -> Result<JsonValue> {
        let resource = self.resource_type().await?;
        let resource = &resource;
        self.wait_until("existence", budget, move || self.probe_existence(resource))
            .await
    }

    /// Wait until `status.phase` equals `goal`
    ///
    /// Seeing the budget's stop status ends the wait at once.
    pub async fn wait_for_status(&self, goal: &str, budget: &RetryBudget) -> Result<JsonValue> {
        let resource = self.resource_type().await?;
        let resource = &resource;
        let stop = budget.stop_status.as_deref();
        self.wait_until(&format!("status {}", goal), budget, move || {
            self.probe_status(resource, goal, stop)
        })
        .await
    }

    /// Wait until the active condition of `type_` has `status`
    pub async fn wait_for_condition(
        &self,
        type_: &str,
        status: &str,
        budget: &RetryBudget,
    ) -> Result<ConditionRecord> {
        let resource = self.resource_type().await?;
        let resource = &resource;
        self.wait_until(&format!("condition {}={}", type_, status), budget, move || {
            self.probe_condition(resource, type_, status)
        })
        .await
    }

    /// Wait until the object reports any conditions at all
    pub async fn wait_for_conditions(&self, budget: &RetryBudget) -> Result<Vec<ConditionRecord>> {
        let resource = self.resource_type().await?;
        let resource = &resource;
        self.wait_until("conditions", budget, move || self.probe_conditions(resource))
            .await
    }

    async fn wait_deleted(&self, resource: &ResourceType, budget: &RetryBudget) -> Result<()> {
        self.wait_until("deletion", budget, move || self.probe_deleted(resource))
            .await
    }

    async fn probe_existence(&self, resource: &ResourceType) -> Result<Observed<JsonValue>> {
        Ok(match self.fetch(resource).await? {
            Some(body) => Observed::Reached(body),
            None => Observed::Pending(Some("absent".to_string())),
        })
    }

    async fn probe_status(
        &self,
        resource: &ResourceType,
        goal: &str,
        stop: Option<&str>,
    ) -> Result<Observed<JsonValue>> {
        let Some(body) = self.fetch(resource).await? else {
            return Ok(Observed::Pending(Some("absent".to_string())));
        };
        let observed = phase(&body);
        Ok(match observed.as_deref() {
            Some(current) if current == goal => Observed::Reached(body),
            Some(current) if Some(current) == stop => Observed::Stopped(current.to_string()),
            _ => Observed::Pending(observed),
        })
    }

    async fn probe_condition(
        &self,
        resource: &ResourceType,
        type_: &str,
        status: &str,
    ) -> Result<Observed<ConditionRecord>> {
        let Some(body) = self.fetch(resource).await? else {
            return Ok(Observed::Pending(Some("absent".to_string())));
        };
        let conditions = conditions_from_body(&body);
        Ok(match active_condition(&conditions, type_) {
            Some(active) if active.matches(type_, status) => Observed::Reached(active.clone()),
            Some(active) => Observed::Pending(Some(active.summary())),
            None => Observed::Pending(None),
        })
    }

    async fn probe_conditions(
        &self,
        resource: &ResourceType,
    ) -> Result<Observed<Vec<ConditionRecord>>> {
        let conditions = self
            .fetch(resource)
            .await?
            .map(|body| conditions_from_body(&body))
            .unwrap_or_default();
        Ok(if conditions.is_empty() {
            Observed::Pending(None)
        } else {
            Observed::Reached(conditions)
        })
    }

    async fn probe_deleted(&self, resource: &ResourceType) -> Result<Observed<()>> {
        if self.fetch(resource).await?.is_none() {
            return Ok(Observed::Reached(()));
        }
        self.set_state(LifecycleState::Deleting);
        if let Err(e) = self.resource.nudge_delete(self.transport.as_ref(), resource).await {
            tracing::warn!(resource = %self.handle(), error = %e, "delete nudge failed");
        }
        Ok(Observed::Pending(Some("terminating".to_string())))
    }

    async fn wait_until<T, F, Fut>(&self, waiting_for: &str, budget: &RetryBudget, probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observed<T>>>,
    {
        budget.validate()?;
        tracing::debug!(
            resource = %self.handle(),
            waiting_for,
            timeout = ?budget.timeout,
            "waiting"
        );

        let mut sampler = Sampler::new(probe, budget.clone());
        let mut last_observed = None;
        loop {
            match sampler.next().await {
                Ok(Observed::Reached(value)) => return Ok(value),
                Ok(Observed::Pending(seen)) => {
                    if seen.is_some() {
                        last_observed = seen;
                    }
                }
                Ok(Observed::Stopped(status)) => {
                    self.set_state(LifecycleState::Failed {
                        status: status.clone(),
                    });
                    return Err(self.expired(waiting_for, budget.timeout, |t| TimeoutExpired {
                        last_observed: Some(status.clone()),
                        stop_status: Some(status),
                        ..t
                    }));
                }
                Err(SamplerError::Fatal(e)) => return Err(e),
                Err(SamplerError::Timeout {
                    timeout,
                    last_error,
                }) => {
                    return Err(self.expired(waiting_for, timeout, |t| TimeoutExpired {
                        last_observed,
                        last_error: last_error.map(Box::new),
                        ..t
                    }));
                }
            }
        }
    }

    fn expired(
        &self,
        waiting_for: &str,
        timeout: Duration,
        fill: impl FnOnce(TimeoutExpired) -> TimeoutExpired,
    ) -> KubeError {
        let handle = self.handle();
        let err = fill(TimeoutExpired {
            kind: handle.kind().to_string(),
            name: handle.name().to_string(),
            waiting_for: waiting_for.to_string(),
            timeout,
            last_observed: None,
            stop_status: None,
            last_error: None,
        });
        tracing::debug!(resource = %handle, error = %err, "wait ended");
        KubeError::Timeout(err)
    }
}

fn phase(body: &JsonValue) -> Option<String> {
    body.pointer("/status/phase")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ApiGroupRef, DynamicResource};
    use crate::transport::{MockOp, MockTransport};
    use kubehandle_core::StaticSchemaSource;
    use serde_json::json;

    fn config_map(mock: &MockTransport) -> ResourceLifecycle {
        let resource = DynamicResource::new(ResourceHandle::namespaced(
            "ConfigMap",
            ApiGroupRef::version("v1"),
            "default",
            "settings",
        ))
        .with_body(json!({"data": {"k": "v1"}}));
        ResourceLifecycle::new(Arc::new(mock.clone()), resource)
    }

    #[tokio::test]
    async fn test_body_carries_identity() {
        let mock = MockTransport::new();
        let body = config_map(&mock).body().await.unwrap();
        assert_eq!(body["apiVersion"], "v1");
        assert_eq!(body["kind"], "ConfigMap");
        assert_eq!(body["metadata"]["name"], "settings");
        assert_eq!(body["metadata"]["namespace"], "default");
        assert_eq!(body["data"]["k"], "v1");
    }

    #[tokio::test]
    async fn test_create_tracks_state() {
        let mock = MockTransport::new();
        let lifecycle = config_map(&mock);
        assert_eq!(lifecycle.state(), LifecycleState::Unknown);

        lifecycle.create().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Present { status: None });
        assert!(lifecycle.exists().await.unwrap());
        assert!(mock.object("ConfigMap", Some("default"), "settings").is_some());
    }

    #[tokio::test]
    async fn test_failed_create_keeps_previous_state() {
        let mock = MockTransport::new();
        let lifecycle = config_map(&mock);

        mock.fail_next(MockOp::Create, KubeError::api(409, "AlreadyExists", "configmaps \"settings\" already exists"));
        assert!(lifecycle.create().await.unwrap_err().is_conflict());
        assert_eq!(lifecycle.state(), LifecycleState::Unknown);

        lifecycle.create().await.unwrap();
        let err = lifecycle.create().await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(lifecycle.state(), LifecycleState::Present { status: None });
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_body() {
        let mock = MockTransport::new();
        let cache = SchemaValidationCache::new(StaticSchemaSource::new().with_schema(
            "ConfigMap",
            json!({
                "type": "object",
                "properties": {"data": {"type": "object", "additionalProperties": {"type": "string"}}}
            }),
        ));
        let resource = DynamicResource::new(ResourceHandle::namespaced(
            "ConfigMap",
            ApiGroupRef::version("v1"),
            "default",
            "bad",
        ))
        .with_body(json!({"data": {"k": 1}}));
        let lifecycle =
            ResourceLifecycle::new(Arc::new(mock.clone()), resource).with_schema_cache(Arc::new(cache));

        let err = lifecycle.create().await.unwrap_err();
        match err {
            KubeError::Validation(e) => assert_eq!(e.path, "data.k"),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(mock.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_update_merges() {
        let mock = MockTransport::new();
        let lifecycle = config_map(&mock);
        lifecycle.create().await.unwrap();

        let patched = lifecycle.update(&json!({"data": {"extra": "x"}})).await.unwrap();
        assert_eq!(patched["data"]["k"], "v1");
        assert_eq!(patched["data"]["extra"], "x");
    }

    #[tokio::test]
    async fn test_update_missing_object_with_schema() {
        let mock = MockTransport::new();
        let lifecycle = config_map(&mock)
            .with_schema_cache(Arc::new(SchemaValidationCache::new(StaticSchemaSource::new())));
        let err = lifecycle.update(&json!({"data": {}})).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_accessors() {
        let mock = MockTransport::new();
        mock.insert(
            "ConfigMap",
            Some("default"),
            json!({
                "metadata": {"name": "settings"},
                "status": {
                    "phase": "Active",
                    "conditions": [{"type": "Ready", "status": "True"}]
                }
            }),
        );
        let lifecycle = config_map(&mock);
        assert_eq!(lifecycle.status().await.unwrap().as_deref(), Some("Active"));
        assert_eq!(lifecycle.conditions().await.unwrap().len(), 1);
        let conditions = lifecycle.wait_for_conditions(&RetryBudget::once()).await.unwrap();
        assert!(conditions[0].matches("Ready", "True"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_object_has_no_status() {
        let mock = MockTransport::new();
        let lifecycle = config_map(&mock);
        assert_eq!(lifecycle.status().await.unwrap(), None);
        assert!(lifecycle.conditions().await.unwrap().is_empty());
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
    }
}
