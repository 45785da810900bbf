//! Mock transport for testing
//!
//! Objects live in memory, so lifecycle and editor flows can be exercised
//! without a cluster. Failures, status progressions and slow deletions can be
//! scripted per test.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use kubehandle_core::{ServedVersion, apply_merge_patch};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{PatchKind, ResourceType, Selectors, Transport, WatchEvent, WatchEventType, WatchStream};
use crate::error::{KubeError, Result};

/// Finalizer added to objects whose deletion is held back
const LINGER_FINALIZER: &str = "mock.kubehandle.io/linger";

/// Transport operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Discover,
    Get,
    Create,
    Patch,
    Delete,
    List,
    Watch,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub discovers: usize,
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
    pub lists: usize,
    pub watches: usize,
}

/// kind, namespace, name
type ObjectKey = (String, Option<String>, String);

#[derive(Default)]
struct MockState {
    served: HashMap<(String, String), Vec<ServedVersion>>,
    objects: BTreeMap<ObjectKey, JsonValue>,
    /// Scripted outcomes; `None` lets one call through
    failures: HashMap<MockOp, VecDeque<Option<KubeError>>>,
    status_scripts: HashMap<ObjectKey, VecDeque<JsonValue>>,
    /// Deleted objects still visible, with the number of gets left
    lingering: HashMap<ObjectKey, usize>,
    linger_gets: usize,
    resource_version: u64,
}

impl MockState {
    fn take_failure(&mut self, op: MockOp) -> Result<()> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn bump_version(&mut self, body: &mut JsonValue) {
        self.resource_version += 1;
        if let Some(metadata) = body.get_mut("metadata").and_then(JsonValue::as_object_mut) {
            metadata.insert(
                "resourceVersion".to_string(),
                JsonValue::String(self.resource_version.to_string()),
            );
        }
    }
}

/// In-memory transport for testing
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<RwLock<MockState>>,
    operations: Arc<RwLock<OperationCounts>>,
}

fn key(kind: &str, namespace: Option<&str>, name: &str) -> ObjectKey {
    (kind.to_string(), namespace.map(str::to_string), name.to_string())
}

impl MockTransport {
    /// Create a new empty mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `kind` in `group` at the given versions
    pub fn serve(self, group: &str, kind: &str, versions: &[&str], namespaced: bool) -> Self {
        {
            let mut state = self.state.write().unwrap();
            state.served.insert(
                (group.to_string(), kind.to_string()),
                versions
                    .iter()
                    .map(|v| ServedVersion::new(*v, namespaced))
                    .collect(),
            );
        }
        self
    }

    /// Keep deleted objects visible for `gets` further reads
    ///
    /// A lingering object carries a finalizer; a patch that clears
    /// `metadata.finalizers` removes it at once.
    pub fn linger_on_delete(self, gets: usize) -> Self {
        self.state.write().unwrap().linger_gets = gets;
        self
    }

    /// Store an object as if it had been created earlier
    pub fn insert(&self, kind: &str, namespace: Option<&str>, body: JsonValue) {
        let name = body
            .pointer("/metadata/name")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let mut state = self.state.write().unwrap();
        let mut body = body;
        state.bump_version(&mut body);
        state.objects.insert(key(kind, namespace, &name), body);
    }

    /// Current stored body of an object
    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<JsonValue> {
        self.state
            .read()
            .unwrap()
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
    }

    /// Make the next call of `op` fail with `error`
    ///
    /// Calls queue up: scripting three failures fails the next three calls.
    pub fn fail_next(&self, op: MockOp, error: KubeError) {
        self.script(op, Some(error));
    }

    /// Let the next call of `op` through before any scripted failure
    pub fn succeed_next(&self, op: MockOp) {
        self.script(op, None);
    }

    fn script(&self, op: MockOp, outcome: Option<KubeError>) {
        self.state
            .write()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(outcome);
    }

    /// Successive `status` values reported by successive gets of an object
    pub fn script_status(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        statuses: impl IntoIterator<Item = JsonValue>,
    ) {
        self.state
            .write()
            .unwrap()
            .status_scripts
            .entry(key(kind, namespace, name))
            .or_default()
            .extend(statuses);
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = OperationCounts::default();
    }

    fn count(&self, op: MockOp) {
        let mut ops = self.operations.write().unwrap();
        match op {
            MockOp::Discover => ops.discovers += 1,
            MockOp::Get => ops.gets += 1,
            MockOp::Create => ops.creates += 1,
            MockOp::Patch => ops.patches += 1,
            MockOp::Delete => ops.deletes += 1,
            MockOp::List => ops.lists += 1,
            MockOp::Watch => ops.watches += 1,
        }
    }

    fn matching(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: Option<&str>,
        selectors: &Selectors,
    ) -> Vec<JsonValue> {
        let state = self.state.read().unwrap();
        state
            .objects
            .iter()
            .filter(|((k, ns, n), _)| {
                k == kind
                    && (namespace.is_none() || ns.as_deref() == namespace)
                    && name.is_none_or(|wanted| wanted == n)
            })
            .map(|(_, body)| body)
            .filter(|body| selectors_match(body, selectors))
            .cloned()
            .collect()
    }
}

fn selectors_match(body: &JsonValue, selectors: &Selectors) -> bool {
    let fields_ok = selectors
        .fields
        .as_deref()
        .is_none_or(|s| terms_match(s, |path| lookup_dotted(body, path)));
    let labels_ok = selectors.labels.as_deref().is_none_or(|s| {
        terms_match(s, |label| {
            body.pointer("/metadata/labels")
                .and_then(|labels| labels.get(label))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        })
    });
    fields_ok && labels_ok
}

/// Evaluate comma-separated `key=value` / `key!=value` terms
fn terms_match(selector: &str, lookup: impl Fn(&str) -> Option<String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                lookup(k.trim()).as_deref() != Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                let v = v.trim_start_matches('=');
                lookup(k.trim()).as_deref() == Some(v.trim())
            } else {
                lookup(term).is_some()
            }
        })
}

fn lookup_dotted(body: &JsonValue, path: &str) -> Option<String> {
    let mut current = body;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn finalizers_cleared(body: &JsonValue) -> bool {
    body.pointer("/metadata/finalizers")
        .and_then(JsonValue::as_array)
        .is_none_or(|f| f.is_empty())
}

#[async_trait]
impl Transport for MockTransport {
    async fn discover(&self, group: &str, kind: &str) -> Result<Vec<ServedVersion>> {
        self.count(MockOp::Discover);
        let mut state = self.state.write().unwrap();
        state.take_failure(MockOp::Discover)?;
        Ok(state
            .served
            .get(&(group.to_string(), kind.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>> {
        self.count(MockOp::Get);
        let mut state = self.state.write().unwrap();
        state.take_failure(MockOp::Get)?;

        let k = key(&resource.kind, namespace, name);
        match state.lingering.get(&k).copied() {
            Some(0) => {
                state.lingering.remove(&k);
                state.objects.remove(&k);
                return Ok(None);
            }
            Some(left) => {
                state.lingering.insert(k.clone(), left - 1);
            }
            None => {}
        }

        let next_status = state.status_scripts.get_mut(&k).and_then(VecDeque::pop_front);
        let Some(body) = state.objects.get_mut(&k) else {
            return Ok(None);
        };
        if let Some(status) = next_status {
            apply_merge_patch(body, &json!({ "status": status }));
        }
        Ok(Some(body.clone()))
    }

    async fn create(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        body: &JsonValue,
    ) -> Result<JsonValue> {
        self.count(MockOp::Create);
        let mut state = self.state.write().unwrap();
        state.take_failure(MockOp::Create)?;

        let Some(name) = body.pointer("/metadata/name").and_then(JsonValue::as_str) else {
            return Err(KubeError::api(422, "Invalid", "metadata.name: Required value"));
        };
        let k = key(&resource.kind, namespace, name);
        if state.objects.contains_key(&k) {
            return Err(KubeError::api(
                409,
                "AlreadyExists",
                &format!("{} \"{}\" already exists", resource.kind, name),
            ));
        }

        let mut stored = body.clone();
        apply_merge_patch(
            &mut stored,
            &json!({
                "metadata": {
                    "uid": format!("uid-{}", state.objects.len() + 1),
                    "creationTimestamp": "2024-01-01T00:00:00Z",
                    "namespace": namespace,
                }
            }),
        );
        state.bump_version(&mut stored);
        state.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
        body: &JsonValue,
        _kind: PatchKind,
    ) -> Result<JsonValue> {
        self.count(MockOp::Patch);
        let mut state = self.state.write().unwrap();
        state.take_failure(MockOp::Patch)?;

        let k = key(&resource.kind, namespace, name);
        let Some(mut stored) = state.objects.get(&k).cloned() else {
            return Err(KubeError::api(
                404,
                "NotFound",
                &format!("{} \"{}\" not found", resource.kind, name),
            ));
        };
        apply_merge_patch(&mut stored, body);
        state.bump_version(&mut stored);

        if state.lingering.contains_key(&k) && finalizers_cleared(&stored) {
            state.lingering.remove(&k);
            state.objects.remove(&k);
        } else {
            state.objects.insert(k, stored.clone());
        }
        Ok(stored)
    }

    async fn delete(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        self.count(MockOp::Delete);
        let mut state = self.state.write().unwrap();
        state.take_failure(MockOp::Delete)?;

        let k = key(&resource.kind, namespace, name);
        if !state.objects.contains_key(&k) {
            return Ok(false);
        }
        if state.lingering.contains_key(&k) {
            return Ok(true);
        }

        let linger = state.linger_gets;
        if linger == 0 {
            state.objects.remove(&k);
        } else if let Some(body) = state.objects.get_mut(&k) {
            let mut finalizers = body
                .pointer("/metadata/finalizers")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();
            if finalizers.is_empty() {
                finalizers.push(JsonValue::String(LINGER_FINALIZER.to_string()));
            }
            apply_merge_patch(
                body,
                &json!({
                    "metadata": {
                        "deletionTimestamp": "2024-01-01T00:00:01Z",
                        "finalizers": finalizers,
                    }
                }),
            );
            state.lingering.insert(k, linger);
        }
        Ok(true)
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        selectors: &Selectors,
    ) -> Result<Vec<JsonValue>> {
        self.count(MockOp::List);
        self.state.write().unwrap().take_failure(MockOp::List)?;
        Ok(self.matching(&resource.kind, namespace, None, selectors))
    }

    async fn watch(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        name: Option<&str>,
        selectors: &Selectors,
        _timeout: Duration,
    ) -> Result<WatchStream> {
        self.count(MockOp::Watch);
        self.state.write().unwrap().take_failure(MockOp::Watch)?;

        let events: Vec<Result<WatchEvent>> = self
            .matching(&resource.kind, namespace, name, selectors)
            .into_iter()
            .map(|object| {
                Ok(WatchEvent {
                    event_type: WatchEventType::Added,
                    object,
                })
            })
            .collect();
        Ok(stream::iter(events).boxed())
    }
}
