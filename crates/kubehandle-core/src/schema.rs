//! Schema validation for resource bodies
//!
//! Schemas are located per kind through a [`SchemaSource`] and cached for the
//! lifetime of the [`SchemaValidationCache`]. A kind is loaded and compiled at
//! most once; later validations do no I/O. A kind with no schema is skipped
//! with a warning rather than failing the caller.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result, ValidationError};

/// Where schema documents come from
pub trait SchemaSource: Send + Sync {
    /// Locate and parse the schema for `kind`, or `None` if there is none
    fn load(&self, kind: &str) -> Result<Option<JsonValue>>;
}

/// Schemas stored as `<kind>.json` / `<kind>.yaml` files in a directory
///
/// File names are the lowercased kind, e.g. `deployment.json`.
#[derive(Debug, Clone)]
pub struct DirectorySchemaSource {
    root: PathBuf,
}

impl DirectorySchemaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SchemaSource for DirectorySchemaSource {
    fn load(&self, kind: &str) -> Result<Option<JsonValue>> {
        let stem = kind.to_lowercase();

        let json_path = self.root.join(format!("{}.json", stem));
        if json_path.is_file() {
            let content = std::fs::read_to_string(&json_path)?;
            return Ok(Some(serde_json::from_str(&content)?));
        }

        for ext in ["yaml", "yml"] {
            let path = self.root.join(format!("{}.{}", stem, ext));
            if path.is_file() {
                let content = std::fs::read_to_string(&path)?;
                return Ok(Some(serde_yaml::from_str(&content)?));
            }
        }

        Ok(None)
    }
}

/// Schemas held in memory, keyed by kind
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaSource {
    schemas: HashMap<String, JsonValue>,
}

impl StaticSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, kind: &str, schema: JsonValue) -> Self {
        self.schemas.insert(kind.to_lowercase(), schema);
        self
    }
}

impl SchemaSource for StaticSchemaSource {
    fn load(&self, kind: &str) -> Result<Option<JsonValue>> {
        Ok(self.schemas.get(&kind.to_lowercase()).cloned())
    }
}

/// Outcome of a validation that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    /// No schema is known for the kind
    Skipped,
}

struct CachedSchema {
    document: JsonValue,
    compiled: jsonschema::Validator,
}

/// Process-lifetime cache of compiled schemas, keyed by kind
///
/// Entries are written once and never evicted. Two callers racing on the
/// first load of a kind both compile the same document; the first insert is
/// kept.
pub struct SchemaValidationCache {
    source: Box<dyn SchemaSource>,
    entries: RwLock<HashMap<String, Arc<CachedSchema>>>,
}

impl SchemaValidationCache {
    pub fn new(source: impl SchemaSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `body` as an object of `kind`
    ///
    /// Fails with the first schema violation found.
    pub fn validate(&self, kind: &str, body: &JsonValue) -> Result<ValidationOutcome> {
        let Some(schema) = self.schema_for(kind)? else {
            tracing::warn!(kind, "no schema found, skipping validation");
            return Ok(ValidationOutcome::Skipped);
        };

        match schema.compiled.iter_errors(body).next() {
            None => Ok(ValidationOutcome::Valid),
            Some(error) => {
                let cause = error.to_string();
                let path = format_instance_path(&error.instance_path.to_string(), body);
                Err(CoreError::Validation(ValidationError {
                    kind: kind.to_string(),
                    message: cause.replace('"', "'"),
                    path,
                    cause,
                }))
            }
        }
    }

    /// The cached schema document for `kind`, loading it on first use
    pub fn document(&self, kind: &str) -> Result<Option<JsonValue>> {
        Ok(self.schema_for(kind)?.map(|s| s.document.clone()))
    }

    /// Whether `kind` has already been loaded
    pub fn is_cached(&self, kind: &str) -> bool {
        self.read_entries().contains_key(&kind.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn schema_for(&self, kind: &str) -> Result<Option<Arc<CachedSchema>>> {
        let key = kind.to_lowercase();
        if let Some(cached) = self.read_entries().get(&key) {
            return Ok(Some(Arc::clone(cached)));
        }

        // Misses are not cached so a schema added later is still picked up
        let Some(document) = self.source.load(kind)? else {
            return Ok(None);
        };
        let compiled =
            jsonschema::validator_for(&document).map_err(|e| CoreError::InvalidSchema {
                kind: kind.to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(kind, "loaded schema");

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries
            .entry(key)
            .or_insert_with(|| Arc::new(CachedSchema { document, compiled }));
        Ok(Some(Arc::clone(entry)))
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CachedSchema>>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turn a JSON pointer into a dotted/bracketed path
///
/// `/spec/containers/0/image` becomes `spec.containers[0].image`. Segments
/// are resolved against `body` so numeric keys of mappings stay keys.
pub fn format_instance_path(pointer: &str, body: &JsonValue) -> String {
    let mut out = String::new();
    let mut current = Some(body);

    for raw in pointer.split('/').skip(1) {
        let segment = raw.replace("~1", "/").replace("~0", "~");

        let index = match current {
            Some(JsonValue::Array(_)) => segment.parse::<usize>().ok(),
            _ => None,
        };

        match index {
            Some(i) => {
                out.push_str(&format!("[{}]", i));
                current = current.and_then(|c| c.get(i));
            }
            None => {
                if segment.contains(['.', '[', ']']) {
                    out.push_str(&format!("['{}']", segment));
                } else {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(&segment);
                }
                current = current.and_then(|c| c.get(segment.as_str()));
            }
        }
    }

    if out.is_empty() {
        "(root)".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pod_schema() -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "containers": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name"],
                                "properties": {
                                    "name": {"type": "string"},
                                    "image": {"type": "string"}
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    struct CountingSource {
        inner: StaticSchemaSource,
        loads: Arc<AtomicUsize>,
    }

    impl SchemaSource for CountingSource {
        fn load(&self, kind: &str) -> Result<Option<JsonValue>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(kind)
        }
    }

    fn cache() -> SchemaValidationCache {
        SchemaValidationCache::new(StaticSchemaSource::new().with_schema("Pod", pod_schema()))
    }

    #[test]
    fn test_valid_body() {
        let body = json!({"spec": {"containers": [{"name": "web", "image": "nginx"}]}});
        assert_eq!(cache().validate("Pod", &body).unwrap(), ValidationOutcome::Valid);
    }

    #[test]
    fn test_type_error_path() {
        let body = json!({"spec": {"containers": "not-a-list"}});
        let err = cache().validate("Pod", &body).unwrap_err();
        match err {
            CoreError::Validation(e) => {
                assert_eq!(e.path, "spec.containers");
                assert_eq!(e.kind, "Pod");
                assert!(e.cause.contains("array"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_index_path() {
        let body = json!({"spec": {"containers": [{"name": "a"}, {"name": "b", "image": 7}]}});
        let err = cache().validate("Pod", &body).unwrap_err();
        let CoreError::Validation(e) = err else {
            panic!("expected validation error");
        };
        assert_eq!(e.path, "spec.containers[1].image");
    }

    #[test]
    fn test_missing_schema_is_skipped() {
        let body = json!({"anything": true});
        assert_eq!(
            cache().validate("Widget", &body).unwrap(),
            ValidationOutcome::Skipped
        );
    }

    #[test]
    fn test_schema_loaded_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = SchemaValidationCache::new(CountingSource {
            inner: StaticSchemaSource::new().with_schema("Pod", pod_schema()),
            loads: Arc::clone(&loads),
        });
        let body = json!({"spec": {"containers": []}});

        for _ in 0..3 {
            cache.validate("Pod", &body).unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.is_cached("pod"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_misses_are_retried() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = SchemaValidationCache::new(CountingSource {
            inner: StaticSchemaSource::new(),
            loads: Arc::clone(&loads),
        });
        cache.validate("Widget", &json!({})).unwrap();
        cache.validate("Widget", &json!({})).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("configmap.yaml"),
            "type: object\nproperties:\n  data:\n    type: object\n    additionalProperties:\n      type: string\n",
        )
        .unwrap();

        let cache = SchemaValidationCache::new(DirectorySchemaSource::new(dir.path()));
        assert_eq!(
            cache.validate("ConfigMap", &json!({"data": {"k": "v"}})).unwrap(),
            ValidationOutcome::Valid
        );
        let err = cache
            .validate("ConfigMap", &json!({"data": {"k": 1}}))
            .unwrap_err();
        assert!(err.to_string().contains("data.k"));
        assert!(cache.document("ConfigMap").unwrap().is_some());
    }

    #[test]
    fn test_format_instance_path() {
        let body = json!({"metadata": {"labels": {"0": "x", "a.b": "y"}}, "items": [[1, 2]]});
        assert_eq!(format_instance_path("", &body), "(root)");
        assert_eq!(format_instance_path("/metadata/labels/0", &body), "metadata.labels.0");
        assert_eq!(
            format_instance_path("/metadata/labels/a.b", &body),
            "metadata.labels['a.b']"
        );
        assert_eq!(format_instance_path("/items/0/1", &body), "items[0][1]");
    }
}
