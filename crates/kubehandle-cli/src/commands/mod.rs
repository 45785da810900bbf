//! CLI commands

pub mod delete;
pub mod edit;
pub mod get;
pub mod resolve;
pub mod validate;
pub mod wait;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use humantime_serde::re::humantime;
use kubehandle_kube::{
    ApiGroupRef, ApiVersionResolver, DynamicResource, KubeTransport, ResourceHandle,
    ResourceLifecycle, Transport,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::config::Config;
use crate::error::{CliError, Result};

/// The object a command acts on
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Object kind, e.g. Deployment
    pub kind: String,

    /// Object name
    pub name: String,

    /// Namespace; omit for cluster-scoped kinds
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// API group, resolved to the newest served version (core group if omitted)
    #[arg(short, long, default_value = "")]
    pub group: String,

    /// Explicit apiVersion, skipping discovery
    #[arg(long = "api-version", conflicts_with = "group")]
    pub api_version: Option<String>,
}

impl Target {
    pub fn handle(&self) -> ResourceHandle {
        let api = match &self.api_version {
            Some(api_version) => ApiGroupRef::version(api_version),
            None => ApiGroupRef::group(&self.group),
        };
        let handle = ResourceHandle::new(&self.kind, api, &self.name);
        match &self.namespace {
            Some(ns) => handle.in_namespace(ns),
            None => handle,
        }
    }
}

/// Timing overrides for waits
#[derive(Args, Debug, Clone, Default)]
pub struct Timing {
    /// Give up after this long, e.g. 90s or 5m
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Pause between probes
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,
}

pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{s}': {e}"))
}

/// Connect using the local kubeconfig or in-cluster credentials
pub async fn connect() -> Result<Arc<dyn Transport>> {
    let transport = KubeTransport::try_default().await?;
    Ok(Arc::new(transport))
}

/// Lifecycle for `target`, resolving versions under the configured ceiling
pub fn lifecycle(transport: Arc<dyn Transport>, target: &Target, config: &Config) -> ResourceLifecycle {
    resource_lifecycle(transport, DynamicResource::new(target.handle()), config)
}

pub fn resource_lifecycle(
    transport: Arc<dyn Transport>,
    resource: DynamicResource,
    config: &Config,
) -> ResourceLifecycle {
    let resolver = ApiVersionResolver::new(Arc::clone(&transport)).with_ceiling(config.max_api_version);
    ResourceLifecycle::new(transport, resource).with_resolver(resolver)
}

/// Read every YAML document in `path`, skipping empty ones
pub fn read_documents(path: &Path) -> Result<Vec<JsonValue>> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::Io {
        message: format!("{}: {e}", path.display()),
    })?;
    parse_documents(&content).map_err(|e| CliError::usage(format!("{}: {e}", path.display())))
}

pub fn parse_documents(content: &str) -> std::result::Result<Vec<JsonValue>, serde_yaml::Error> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = JsonValue::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// `Kind/name` label for a manifest, tolerating missing fields
pub fn manifest_label(manifest: &JsonValue) -> String {
    let kind = manifest["kind"].as_str().unwrap_or("<no kind>");
    let name = manifest["metadata"]["name"].as_str().unwrap_or("<no name>");
    format!("{kind}/{name}")
}
