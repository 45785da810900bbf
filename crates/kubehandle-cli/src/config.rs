//! CLI configuration file
//!
//! ```yaml
//! maxApiVersion: v1
//! timeout: 2m
//! interval: 500ms
//! stopStatus: Failed
//! retry:
//!   ConnectionReset: []
//!   InternalServer: ["etcdserver: leader changed"]
//! schemaDir: /etc/kubehandle/schemas
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use kubehandle_core::{
    ApiVersion, DEFAULT_STOP_STATUS, DirectorySchemaSource, RetryBudget, SchemaValidationCache,
    TransientFailureClassifier,
};
use kubehandle_kube::DEFAULT_MAX_VERSION;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "KUBEHANDLE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    /// Newest API version discovery may pick
    pub max_api_version: ApiVersion,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// `null` disables the early stop
    pub stop_status: Option<String>,

    /// Error kind to message substrings; an empty list retries every message
    pub retry: TransientFailureClassifier,

    pub schema_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let budget = RetryBudget::default();
        Self {
            max_api_version: DEFAULT_MAX_VERSION,
            timeout: budget.timeout,
            interval: budget.interval,
            stop_status: Some(DEFAULT_STOP_STATUS.to_string()),
            retry: budget.retryable,
            schema_dir: None,
        }
    }
}

impl Config {
    /// Load from `path`, else the default location if it exists, else defaults
    ///
    /// An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// `<config dir>/kubehandle/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kubehandle").join("config.yaml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config_with_help(
                format!("cannot read config file {}: {e}", path.display()),
                format!("create the file or unset {CONFIG_ENV}"),
            )
        })?;
        let config = Self::from_yaml(&content)
            .map_err(|e| CliError::config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // an empty file is an empty mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Budget for waits, with optional command-line overrides
    pub fn budget(&self, timeout: Option<Duration>, interval: Option<Duration>) -> Result<RetryBudget> {
        let budget = RetryBudget {
            timeout: timeout.unwrap_or(self.timeout),
            interval: interval.unwrap_or(self.interval),
            retryable: self.retry.clone(),
            stop_status: self.stop_status.clone(),
        };
        budget
            .validate()
            .map_err(|e| CliError::usage(e.to_string()))?;
        Ok(budget)
    }

    /// Schema cache over `dir`, falling back to the configured directory
    pub fn schema_cache(&self, dir: Option<&Path>) -> Option<SchemaValidationCache> {
        dir.map(Path::to_path_buf)
            .or_else(|| self.schema_dir.clone())
            .map(|root| SchemaValidationCache::new(DirectorySchemaSource::new(root)))
    }
}
