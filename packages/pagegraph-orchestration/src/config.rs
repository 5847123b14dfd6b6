//! Engine configuration (YAML v1)
//!
//! ```yaml
//! version: 1
//! output_dir: /srv/site
//! database_path: /var/lib/pagegraph/catalogue.db
//! max_parallel_renders: 8
//! fsync: true
//! site_title: Documentation
//! ```
//!
//! Every field except `version` is optional; absent fields keep their
//! defaults. An absent `database_path` means an in-memory store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pagegraph_storage::{RecordStore, SqliteRecordStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::RebuildOrchestrator;
use crate::publisher::FsPublisher;
use crate::renderer::HtmlRenderer;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];
pub const MAX_PARALLEL_RENDERS: usize = 256;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    #[error(
        "Unsupported configuration version {found}. Supported versions: {}",
        join_versions(supported)
    )]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn join_versions(versions: &[u32]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConfigError {
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }
}

/// YAML schema v1
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    output_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    database_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_parallel_renders: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    fsync: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    site_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagegraphConfig {
    /// Root of the published site
    pub output_dir: PathBuf,
    /// SQLite file; `None` keeps the store in memory
    pub database_path: Option<PathBuf>,
    /// Bucket jobs in flight at once
    pub max_parallel_renders: usize,
    /// fsync pages before the rename
    pub fsync: bool,
    pub site_title: String,
}

impl Default for PagegraphConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("builds"),
            database_path: None,
            max_parallel_renders: num_cpus::get().clamp(1, MAX_PARALLEL_RENDERS),
            fsync: true,
            site_title: "Documentation".to_string(),
        }
    }
}

impl PagegraphConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let defaults = Self::default();
        let config = Self {
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            database_path: file.database_path,
            max_parallel_renders: file
                .max_parallel_renders
                .unwrap_or(defaults.max_parallel_renders),
            fsync: file.fsync.unwrap_or(defaults.fsync),
            site_title: file.site_title.unwrap_or(defaults.site_title),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            output_dir: Some(self.output_dir.clone()),
            database_path: self.database_path.clone(),
            max_parallel_renders: Some(self.max_parallel_renders),
            fsync: Some(self.fsync),
            site_title: Some(self.site_title.clone()),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(1..=MAX_PARALLEL_RENDERS).contains(&self.max_parallel_renders) {
            return Err(ConfigError::range_with_hint(
                "max_parallel_renders",
                self.max_parallel_renders,
                1,
                MAX_PARALLEL_RENDERS,
                "Use roughly the number of CPU cores.",
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "output_dir must not be empty".to_string(),
            ));
        }
        if self.site_title.trim().is_empty() {
            return Err(ConfigError::Validation(
                "site_title must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn open_store(&self) -> pagegraph_storage::Result<Arc<dyn RecordStore>> {
        let store = match &self.database_path {
            Some(path) => SqliteRecordStore::new(path)?,
            None => SqliteRecordStore::in_memory()?,
        };
        Ok(Arc::new(store))
    }

    /// Orchestrator with the HTML renderer and a filesystem publisher
    pub fn build_orchestrator(&self, store: Arc<dyn RecordStore>) -> RebuildOrchestrator {
        RebuildOrchestrator::new(
            store,
            Arc::new(HtmlRenderer::new(self.site_title.clone())),
            Arc::new(FsPublisher::new(&self.output_dir).with_fsync(self.fsync)),
        )
        .with_max_parallel_renders(self.max_parallel_renders)
    }
}
