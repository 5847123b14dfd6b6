//! Entity rows and the drafts used to create / update them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

pub type FamilyId = i64;
pub type FunctionId = i64;
pub type BenchmarkId = i64;
pub type DatasetId = i64;
pub type PlanId = i64;
pub type ArticleId = i64;
pub type PipelineId = i64;

// ═══════════════════════════════════════════════════════════════════════════
// API level
// ═══════════════════════════════════════════════════════════════════════════

/// API level of a function implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiLevel {
    High,
    Low,
}

impl ApiLevel {
    pub const ALL: [ApiLevel; 2] = [ApiLevel::High, ApiLevel::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiLevel::High => "high",
            ApiLevel::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(ApiLevel::High),
            "low" => Ok(ApiLevel::Low),
            _ => Err(StorageError::serialization(format!(
                "Invalid api level: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFamily {
    pub id: FamilyId,
    pub slug: String,
    pub display_name: String,
    /// HTML allowed
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionImpl {
    pub id: FunctionId,
    pub family_id: FamilyId,
    pub real_name: String,
    pub summary: String,
    pub api_level: ApiLevel,
    pub network: bool,
    pub gpu: bool,
    pub signature_html: Option<String>,
    pub description_html: Option<String>,
    pub default_dataset_id: Option<DatasetId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Benchmark {
    pub id: BenchmarkId,
    pub function_impl_id: FunctionId,
    pub title: String,
    pub description_html: String,
    pub highlighted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// "Get started" plan: one per function implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStarted {
    pub id: PlanId,
    pub function_impl_id: FunctionId,
    pub goal: String,
    pub priority: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevArticle {
    pub id: ArticleId,
    pub title: String,
    pub description_html: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub title: String,
    pub description_html: String,
    pub created_at: DateTime<Utc>,
}

/// How many join rows still point at a dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetUsage {
    pub benchmarks: usize,
    pub pipelines: usize,
}

impl DatasetUsage {
    pub fn is_referenced(&self) -> bool {
        self.benchmarks > 0 || self.pipelines > 0
    }
}

impl std::fmt::Display for DatasetUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} benchmark(s) and {} pipeline(s)",
            self.benchmarks, self.pipelines
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Drafts (create / update payloads)
// ═══════════════════════════════════════════════════════════════════════════

/// Create payload with an optional explicit primary key (imports, fixtures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct New<D> {
    pub id: Option<i64>,
    pub draft: D,
}

impl<D> New<D> {
    pub fn new(draft: D) -> Self {
        Self { id: None, draft }
    }

    pub fn with_id(id: i64, draft: D) -> Self {
        Self {
            id: Some(id),
            draft,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyDraft {
    pub slug: String,
    pub display_name: String,
    pub description: Option<String>,
}

impl FamilyDraft {
    pub fn new(slug: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            display_name: display_name.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDraft {
    pub family_id: FamilyId,
    pub real_name: String,
    pub summary: String,
    pub api_level: ApiLevel,
    pub network: bool,
    pub gpu: bool,
    pub signature_html: Option<String>,
    pub description_html: Option<String>,
    pub default_dataset_id: Option<DatasetId>,
}

impl FunctionDraft {
    pub fn new(
        family_id: FamilyId,
        real_name: impl Into<String>,
        api_level: ApiLevel,
        network: bool,
        gpu: bool,
    ) -> Self {
        Self {
            family_id,
            real_name: real_name.into(),
            summary: String::new(),
            api_level,
            network,
            gpu,
            signature_html: None,
            description_html: None,
            default_dataset_id: None,
        }
    }

    /// Draft carrying the current values of an existing row
    pub fn from_row(row: &FunctionImpl) -> Self {
        Self {
            family_id: row.family_id,
            real_name: row.real_name.clone(),
            summary: row.summary.clone(),
            api_level: row.api_level,
            network: row.network,
            gpu: row.gpu,
            signature_html: row.signature_html.clone(),
            description_html: row.description_html.clone(),
            default_dataset_id: row.default_dataset_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkDraft {
    pub function_impl_id: FunctionId,
    pub title: String,
    pub description_html: String,
    pub highlighted: bool,
}

impl BenchmarkDraft {
    pub fn new(function_impl_id: FunctionId, title: impl Into<String>, highlighted: bool) -> Self {
        Self {
            function_impl_id,
            title: title.into(),
            description_html: String::new(),
            highlighted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDraft {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub download_url: Option<String>,
}

impl DatasetDraft {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            download_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStartedDraft {
    pub function_impl_id: FunctionId,
    pub goal: String,
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub description_html: String,
}

impl ArticleDraft {
    pub fn new(title: impl Into<String>, description_html: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description_html: description_html.into(),
        }
    }
}

/// Pipeline page body; dataset links are set separately
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDraft {
    pub title: String,
    pub description_html: String,
}

impl PipelineDraft {
    pub fn new(title: impl Into<String>, description_html: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description_html: description_html.into(),
        }
    }
}
