//! Record store port
//!
//! Backends implement [`RecordStore`]. Writes go through a single
//! [`RecordStore::commit`] call that applies one [`EntityChange`]
//! transactionally and reports what changed; everything else is read-only
//! and used by the rebuild engine to gather page views.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::models::*;
use super::snapshot::{EntityChange, MutationEvent};
use crate::error::Result;

/// Filter for a family's function listing. `None` means "any value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionFilter {
    pub family_id: FamilyId,
    pub api_level: Option<ApiLevel>,
    pub network: Option<bool>,
    pub gpu: Option<bool>,
}

impl FunctionFilter {
    /// Every function in the family
    pub fn family(family_id: FamilyId) -> Self {
        Self {
            family_id,
            api_level: None,
            network: None,
            gpu: None,
        }
    }

    pub fn api_level(mut self, api_level: ApiLevel) -> Self {
        self.api_level = Some(api_level);
        self
    }

    pub fn network(mut self, network: Option<bool>) -> Self {
        self.network = network;
        self
    }

    pub fn gpu(mut self, gpu: Option<bool>) -> Self {
        self.gpu = gpu;
        self
    }
}

/// Record store port
///
/// Ordering contracts are part of the interface: rendered output must be
/// deterministic, so every `list_*` method documents its sort order.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ═══════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply one change in a single transaction.
    ///
    /// On success the returned event carries the pre/post snapshots of the
    /// mutated entity. On error nothing was written.
    async fn commit(&self, change: EntityChange) -> Result<MutationEvent>;

    // ═══════════════════════════════════════════════════════════════════════
    // Families and functions
    // ═══════════════════════════════════════════════════════════════════════

    async fn get_family(&self, id: FamilyId) -> Result<Option<FunctionFamily>>;

    /// Ordered by display name, then id
    async fn list_families(&self) -> Result<Vec<FunctionFamily>>;

    async fn get_function(&self, id: FunctionId) -> Result<Option<FunctionImpl>>;

    /// Ordered by real name, then id
    async fn list_functions(&self, filter: FunctionFilter) -> Result<Vec<FunctionImpl>>;

    /// Ordered by id
    async fn list_all_functions(&self) -> Result<Vec<FunctionImpl>>;

    // ═══════════════════════════════════════════════════════════════════════
    // Benchmarks and datasets
    // ═══════════════════════════════════════════════════════════════════════

    async fn benchmark_for_function(&self, function_id: FunctionId) -> Result<Option<Benchmark>>;

    /// Highlighted benchmarks, newest first (created_at desc, id desc)
    async fn list_highlighted_benchmarks(&self) -> Result<Vec<Benchmark>>;

    async fn get_dataset(&self, id: DatasetId) -> Result<Option<Dataset>>;

    /// Ordered by name, then id
    async fn datasets_for_benchmark(&self, benchmark_id: BenchmarkId) -> Result<Vec<Dataset>>;

    /// Ordered by name, then id
    async fn datasets_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Dataset>>;

    async fn dataset_usage(&self, id: DatasetId) -> Result<DatasetUsage>;

    // ═══════════════════════════════════════════════════════════════════════
    // Plans, articles, pipelines
    // ═══════════════════════════════════════════════════════════════════════

    /// Ordered by priority ascending (unset first), then id
    async fn list_get_started(&self) -> Result<Vec<GetStarted>>;

    async fn get_article(&self, id: ArticleId) -> Result<Option<DevArticle>>;

    /// Newest first (created_at desc, id desc)
    async fn list_articles(&self) -> Result<Vec<DevArticle>>;

    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>>;

    /// Newest first (created_at desc, id desc)
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;
}
