//! Committed changes and the snapshots they carry
//!
//! A [`MutationEvent`] is what the store hands back from `commit`: the entity
//! type, the mutation kind, and the rebuild-relevant state of the entity
//! before and after the transaction. Snapshots carry exactly the fields the
//! rebuild engine reads; nothing else from the row is copied.

use serde::{Deserialize, Serialize};

use super::models::*;

// ═══════════════════════════════════════════════════════════════════════════
// Listing placement
// ═══════════════════════════════════════════════════════════════════════════

/// Anything that sits in a family's filtered listings.
pub trait HasFamilyAndApiLevel {
    fn family_id(&self) -> FamilyId;
    fn api_level(&self) -> ApiLevel;

    fn placement(&self) -> ListingPlacement {
        ListingPlacement {
            family_id: self.family_id(),
            api_level: self.api_level(),
        }
    }
}

/// (family, api level) pair that locates a function's filtered listings.
///
/// Captured from the pre-commit snapshot when a function moves, so the old
/// listings can be re-addressed after the row itself has changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListingPlacement {
    pub family_id: FamilyId,
    pub api_level: ApiLevel,
}

impl ListingPlacement {
    pub fn new(family_id: FamilyId, api_level: ApiLevel) -> Self {
        Self {
            family_id,
            api_level,
        }
    }
}

impl HasFamilyAndApiLevel for ListingPlacement {
    fn family_id(&self) -> FamilyId {
        self.family_id
    }

    fn api_level(&self) -> ApiLevel {
        self.api_level
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySnapshot {
    pub id: FamilyId,
    pub slug: String,
    pub display_name: String,
    pub description: Option<String>,
    /// Functions owned by the family at snapshot time
    pub function_ids: Vec<FunctionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSnapshot {
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
    /// A get-started plan points at this function
    pub has_get_started: bool,
    /// The function's benchmark exists and is highlighted
    pub benchmark_highlighted: bool,
    /// Other functions of the same family at snapshot time
    pub sibling_ids: Vec<FunctionId>,
}

impl FunctionSnapshot {
    /// Fields rendered on listing cards. A change to any of them makes the
    /// function's filtered listings stale.
    pub fn listing_fields_differ(&self, other: &FunctionSnapshot) -> bool {
        self.real_name != other.real_name
            || self.summary != other.summary
            || self.network != other.network
            || self.gpu != other.gpu
            || self.placement() != other.placement()
    }
}

impl HasFamilyAndApiLevel for FunctionSnapshot {
    fn family_id(&self) -> FamilyId {
        self.family_id
    }

    fn api_level(&self) -> ApiLevel {
        self.api_level
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkSnapshot {
    pub id: BenchmarkId,
    pub function_impl_id: FunctionId,
    pub title: String,
    pub description_html: String,
    pub highlighted: bool,
    pub dataset_ids: Vec<DatasetId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub id: DatasetId,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub download_url: Option<String>,
    /// Functions whose benchmark uses the dataset or whose default it is
    pub used_by_functions: Vec<FunctionId>,
    pub used_by_pipelines: Vec<PipelineId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStartedSnapshot {
    pub id: PlanId,
    pub function_impl_id: FunctionId,
    pub goal: String,
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSnapshot {
    pub id: ArticleId,
    pub title: String,
    pub description_html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub id: PipelineId,
    pub title: String,
    pub description_html: String,
    pub dataset_ids: Vec<DatasetId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntitySnapshot {
    Family(FamilySnapshot),
    Function(FunctionSnapshot),
    Benchmark(BenchmarkSnapshot),
    Dataset(DatasetSnapshot),
    GetStarted(GetStartedSnapshot),
    Article(ArticleSnapshot),
    Pipeline(PipelineSnapshot),
}

impl EntitySnapshot {
    pub fn id(&self) -> i64 {
        match self {
            EntitySnapshot::Family(s) => s.id,
            EntitySnapshot::Function(s) => s.id,
            EntitySnapshot::Benchmark(s) => s.id,
            EntitySnapshot::Dataset(s) => s.id,
            EntitySnapshot::GetStarted(s) => s.id,
            EntitySnapshot::Article(s) => s.id,
            EntitySnapshot::Pipeline(s) => s.id,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Mutation events
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Family,
    Function,
    Benchmark,
    BenchmarkDataset,
    Dataset,
    GetStarted,
    DevArticle,
    Pipeline,
    PipelineDataset,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Family => "function_family",
            EntityKind::Function => "function_impl",
            EntityKind::Benchmark => "benchmark",
            EntityKind::BenchmarkDataset => "benchmark_dataset",
            EntityKind::Dataset => "dataset",
            EntityKind::GetStarted => "get_started",
            EntityKind::DevArticle => "dev",
            EntityKind::Pipeline => "pipeline",
            EntityKind::PipelineDataset => "pipeline_dataset",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    /// Update that changed the entity's listing placement
    Move,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Move => "move",
            MutationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed create/update/move/delete against one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub entity: EntityKind,
    pub kind: MutationKind,
    /// State before the commit (`None` for creates)
    pub pre: Option<EntitySnapshot>,
    /// State after the commit (`None` for deletes)
    pub post: Option<EntitySnapshot>,
}

impl MutationEvent {
    pub fn created(entity: EntityKind, post: EntitySnapshot) -> Self {
        Self {
            entity,
            kind: MutationKind::Create,
            pre: None,
            post: Some(post),
        }
    }

    pub fn updated(entity: EntityKind, pre: EntitySnapshot, post: EntitySnapshot) -> Self {
        Self {
            entity,
            kind: MutationKind::Update,
            pre: Some(pre),
            post: Some(post),
        }
    }

    pub fn moved(entity: EntityKind, pre: EntitySnapshot, post: EntitySnapshot) -> Self {
        Self {
            entity,
            kind: MutationKind::Move,
            pre: Some(pre),
            post: Some(post),
        }
    }

    pub fn deleted(entity: EntityKind, pre: EntitySnapshot) -> Self {
        Self {
            entity,
            kind: MutationKind::Delete,
            pre: Some(pre),
            post: None,
        }
    }

    /// Function update: `Move` when the listing placement changed
    pub fn function_updated(pre: FunctionSnapshot, post: FunctionSnapshot) -> Self {
        if pre.placement() != post.placement() {
            Self::moved(
                EntityKind::Function,
                EntitySnapshot::Function(pre),
                EntitySnapshot::Function(post),
            )
        } else {
            Self::updated(
                EntityKind::Function,
                EntitySnapshot::Function(pre),
                EntitySnapshot::Function(post),
            )
        }
    }

    /// Id of the mutated entity
    pub fn entity_id(&self) -> Option<i64> {
        self.post.as_ref().or(self.pre.as_ref()).map(|s| s.id())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Entity changes (commit input)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntityChange {
    CreateFamily(New<FamilyDraft>),
    UpdateFamily { id: FamilyId, draft: FamilyDraft },
    /// Rejected while the family still owns functions
    DeleteFamily { id: FamilyId },

    CreateFunction(New<FunctionDraft>),
    UpdateFunction { id: FunctionId, draft: FunctionDraft },
    /// Taxonomy reassignment: only the family changes
    ReassignFamily { id: FunctionId, family_id: FamilyId },
    DeleteFunction { id: FunctionId },

    CreateBenchmark(New<BenchmarkDraft>),
    UpdateBenchmark { id: BenchmarkId, draft: BenchmarkDraft },
    SetBenchmarkDatasets {
        benchmark_id: BenchmarkId,
        dataset_ids: Vec<DatasetId>,
    },
    DeleteBenchmark { id: BenchmarkId },

    CreateDataset(New<DatasetDraft>),
    UpdateDataset { id: DatasetId, draft: DatasetDraft },
    /// Rejected while any benchmark or pipeline references the dataset
    DeleteDataset { id: DatasetId },

    CreateGetStarted(New<GetStartedDraft>),
    UpdateGetStarted { id: PlanId, draft: GetStartedDraft },
    DeleteGetStarted { id: PlanId },

    CreateArticle(New<ArticleDraft>),
    UpdateArticle { id: ArticleId, draft: ArticleDraft },
    DeleteArticle { id: ArticleId },

    CreatePipeline(New<PipelineDraft>),
    UpdatePipeline { id: PipelineId, draft: PipelineDraft },
    SetPipelineDatasets {
        pipeline_id: PipelineId,
        dataset_ids: Vec<DatasetId>,
    },
    DeletePipeline { id: PipelineId },
}

impl EntityChange {
    pub fn entity(&self) -> EntityKind {
        match self {
            EntityChange::CreateFamily(_)
            | EntityChange::UpdateFamily { .. }
            | EntityChange::DeleteFamily { .. } => EntityKind::Family,
            EntityChange::CreateFunction(_)
            | EntityChange::UpdateFunction { .. }
            | EntityChange::ReassignFamily { .. }
            | EntityChange::DeleteFunction { .. } => EntityKind::Function,
            EntityChange::CreateBenchmark(_)
            | EntityChange::UpdateBenchmark { .. }
            | EntityChange::DeleteBenchmark { .. } => EntityKind::Benchmark,
            EntityChange::SetBenchmarkDatasets { .. } => EntityKind::BenchmarkDataset,
            EntityChange::CreateDataset(_)
            | EntityChange::UpdateDataset { .. }
            | EntityChange::DeleteDataset { .. } => EntityKind::Dataset,
            EntityChange::CreateGetStarted(_)
            | EntityChange::UpdateGetStarted { .. }
            | EntityChange::DeleteGetStarted { .. } => EntityKind::GetStarted,
            EntityChange::CreateArticle(_)
            | EntityChange::UpdateArticle { .. }
            | EntityChange::DeleteArticle { .. } => EntityKind::DevArticle,
            EntityChange::CreatePipeline(_)
            | EntityChange::UpdatePipeline { .. }
            | EntityChange::DeletePipeline { .. } => EntityKind::Pipeline,
            EntityChange::SetPipelineDatasets { .. } => EntityKind::PipelineDataset,
        }
    }
}
