//! Page views
//!
//! `gather` reads the minimal store state one bucket needs and packs it into
//! a typed view. Views are serialized to JSON for the renderer, so any
//! [`Renderer`](crate::renderer::Renderer) implementation (including test
//! doubles) sees the same data contract.

use pagegraph_storage::{
    ApiLevel, Benchmark, Dataset, DevArticle, FunctionFamily, FunctionFilter, FunctionId,
    FunctionImpl, GetStarted, Pipeline, RecordStore, StorageError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::addressing::{BucketKey, Facet};
use crate::error::RebuildError;
use crate::renderer::TemplateId;

/// Template plus the serialized view it renders
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInput {
    pub template: TemplateId,
    pub data: Value,
}

impl RenderInput {
    fn new<V: Serialize>(template: TemplateId, view: &V) -> Result<Self, RebuildError> {
        Ok(Self {
            template,
            data: serde_json::to_value(view)?,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// View types
// ═══════════════════════════════════════════════════════════════════════════

/// Listing-card fields of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCard {
    pub id: FunctionId,
    pub real_name: String,
    pub summary: String,
    pub api_level: ApiLevel,
    pub network: bool,
    pub gpu: bool,
}

impl From<&FunctionImpl> for FunctionCard {
    fn from(f: &FunctionImpl) -> Self {
        Self {
            id: f.id,
            real_name: f.real_name.clone(),
            summary: f.summary.clone(),
            api_level: f.api_level,
            network: f.network,
            gpu: f.gpu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkSection {
    pub benchmark: Benchmark,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDetailView {
    pub function: FunctionImpl,
    pub family: FunctionFamily,
    pub siblings: Vec<FunctionCard>,
    pub benchmark: Option<BenchmarkSection>,
    pub default_dataset: Option<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyListingView {
    pub api_level: ApiLevel,
    pub families: Vec<FunctionFamily>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredListingView {
    pub family: FunctionFamily,
    pub api_level: ApiLevel,
    pub network: Facet,
    pub gpu: Facet,
    pub cards: Vec<FunctionCard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightEntry {
    pub benchmark: Benchmark,
    pub function_id: FunctionId,
    pub function_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightView {
    pub entries: Vec<HighlightEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub plan: GetStarted,
    pub function_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStartedView {
    pub plans: Vec<PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevListView {
    pub articles: Vec<DevArticle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevDetailView {
    pub article: DevArticle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineListView {
    pub pipelines: Vec<Pipeline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDetailView {
    pub pipeline: Pipeline,
    pub datasets: Vec<Dataset>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Gathering
// ═══════════════════════════════════════════════════════════════════════════

fn found<T>(value: Option<T>, entity: &str, id: i64) -> Result<T, RebuildError> {
    value.ok_or_else(|| RebuildError::Gather(StorageError::not_found(entity, id)))
}

/// Read the store state for one bucket
pub async fn gather(store: &dyn RecordStore, key: &BucketKey) -> Result<RenderInput, RebuildError> {
    let template = TemplateId::for_bucket(key.kind());

    match *key {
        BucketKey::FunctionDetail { function_id } => {
            let function = found(
                store.get_function(function_id).await?,
                "function_impl",
                function_id,
            )?;
            let family = found(
                store.get_family(function.family_id).await?,
                "function_family",
                function.family_id,
            )?;
            let siblings = store
                .list_functions(FunctionFilter::family(function.family_id))
                .await?
                .iter()
                .filter(|f| f.id != function.id)
                .map(FunctionCard::from)
                .collect();

            let benchmark = match store.benchmark_for_function(function.id).await? {
                Some(benchmark) => {
                    let datasets = store.datasets_for_benchmark(benchmark.id).await?;
                    Some(BenchmarkSection {
                        benchmark,
                        datasets,
                    })
                }
                None => None,
            };
            let default_dataset = match function.default_dataset_id {
                Some(id) => store.get_dataset(id).await?,
                None => None,
            };

            RenderInput::new(
                template,
                &FunctionDetailView {
                    function,
                    family,
                    siblings,
                    benchmark,
                    default_dataset,
                },
            )
        }

        BucketKey::FamilyListing { api_level } => RenderInput::new(
            template,
            &FamilyListingView {
                api_level,
                families: store.list_families().await?,
            },
        ),

        BucketKey::FilteredListing {
            family_id,
            api_level,
            filter,
        } => {
            let family = found(store.get_family(family_id).await?, "function_family", family_id)?;
            let predicate = FunctionFilter::family(family_id)
                .api_level(api_level)
                .network(filter.network.required())
                .gpu(filter.gpu.required());
            let cards = store
                .list_functions(predicate)
                .await?
                .iter()
                .map(FunctionCard::from)
                .collect();

            RenderInput::new(
                template,
                &FilteredListingView {
                    family,
                    api_level,
                    network: filter.network,
                    gpu: filter.gpu,
                    cards,
                },
            )
        }

        // A function deleted between the list read and its lookup takes its
        // benchmark or plan with it (cascade), so the entry is dropped. The
        // delete's own event rebuilds this page again.
        BucketKey::HighlightPage => {
            let mut entries = Vec::new();
            for benchmark in store.list_highlighted_benchmarks().await? {
                let function_id = benchmark.function_impl_id;
                let Some(function) = store.get_function(function_id).await? else {
                    debug!("Skipping highlight of vanished function {}", function_id);
                    continue;
                };
                entries.push(HighlightEntry {
                    benchmark,
                    function_id,
                    function_name: function.real_name,
                });
            }
            RenderInput::new(template, &HighlightView { entries })
        }

        BucketKey::GetStartedIndex => {
            let mut plans = Vec::new();
            for plan in store.list_get_started().await? {
                let function_id = plan.function_impl_id;
                let Some(function) = store.get_function(function_id).await? else {
                    debug!("Skipping plan of vanished function {}", function_id);
                    continue;
                };
                plans.push(PlanEntry {
                    plan,
                    function_name: function.real_name,
                });
            }
            RenderInput::new(template, &GetStartedView { plans })
        }

        BucketKey::DevList => RenderInput::new(
            template,
            &DevListView {
                articles: store.list_articles().await?,
            },
        ),

        BucketKey::DevDetail { article_id } => {
            let article = found(store.get_article(article_id).await?, "dev", article_id)?;
            RenderInput::new(template, &DevDetailView { article })
        }

        BucketKey::PipelineList => RenderInput::new(
            template,
            &PipelineListView {
                pipelines: store.list_pipelines().await?,
            },
        ),

        BucketKey::PipelineDetail { pipeline_id } => {
            let pipeline = found(store.get_pipeline(pipeline_id).await?, "pipeline", pipeline_id)?;
            let datasets = store.datasets_for_pipeline(pipeline_id).await?;
            RenderInput::new(template, &PipelineDetailView { pipeline, datasets })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::ListingFilter;
    use async_trait::async_trait;
    use pagegraph_storage::{
        ArticleId, BenchmarkDraft, BenchmarkId, DatasetDraft, DatasetId, DatasetUsage,
        EntityChange, ErrorKind, FamilyDraft, FamilyId, FunctionDraft, GetStartedDraft,
        MutationEvent, New, PipelineId, Result as StorageResult, SqliteRecordStore,
    };
    use pretty_assertions::assert_eq;

    async fn seeded() -> SqliteRecordStore {
        let store = SqliteRecordStore::in_memory().unwrap();
        store
            .commit(EntityChange::CreateFamily(New::with_id(
                7,
                FamilyDraft::new("vision", "Vision"),
            )))
            .await
            .unwrap();
        for (id, name, network, gpu) in [(100, "resize", false, true), (101, "crop", true, false)] {
            store
                .commit(EntityChange::CreateFunction(New::with_id(
                    id,
                    FunctionDraft::new(7, name, ApiLevel::High, network, gpu),
                )))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_filtered_listing_gathers_only_matching_functions() {
        let store = seeded().await;
        let key = BucketKey::FilteredListing {
            family_id: 7,
            api_level: ApiLevel::High,
            filter: ListingFilter::new(Facet::No, Facet::Yes),
        };
        let input = gather(&store, &key).await.unwrap();
        assert_eq!(input.template, TemplateId::FilteredListing);

        let view: FilteredListingView = serde_json::from_value(input.data).unwrap();
        let ids: Vec<_> = view.cards.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![100]);
        assert_eq!(view.family.display_name, "Vision");
    }

    #[tokio::test]
    async fn test_function_detail_includes_siblings_and_benchmark() {
        let store = seeded().await;
        let dataset = store
            .commit(EntityChange::CreateDataset(New::new(DatasetDraft::new("imagenet", "2012"))))
            .await
            .unwrap()
            .entity_id()
            .unwrap();
        let benchmark = store
            .commit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
                100,
                "Resize 4k",
                false,
            ))))
            .await
            .unwrap()
            .entity_id()
            .unwrap();
        store
            .commit(EntityChange::SetBenchmarkDatasets {
                benchmark_id: benchmark,
                dataset_ids: vec![dataset],
            })
            .await
            .unwrap();

        let input = gather(&store, &BucketKey::FunctionDetail { function_id: 100 })
            .await
            .unwrap();
        let view: FunctionDetailView = serde_json::from_value(input.data).unwrap();
        assert_eq!(view.function.real_name, "resize");
        assert_eq!(view.siblings.iter().map(|s| s.id).collect::<Vec<_>>(), vec![101]);
        let section = view.benchmark.unwrap();
        assert_eq!(section.benchmark.title, "Resize 4k");
        assert_eq!(section.datasets[0].name, "imagenet");
    }

    #[tokio::test]
    async fn test_missing_entity_is_a_gather_error() {
        let store = seeded().await;
        let err = gather(&store, &BucketKey::DevDetail { article_id: 42 })
            .await
            .unwrap_err();
        match err {
            RebuildError::Gather(e) => assert_eq!(e.kind, ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Store whose `get_function` no longer sees one id, as if the function
    /// was deleted between two reads of the same gather
    struct VanishingFunction {
        inner: SqliteRecordStore,
        vanished: FunctionId,
    }

    #[async_trait]
    impl RecordStore for VanishingFunction {
        async fn commit(&self, change: EntityChange) -> StorageResult<MutationEvent> {
            self.inner.commit(change).await
        }
        async fn get_family(&self, id: FamilyId) -> StorageResult<Option<FunctionFamily>> {
            self.inner.get_family(id).await
        }
        async fn list_families(&self) -> StorageResult<Vec<FunctionFamily>> {
            self.inner.list_families().await
        }
        async fn get_function(&self, id: FunctionId) -> StorageResult<Option<FunctionImpl>> {
            if id == self.vanished {
                return Ok(None);
            }
            self.inner.get_function(id).await
        }
        async fn list_functions(&self, filter: FunctionFilter) -> StorageResult<Vec<FunctionImpl>> {
            self.inner.list_functions(filter).await
        }
        async fn list_all_functions(&self) -> StorageResult<Vec<FunctionImpl>> {
            self.inner.list_all_functions().await
        }
        async fn benchmark_for_function(&self, id: FunctionId) -> StorageResult<Option<Benchmark>> {
            self.inner.benchmark_for_function(id).await
        }
        async fn list_highlighted_benchmarks(&self) -> StorageResult<Vec<Benchmark>> {
            self.inner.list_highlighted_benchmarks().await
        }
        async fn get_dataset(&self, id: DatasetId) -> StorageResult<Option<Dataset>> {
            self.inner.get_dataset(id).await
        }
        async fn datasets_for_benchmark(&self, id: BenchmarkId) -> StorageResult<Vec<Dataset>> {
            self.inner.datasets_for_benchmark(id).await
        }
        async fn datasets_for_pipeline(&self, id: PipelineId) -> StorageResult<Vec<Dataset>> {
            self.inner.datasets_for_pipeline(id).await
        }
        async fn dataset_usage(&self, id: DatasetId) -> StorageResult<DatasetUsage> {
            self.inner.dataset_usage(id).await
        }
        async fn list_get_started(&self) -> StorageResult<Vec<GetStarted>> {
            self.inner.list_get_started().await
        }
        async fn get_article(&self, id: ArticleId) -> StorageResult<Option<DevArticle>> {
            self.inner.get_article(id).await
        }
        async fn list_articles(&self) -> StorageResult<Vec<DevArticle>> {
            self.inner.list_articles().await
        }
        async fn get_pipeline(&self, id: PipelineId) -> StorageResult<Option<Pipeline>> {
            self.inner.get_pipeline(id).await
        }
        async fn list_pipelines(&self) -> StorageResult<Vec<Pipeline>> {
            self.inner.list_pipelines().await
        }
    }

    #[tokio::test]
    async fn test_singletons_skip_functions_deleted_mid_gather() {
        let store = seeded().await;
        for function_id in [100, 101] {
            store
                .commit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
                    function_id,
                    "Throughput",
                    true,
                ))))
                .await
                .unwrap();
            store
                .commit(EntityChange::CreateGetStarted(New::new(GetStartedDraft {
                    function_impl_id: function_id,
                    goal: "Try it".to_string(),
                    priority: None,
                })))
                .await
                .unwrap();
        }
        let store = VanishingFunction {
            inner: store,
            vanished: 100,
        };

        let input = gather(&store, &BucketKey::HighlightPage).await.unwrap();
        let view: HighlightView = serde_json::from_value(input.data).unwrap();
        let ids: Vec<_> = view.entries.iter().map(|e| e.function_id).collect();
        assert_eq!(ids, vec![101]);

        let input = gather(&store, &BucketKey::GetStartedIndex).await.unwrap();
        let view: GetStartedView = serde_json::from_value(input.data).unwrap();
        let names: Vec<_> = view.plans.iter().map(|p| p.function_name.as_str()).collect();
        assert_eq!(names, vec!["crop"]);
    }

    #[tokio::test]
    async fn test_empty_singletons_gather() {
        let store = SqliteRecordStore::in_memory().unwrap();
        for key in [
            BucketKey::HighlightPage,
            BucketKey::GetStartedIndex,
            BucketKey::DevList,
            BucketKey::PipelineList,
        ] {
            let input = gather(&store, &key).await.unwrap();
            assert_eq!(input.template, TemplateId::for_bucket(key.kind()));
        }
    }
}
