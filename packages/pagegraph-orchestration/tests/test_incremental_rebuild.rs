//! End-to-end rebuild tests: edit service → store → orchestrator → files

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pagegraph_orchestration::addressing::{
    family_filtered_listings, filtered_listings, function_detail,
};
use pagegraph_orchestration::{
    BucketKey, ErrorCategory, Facet, FsPublisher, HtmlRenderer, ListingFilter, Publisher,
    RebuildError, RebuildOrchestrator, RebuildTarget, SubtreeKey, EditService,
};
use pagegraph_storage::{
    ApiLevel, ArticleDraft, BenchmarkDraft, DatasetDraft, EntityChange, ErrorKind, FamilyDraft,
    FunctionDraft, GetStartedDraft, ListingPlacement, New, PipelineDraft, RecordStore,
    SqliteRecordStore,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

struct Site {
    dir: TempDir,
    service: EditService,
}

impl Site {
    fn with_publisher(dir: TempDir, publisher: Arc<dyn Publisher>) -> Self {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::in_memory().unwrap());
        let orchestrator = RebuildOrchestrator::new(
            store.clone(),
            Arc::new(HtmlRenderer::new("Docs")),
            publisher,
        )
        .with_max_parallel_renders(4);
        Self {
            dir,
            service: EditService::new(store, orchestrator),
        }
    }

    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let publisher = Arc::new(FsPublisher::new(dir.path()).with_fsync(false));
        Self::with_publisher(dir, publisher)
    }

    fn orchestrator(&self) -> &RebuildOrchestrator {
        self.service.orchestrator()
    }

    async fn page(&self, key: &BucketKey) -> Option<String> {
        self.orchestrator().publisher().read(key).await.unwrap()
    }

    async fn pages(&self, keys: &[BucketKey]) -> BTreeMap<BucketKey, Option<String>> {
        let mut out = BTreeMap::new();
        for key in keys {
            out.insert(*key, self.page(key).await);
        }
        out
    }

    async fn submit(&self, change: EntityChange) -> pagegraph_orchestration::EditOutcome {
        let outcome = self.service.submit(change).await.unwrap();
        assert!(
            !outcome.is_degraded(),
            "unexpected failures: {:?}",
            outcome.report.failed
        );
        outcome
    }

    /// Family 7 "vision" with function 100: high level, no network, gpu
    async fn vision() -> Self {
        let site = Self::new();
        site.submit(EntityChange::CreateFamily(New::with_id(
            7,
            FamilyDraft::new("vision", "Vision"),
        )))
        .await;
        site.submit(EntityChange::CreateFunction(New::with_id(
            100,
            FunctionDraft::new(7, "resize", ApiLevel::High, false, true),
        )))
        .await;
        site
    }

    async fn function_draft(&self, id: i64) -> FunctionDraft {
        let row = self.service.store().get_function(id).await.unwrap().unwrap();
        FunctionDraft::from_row(&row)
    }
}

fn listing(family_id: i64, api_level: ApiLevel, network: Facet, gpu: Facet) -> BucketKey {
    BucketKey::FilteredListing {
        family_id,
        api_level,
        filter: ListingFilter::new(network, gpu),
    }
}

const DETAIL_100: &str = "/docs/function_doc/100/";

// ═══════════════════════════════════════════════════════════════════════════
// Scenario
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_vision_scenario_listing_membership() {
    let site = Site::vision().await;

    let any_any = site.page(&listing(7, ApiLevel::High, Facet::Any, Facet::Any)).await.unwrap();
    let no_yes = site.page(&listing(7, ApiLevel::High, Facet::No, Facet::Yes)).await.unwrap();
    let yes_any = site.page(&listing(7, ApiLevel::High, Facet::Yes, Facet::Any)).await.unwrap();
    assert!(any_any.contains(DETAIL_100));
    assert!(no_yes.contains(DETAIL_100));
    assert!(!yes_any.contains(DETAIL_100));

    let detail = site.page(&function_detail(100)).await.unwrap();
    assert!(detail.contains("<h1>resize</h1>"));
    assert!(site
        .dir
        .path()
        .join("docs/show_functions/7/high/noyes/index.html")
        .exists());

    let mut containing = 0;
    for key in family_filtered_listings(7) {
        if site.page(&key).await.unwrap().contains(DETAIL_100) {
            containing += 1;
        }
    }
    assert_eq!(containing, 4);
}

// ═══════════════════════════════════════════════════════════════════════════
// Properties
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let site = Site::vision().await;
    site.submit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
        100,
        "Resize 4k",
        true,
    ))))
    .await;

    let first = site.orchestrator().rebuild_all().await.unwrap();
    let buckets = site.orchestrator().all_buckets().await.unwrap();
    assert_eq!(first.succeeded, buckets);
    let before = site.pages(&buckets).await;

    let second = site.orchestrator().rebuild_all().await.unwrap();
    assert!(!second.is_degraded());
    assert_eq!(site.pages(&buckets).await, before);
}

#[tokio::test]
async fn test_benchmark_edit_never_touches_listings() {
    let site = Site::vision().await;
    let benchmark = site
        .submit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
            100,
            "Resize 4k",
            false,
        ))))
        .await
        .event
        .entity_id()
        .unwrap();

    let listings = family_filtered_listings(7);
    let before = site.pages(&listings).await;

    let outcome = site
        .submit(EntityChange::UpdateBenchmark {
            id: benchmark,
            draft: BenchmarkDraft::new(100, "Resize 8k", false),
        })
        .await;
    assert_eq!(outcome.report.succeeded, vec![function_detail(100)]);
    assert_eq!(site.pages(&listings).await, before);
    assert!(site.page(&function_detail(100)).await.unwrap().contains("Resize 8k"));
}

#[tokio::test]
async fn test_move_rebuilds_old_and_new_listings() {
    let site = Site::vision().await;
    let mut draft = site.function_draft(100).await;
    draft.api_level = ApiLevel::Low;

    let outcome = site.submit(EntityChange::UpdateFunction { id: 100, draft }).await;
    for placement in [
        ListingPlacement::new(7, ApiLevel::High),
        ListingPlacement::new(7, ApiLevel::Low),
    ] {
        for key in filtered_listings(&placement) {
            assert!(outcome.report.succeeded.contains(&key), "{} not rebuilt", key);
        }
    }

    let old = site.page(&listing(7, ApiLevel::High, Facet::Any, Facet::Any)).await.unwrap();
    let new = site.page(&listing(7, ApiLevel::Low, Facet::No, Facet::Yes)).await.unwrap();
    assert!(!old.contains(DETAIL_100));
    assert!(new.contains(DETAIL_100));
}

#[tokio::test]
async fn test_family_reassignment_rebuilds_both_families() {
    let site = Site::vision().await;
    site.submit(EntityChange::CreateFamily(New::with_id(8, FamilyDraft::new("audio", "Audio"))))
        .await;

    let outcome = site
        .submit(EntityChange::ReassignFamily {
            id: 100,
            family_id: 8,
        })
        .await;
    assert!(outcome
        .report
        .succeeded
        .contains(&listing(7, ApiLevel::High, Facet::No, Facet::Yes)));

    let old = site.page(&listing(7, ApiLevel::High, Facet::No, Facet::Yes)).await.unwrap();
    let new = site.page(&listing(8, ApiLevel::High, Facet::No, Facet::Yes)).await.unwrap();
    assert!(!old.contains(DETAIL_100));
    assert!(new.contains(DETAIL_100));
    assert!(site.page(&function_detail(100)).await.unwrap().contains("Audio"));
}

#[tokio::test]
async fn test_function_delete_cleans_up() {
    let site = Site::vision().await;
    site.submit(EntityChange::CreateFunction(New::with_id(
        101,
        FunctionDraft::new(7, "crop", ApiLevel::High, true, false),
    )))
    .await;
    assert!(site.page(&function_detail(101)).await.unwrap().contains(DETAIL_100));

    let outcome = site.submit(EntityChange::DeleteFunction { id: 100 }).await;
    assert_eq!(
        outcome.report.removed,
        vec![SubtreeKey::FunctionDetail { function_id: 100 }]
    );
    assert!(!site.dir.path().join("docs/function_doc/100").exists());
    assert_eq!(site.page(&function_detail(100)).await, None);

    let any_any = site.page(&listing(7, ApiLevel::High, Facet::Any, Facet::Any)).await.unwrap();
    assert!(!any_any.contains(DETAIL_100));
    assert!(any_any.contains("/docs/function_doc/101/"));
    assert!(!site.page(&function_detail(101)).await.unwrap().contains(DETAIL_100));
}

#[tokio::test]
async fn test_highlight_membership_follows_flag() {
    let site = Site::vision().await;
    let benchmark = site
        .submit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
            100,
            "Resize 4k",
            true,
        ))))
        .await
        .event
        .entity_id()
        .unwrap();
    let page = site.page(&BucketKey::HighlightPage).await.unwrap();
    assert!(page.contains("Resize 4k"));
    assert!(page.contains(DETAIL_100));

    let outcome = site
        .submit(EntityChange::UpdateBenchmark {
            id: benchmark,
            draft: BenchmarkDraft::new(100, "Resize 4k", false),
        })
        .await;
    assert!(outcome.report.succeeded.contains(&BucketKey::HighlightPage));
    assert!(!site.page(&BucketKey::HighlightPage).await.unwrap().contains("Resize 4k"));
}

#[tokio::test]
async fn test_referenced_dataset_delete_is_rejected_without_rebuild() {
    let site = Site::vision().await;
    let dataset = site
        .submit(EntityChange::CreateDataset(New::new(DatasetDraft::new("imagenet", "2012"))))
        .await
        .event
        .entity_id()
        .unwrap();
    let benchmark = site
        .submit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
            100,
            "Resize 4k",
            false,
        ))))
        .await
        .event
        .entity_id()
        .unwrap();
    site.submit(EntityChange::SetBenchmarkDatasets {
        benchmark_id: benchmark,
        dataset_ids: vec![dataset],
    })
    .await;
    let before = site.page(&function_detail(100)).await;

    let err = site
        .service
        .submit(EntityChange::DeleteDataset { id: dataset })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferentialIntegrity);
    assert!(site.service.store().get_dataset(dataset).await.unwrap().is_some());
    assert_eq!(site.page(&function_detail(100)).await, before);
}

#[tokio::test]
async fn test_unreferenced_dataset_delete_clears_default_dataset() {
    let site = Site::vision().await;
    let dataset = site
        .submit(EntityChange::CreateDataset(New::new(DatasetDraft::new("mnist", "1998"))))
        .await
        .event
        .entity_id()
        .unwrap();
    let mut draft = site.function_draft(100).await;
    draft.default_dataset_id = Some(dataset);
    site.submit(EntityChange::UpdateFunction { id: 100, draft }).await;
    assert!(site.page(&function_detail(100)).await.unwrap().contains("mnist 1998"));

    let outcome = site.submit(EntityChange::DeleteDataset { id: dataset }).await;
    assert_eq!(outcome.report.succeeded, vec![function_detail(100)]);
    assert!(outcome.report.removed.is_empty());
    assert!(!site.page(&function_detail(100)).await.unwrap().contains("mnist"));
    assert_eq!(site.function_draft(100).await.default_dataset_id, None);
}

#[tokio::test]
async fn test_highlighted_benchmark_delete_leaves_highlight_page() {
    let site = Site::vision().await;
    let benchmark = site
        .submit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
            100,
            "Resize 4k",
            true,
        ))))
        .await
        .event
        .entity_id()
        .unwrap();
    assert!(site.page(&BucketKey::HighlightPage).await.unwrap().contains("Resize 4k"));

    let outcome = site.submit(EntityChange::DeleteBenchmark { id: benchmark }).await;
    assert_eq!(
        outcome.report.succeeded,
        vec![function_detail(100), BucketKey::HighlightPage]
    );
    assert!(!site.page(&BucketKey::HighlightPage).await.unwrap().contains("Resize 4k"));
    assert!(!site.page(&function_detail(100)).await.unwrap().contains("Resize 4k"));
}

// ═══════════════════════════════════════════════════════════════════════════
// Cross-entity rows
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_dataset_update_reaches_functions_and_pipelines() {
    let site = Site::vision().await;
    let dataset = site
        .submit(EntityChange::CreateDataset(New::new(DatasetDraft::new("imagenet", "2012"))))
        .await
        .event
        .entity_id()
        .unwrap();

    let mut draft = site.function_draft(100).await;
    draft.default_dataset_id = Some(dataset);
    site.submit(EntityChange::UpdateFunction { id: 100, draft }).await;

    let pipeline = site
        .submit(EntityChange::CreatePipeline(New::new(PipelineDraft::new(
            "Train",
            "<p>train</p>",
        ))))
        .await
        .event
        .entity_id()
        .unwrap();
    site.submit(EntityChange::SetPipelineDatasets {
        pipeline_id: pipeline,
        dataset_ids: vec![dataset],
    })
    .await;

    let outcome = site
        .submit(EntityChange::UpdateDataset {
            id: dataset,
            draft: DatasetDraft::new("imagenet", "2021"),
        })
        .await;
    let pipeline_detail = BucketKey::PipelineDetail {
        pipeline_id: pipeline,
    };
    assert!(outcome.report.succeeded.contains(&function_detail(100)));
    assert!(outcome.report.succeeded.contains(&pipeline_detail));
    assert!(site.page(&function_detail(100)).await.unwrap().contains("imagenet 2021"));
    assert!(site.page(&pipeline_detail).await.unwrap().contains("imagenet 2021"));
}

#[tokio::test]
async fn test_family_rename_updates_headers_and_details() {
    let site = Site::vision().await;
    let mut draft = FamilyDraft::new("vision", "Computer Vision");
    draft.description = Some("<em>pixels</em>".to_string());

    site.submit(EntityChange::UpdateFamily { id: 7, draft }).await;
    let header = site.page(&listing(7, ApiLevel::Low, Facet::Yes, Facet::No)).await.unwrap();
    assert!(header.contains("Computer Vision"));
    assert!(site.page(&function_detail(100)).await.unwrap().contains("Computer Vision"));
    let families = site
        .page(&BucketKey::FamilyListing {
            api_level: ApiLevel::High,
        })
        .await
        .unwrap();
    assert!(families.contains("<em>pixels</em>"));
}

#[tokio::test]
async fn test_empty_family_delete_removes_listing_subtree() {
    let site = Site::vision().await;
    site.submit(EntityChange::CreateFamily(New::with_id(8, FamilyDraft::new("audio", "Audio"))))
        .await;
    assert!(site.dir.path().join("docs/show_functions/8/low/anyany/index.html").exists());

    let outcome = site.submit(EntityChange::DeleteFamily { id: 8 }).await;
    assert_eq!(
        outcome.report.removed,
        vec![SubtreeKey::FamilyListings { family_id: 8 }]
    );
    assert!(!site.dir.path().join("docs/show_functions/8").exists());
    let families = site
        .page(&BucketKey::FamilyListing {
            api_level: ApiLevel::Low,
        })
        .await
        .unwrap();
    assert!(!families.contains("Audio"));

    let err = site
        .service
        .submit(EntityChange::DeleteFamily { id: 7 })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferentialIntegrity);
}

#[tokio::test]
async fn test_get_started_index_tracks_function_name() {
    let site = Site::vision().await;
    site.submit(EntityChange::CreateGetStarted(New::new(GetStartedDraft {
        function_impl_id: 100,
        goal: "Shrink thumbnails".to_string(),
        priority: Some(1),
    })))
    .await;
    assert!(site.page(&BucketKey::GetStartedIndex).await.unwrap().contains("resize"));

    let mut draft = site.function_draft(100).await;
    draft.real_name = "resize_bilinear".to_string();
    let outcome = site.submit(EntityChange::UpdateFunction { id: 100, draft }).await;
    assert!(outcome.report.succeeded.contains(&BucketKey::GetStartedIndex));
    assert!(site
        .page(&BucketKey::GetStartedIndex)
        .await
        .unwrap()
        .contains("resize_bilinear"));
}

#[tokio::test]
async fn test_get_started_delete_rebuilds_index() {
    let site = Site::vision().await;
    let plan = site
        .submit(EntityChange::CreateGetStarted(New::new(GetStartedDraft {
            function_impl_id: 100,
            goal: "Shrink thumbnails".to_string(),
            priority: None,
        })))
        .await
        .event
        .entity_id()
        .unwrap();
    assert!(site
        .page(&BucketKey::GetStartedIndex)
        .await
        .unwrap()
        .contains("Shrink thumbnails"));

    let outcome = site.submit(EntityChange::DeleteGetStarted { id: plan }).await;
    assert_eq!(outcome.report.succeeded, vec![BucketKey::GetStartedIndex]);
    let index = site.page(&BucketKey::GetStartedIndex).await.unwrap();
    assert!(!index.contains("Shrink thumbnails"));
    assert!(!index.contains(DETAIL_100));
}

#[tokio::test]
async fn test_pipeline_update_republishes_list_and_detail() {
    let site = Site::new();
    let id = site
        .submit(EntityChange::CreatePipeline(New::new(PipelineDraft::new(
            "Detection",
            "<p>boxes</p>",
        ))))
        .await
        .event
        .entity_id()
        .unwrap();
    let detail = BucketKey::PipelineDetail { pipeline_id: id };

    let outcome = site
        .submit(EntityChange::UpdatePipeline {
            id,
            draft: PipelineDraft::new("Segmentation", "<p>masks</p>"),
        })
        .await;
    assert!(outcome.report.succeeded.contains(&BucketKey::PipelineList));
    assert!(outcome.report.succeeded.contains(&detail));

    let list = site.page(&BucketKey::PipelineList).await.unwrap();
    assert!(list.contains("Segmentation"));
    assert!(!list.contains("Detection"));
    let page = site.page(&detail).await.unwrap();
    assert!(page.contains("<p>masks</p>"));
    assert!(!page.contains("boxes"));
}

#[tokio::test]
async fn test_pipeline_delete_removes_detail_and_delists() {
    let site = Site::new();
    let id = site
        .submit(EntityChange::CreatePipeline(New::new(PipelineDraft::new(
            "Detection",
            "<p>boxes</p>",
        ))))
        .await
        .event
        .entity_id()
        .unwrap();
    let detail_dir = site.dir.path().join(format!("pipeline/pipeline/{}", id));
    assert!(detail_dir.join("index.html").exists());

    let outcome = site.submit(EntityChange::DeletePipeline { id }).await;
    assert_eq!(
        outcome.report.removed,
        vec![SubtreeKey::PipelineDetail { pipeline_id: id }]
    );
    assert_eq!(outcome.report.succeeded, vec![BucketKey::PipelineList]);
    assert!(!detail_dir.exists());

    let list = site.page(&BucketKey::PipelineList).await.unwrap();
    assert!(!list.contains("Detection"));
    assert!(!list.contains(&format!("/pipeline/pipeline/{}/", id)));
}

#[tokio::test]
async fn test_article_lifecycle() {
    let site = Site::new();
    let id = site
        .submit(EntityChange::CreateArticle(New::new(ArticleDraft::new(
            "Release notes",
            "<p>v1</p>",
        ))))
        .await
        .event
        .entity_id()
        .unwrap();
    let detail = BucketKey::DevDetail { article_id: id };
    assert!(site.page(&BucketKey::DevList).await.unwrap().contains("Release notes"));
    assert!(site.page(&detail).await.unwrap().contains("<p>v1</p>"));

    site.submit(EntityChange::UpdateArticle {
        id,
        draft: ArticleDraft::new("Release notes 2", "<p>v2</p>"),
    })
    .await;
    assert!(site.page(&BucketKey::DevList).await.unwrap().contains("Release notes 2"));

    let outcome = site.submit(EntityChange::DeleteArticle { id }).await;
    assert_eq!(outcome.report.succeeded, vec![BucketKey::DevList]);
    assert_eq!(site.page(&detail).await, None);
    assert!(!site.page(&BucketKey::DevList).await.unwrap().contains("Release notes"));
}

// ═══════════════════════════════════════════════════════════════════════════
// Degraded success
// ═══════════════════════════════════════════════════════════════════════════

/// Filesystem publisher whose highlight page sits on a read-only mount
struct ReadOnlyHighlight {
    inner: FsPublisher,
    failing: AtomicBool,
}

#[async_trait]
impl Publisher for ReadOnlyHighlight {
    async fn publish(&self, key: &BucketKey, markup: &str) -> Result<PathBuf, RebuildError> {
        if *key == BucketKey::HighlightPage && self.failing.load(Ordering::SeqCst) {
            return Err(RebuildError::publish(
                self.inner.artifact_path(key),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only mount"),
            ));
        }
        self.inner.publish(key, markup).await
    }

    async fn remove_subtree(&self, subtree: &SubtreeKey) -> Result<bool, RebuildError> {
        self.inner.remove_subtree(subtree).await
    }

    async fn read(&self, key: &BucketKey) -> Result<Option<String>, RebuildError> {
        self.inner.read(key).await
    }

    fn artifact_path(&self, key: &BucketKey) -> PathBuf {
        self.inner.artifact_path(key)
    }
}

#[tokio::test]
async fn test_publish_failure_is_degraded_success_and_republishable() {
    let dir = TempDir::new().unwrap();
    let publisher = Arc::new(ReadOnlyHighlight {
        inner: FsPublisher::new(dir.path()).with_fsync(false),
        failing: AtomicBool::new(true),
    });
    let site = Site::with_publisher(dir, publisher.clone());
    site.submit(EntityChange::CreateFamily(New::with_id(7, FamilyDraft::new("vision", "Vision"))))
        .await;
    site.submit(EntityChange::CreateFunction(New::with_id(
        100,
        FunctionDraft::new(7, "resize", ApiLevel::High, false, true),
    )))
    .await;

    let outcome = site
        .service
        .submit(EntityChange::CreateBenchmark(New::new(BenchmarkDraft::new(
            100,
            "Resize 4k",
            true,
        ))))
        .await
        .unwrap();
    assert!(outcome.is_degraded());
    assert_eq!(outcome.report.succeeded, vec![function_detail(100)]);
    assert_eq!(outcome.report.failed.len(), 1);
    let failure = &outcome.report.failed[0];
    assert_eq!(failure.target, RebuildTarget::Bucket(BucketKey::HighlightPage));
    assert_eq!(failure.category, ErrorCategory::Infrastructure);

    // Committed regardless
    assert!(site
        .service
        .store()
        .benchmark_for_function(100)
        .await
        .unwrap()
        .is_some());

    publisher.failing.store(false, Ordering::SeqCst);
    let retry = site
        .orchestrator()
        .republish(outcome.report.failed_buckets())
        .await;
    assert_eq!(retry.succeeded, vec![BucketKey::HighlightPage]);
    assert!(site.page(&BucketKey::HighlightPage).await.unwrap().contains("Resize 4k"));
}

#[tokio::test]
async fn test_detached_apply_matches_synchronous_apply() {
    let site = Site::vision().await;
    let event = site
        .service
        .store()
        .commit(EntityChange::CreateFunction(New::with_id(
            101,
            FunctionDraft::new(7, "crop", ApiLevel::High, true, false),
        )))
        .await
        .unwrap();

    let detached = site.orchestrator().apply_detached(event.clone()).wait().await.unwrap();
    let synchronous = site.orchestrator().apply(&event).await;
    assert_eq!(detached.succeeded, synchronous.succeeded);
    assert!(detached.succeeded.contains(&function_detail(100)));
}
