use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use pagegraph_storage::{ErrorKind, MutationEvent, RecordStore};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::addressing::{
    family_filtered_listings, family_listings, function_detail, BucketKey, BucketKind, SubtreeKey,
};
use crate::error::{ErrorCategory, OrchestratorError, RebuildError, Result};
use crate::publisher::Publisher;
use crate::renderer::Renderer;
use crate::rules::{self, InvalidationPlan};
use crate::views;

// ═══════════════════════════════════════════════════════════════════════════
// Report
// ═══════════════════════════════════════════════════════════════════════════

/// What a failure was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildTarget {
    Bucket(BucketKey),
    Subtree(SubtreeKey),
    /// A rule row that could not be expanded into keys
    Unaddressed(BucketKind),
}

impl std::fmt::Display for RebuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebuildTarget::Bucket(key) => write!(f, "{}", key),
            RebuildTarget::Subtree(key) => write!(f, "{}/", key),
            RebuildTarget::Unaddressed(kind) => write!(f, "<unaddressed {}>", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RebuildFailure {
    pub target: RebuildTarget,
    pub error: String,
    pub category: ErrorCategory,
}

impl RebuildFailure {
    fn new(target: RebuildTarget, error: &RebuildError) -> Self {
        Self {
            target,
            error: error.to_string(),
            category: error.category(),
        }
    }
}

/// Outcome of one rebuild pass
///
/// A report with failures is a degraded success: the mutation stays
/// committed and the listed artifacts are stale until republished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub succeeded: Vec<BucketKey>,
    pub removed: Vec<SubtreeKey>,
    /// Buckets whose entity no longer exists; its delete removes the subtree
    pub skipped: Vec<BucketKey>,
    pub failed: Vec<RebuildFailure>,
    pub duration_ms: u64,
}

impl RebuildReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Failed buckets, ready to hand to `republish`
    pub fn failed_buckets(&self) -> Vec<BucketKey> {
        self.failed
            .iter()
            .filter_map(|f| match f.target {
                RebuildTarget::Bucket(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn is_retryable(&self) -> bool {
        self.failed
            .iter()
            .all(|f| f.category == ErrorCategory::Transient)
    }

    fn sort(&mut self) {
        self.succeeded.sort();
        self.removed.sort();
        self.skipped.sort();
        self.failed.sort();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Locks
// ═══════════════════════════════════════════════════════════════════════════

/// Per-bucket and per-subtree locks.
///
/// A bucket rebuild holds the read side of its enclosing subtree and the
/// bucket mutex from gather through publish. Subtree removal takes the write
/// side, so it never interleaves with a rebuild inside the subtree.
#[derive(Debug, Default)]
struct BucketLocks {
    buckets: DashMap<BucketKey, Arc<Mutex<()>>>,
    subtrees: DashMap<SubtreeKey, Arc<RwLock<()>>>,
}

impl BucketLocks {
    fn bucket(&self, key: &BucketKey) -> Arc<Mutex<()>> {
        self.buckets.entry(*key).or_default().clone()
    }

    fn subtree(&self, key: &SubtreeKey) -> Arc<RwLock<()>> {
        self.subtrees.entry(*key).or_default().clone()
    }

    /// Forget the locks of a removed subtree and its buckets. An entry some
    /// task still holds or waits on stays; the map's own Arc is the only
    /// reference otherwise.
    fn evict(&self, subtree: &SubtreeKey) {
        self.buckets
            .retain(|key, lock| !subtree.contains(key) || Arc::strong_count(lock) > 1);
        self.subtrees
            .remove_if(subtree, |_, lock| Arc::strong_count(lock) == 1);
    }
}

enum BucketOutcome {
    Published,
    Vanished,
}

// ═══════════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════════

/// Rebuild orchestrator: event → invalidation plan → gather / render / publish
#[derive(Clone)]
pub struct RebuildOrchestrator {
    store: Arc<dyn RecordStore>,
    renderer: Arc<dyn Renderer>,
    publisher: Arc<dyn Publisher>,
    locks: Arc<BucketLocks>,
    max_parallel: usize,
}

impl RebuildOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        renderer: Arc<dyn Renderer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            renderer,
            publisher,
            locks: Arc::new(BucketLocks::default()),
            max_parallel: num_cpus::get().max(1),
        }
    }

    pub fn with_max_parallel_renders(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    /// Rebuild everything `event` invalidated. Never fails as a whole:
    /// per-bucket failures are collected in the report.
    pub async fn apply(&self, event: &MutationEvent) -> RebuildReport {
        let plan = rules::plan(event);
        info!(
            "Applying {} {} (id {:?}): {} rebuilds, {} removals",
            event.entity,
            event.kind,
            event.entity_id(),
            plan.rebuild.len(),
            plan.remove.len()
        );
        self.execute(plan).await
    }

    /// Run `apply` on a spawned task; the handle yields the report
    pub fn apply_detached(&self, event: MutationEvent) -> DetachedRebuild {
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        tokio::spawn(async move {
            let report = this.apply(&event).await;
            if tx.send(report).is_err() {
                debug!("Detached rebuild finished after its handle was dropped");
            }
        });
        DetachedRebuild { rx }
    }

    /// Re-run an explicit list of buckets
    pub async fn republish(&self, buckets: Vec<BucketKey>) -> RebuildReport {
        info!("Republishing {} bucket(s)", buckets.len());
        self.execute(InvalidationPlan::rebuild_only(buckets)).await
    }

    /// Publish every bucket derivable from current store state
    pub async fn rebuild_all(&self) -> Result<RebuildReport> {
        let buckets = self.all_buckets().await?;
        info!("Full rebuild of {} bucket(s)", buckets.len());
        Ok(self.execute(InvalidationPlan::rebuild_only(buckets)).await)
    }

    /// Every bucket a full build publishes, in key order
    pub async fn all_buckets(&self) -> Result<Vec<BucketKey>> {
        let mut buckets = family_listings();
        buckets.extend([
            BucketKey::HighlightPage,
            BucketKey::GetStartedIndex,
            BucketKey::DevList,
            BucketKey::PipelineList,
        ]);

        for family in self.store.list_families().await? {
            buckets.extend(family_filtered_listings(family.id));
        }
        for function in self.store.list_all_functions().await? {
            buckets.push(function_detail(function.id));
        }
        for article in self.store.list_articles().await? {
            buckets.push(BucketKey::DevDetail {
                article_id: article.id,
            });
        }
        for pipeline in self.store.list_pipelines().await? {
            buckets.push(BucketKey::PipelineDetail {
                pipeline_id: pipeline.id,
            });
        }

        buckets.sort();
        buckets.dedup();
        Ok(buckets)
    }

    async fn execute(&self, plan: InvalidationPlan) -> RebuildReport {
        let start = Instant::now();
        let mut report = RebuildReport::default();

        for unaddressed in plan.unaddressed {
            let err = RebuildError::Addressing(unaddressed.reason);
            report
                .failed
                .push(RebuildFailure::new(RebuildTarget::Unaddressed(unaddressed.kind), &err));
        }

        // Removals first: rebuilds planned alongside never target a removed subtree
        for subtree in plan.remove {
            match self.remove(subtree).await {
                Ok(_) => report.removed.push(subtree),
                Err(e) => report
                    .failed
                    .push(RebuildFailure::new(RebuildTarget::Subtree(subtree), &e)),
            }
        }

        let results: Vec<_> = stream::iter(plan.rebuild.into_iter().map(|key| {
            let this = self.clone();
            async move {
                let handle = tokio::spawn(async move { this.rebuild(key).await });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_err) => Err(RebuildError::Panicked(join_err.to_string())),
                };
                (key, result)
            }
        }))
        .buffer_unordered(self.max_parallel)
        .collect()
        .await;

        for (key, result) in results {
            match result {
                Ok(BucketOutcome::Published) => report.succeeded.push(key),
                Ok(BucketOutcome::Vanished) => report.skipped.push(key),
                Err(e) => report
                    .failed
                    .push(RebuildFailure::new(RebuildTarget::Bucket(key), &e)),
            }
        }

        report.sort();
        report.duration_ms = start.elapsed().as_millis() as u64;

        for failure in &report.failed {
            error!(
                artifact = %failure.target,
                category = %failure.category,
                error = %failure.error,
                "Stale artifact: rebuild failed"
            );
        }
        info!(
            "Rebuild finished in {}ms: {} published, {} removed, {} skipped, {} failed",
            report.duration_ms,
            report.succeeded.len(),
            report.removed.len(),
            report.skipped.len(),
            report.failed.len()
        );

        report
    }

    async fn remove(&self, subtree: SubtreeKey) -> std::result::Result<bool, RebuildError> {
        let guard = self.locks.subtree(&subtree).write_owned().await;
        let result = self.publisher.remove_subtree(&subtree).await;
        drop(guard);
        if result.is_ok() {
            self.locks.evict(&subtree);
        }
        result
    }

    async fn rebuild(&self, key: BucketKey) -> std::result::Result<BucketOutcome, RebuildError> {
        let _subtree_guard = match key.enclosing_subtree() {
            Some(subtree) => Some(self.locks.subtree(&subtree).read_owned().await),
            None => None,
        };
        let _bucket_guard = self.locks.bucket(&key).lock_owned().await;

        let input = match views::gather(self.store.as_ref(), &key).await {
            Ok(input) => input,
            Err(RebuildError::Gather(e))
                if e.kind == ErrorKind::NotFound && key.enclosing_subtree().is_some() =>
            {
                warn!("Bucket {} skipped: {}", key, e);
                return Ok(BucketOutcome::Vanished);
            }
            Err(e) => return Err(e),
        };

        let markup = self.renderer.render(input.template, &input.data)?;
        self.publisher.publish(&key, &markup).await?;
        Ok(BucketOutcome::Published)
    }
}

/// Handle of a rebuild running on its own task
#[derive(Debug)]
pub struct DetachedRebuild {
    rx: oneshot::Receiver<RebuildReport>,
}

impl DetachedRebuild {
    pub async fn wait(self) -> Result<RebuildReport> {
        self.rx.await.map_err(|_| {
            OrchestratorError::TaskFailed("rebuild task ended without a report".to_string())
        })
    }
}
