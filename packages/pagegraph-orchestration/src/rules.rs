//! Invalidation rule table
//!
//! [`invalidated_kinds`] is the declarative table: (entity, mutation kind) →
//! the bucket kinds that may go stale. [`plan`] expands one row into concrete
//! bucket keys using the event's pre/post snapshots. Rows are conditional
//! only where the snapshots prove a bucket cannot have changed (a benchmark
//! title edit on an unhighlighted benchmark never touches the highlight page).

use std::collections::BTreeSet;

use pagegraph_storage::{
    BenchmarkSnapshot, DatasetSnapshot, EntityKind, EntitySnapshot, FamilySnapshot,
    FunctionSnapshot, HasFamilyAndApiLevel, MutationEvent, MutationKind,
};

use crate::addressing::{
    family_filtered_listings, family_listings, filtered_listings, function_detail, BucketKey,
    BucketKind, SubtreeKey,
};

/// Concrete work derived from one mutation event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub rebuild: BTreeSet<BucketKey>,
    pub remove: BTreeSet<SubtreeKey>,
    /// Bucket kinds that could not be addressed (missing or mistyped snapshot)
    pub unaddressed: Vec<Unaddressed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unaddressed {
    pub kind: BucketKind,
    pub reason: String,
}

impl InvalidationPlan {
    pub fn rebuild_only(buckets: impl IntoIterator<Item = BucketKey>) -> Self {
        Self {
            rebuild: buckets.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rebuild.is_empty() && self.remove.is_empty() && self.unaddressed.is_empty()
    }

    fn extend(&mut self, buckets: impl IntoIterator<Item = BucketKey>) {
        self.rebuild.extend(buckets);
    }

    fn add(&mut self, bucket: BucketKey) {
        self.rebuild.insert(bucket);
    }

    fn unaddressable(&mut self, kinds: &[BucketKind], reason: impl Into<String>) {
        let reason = reason.into();
        self.unaddressed.extend(kinds.iter().map(|kind| Unaddressed {
            kind: *kind,
            reason: reason.clone(),
        }));
    }

    /// Buckets inside a removed subtree are not rebuilt
    fn settle(mut self) -> Self {
        let remove = &self.remove;
        self.rebuild
            .retain(|bucket| !remove.iter().any(|subtree| subtree.contains(bucket)));
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Rule table
// ═══════════════════════════════════════════════════════════════════════════

use BucketKind as K;

/// Bucket kinds a mutation may invalidate
pub fn invalidated_kinds(entity: EntityKind, kind: MutationKind) -> &'static [BucketKind] {
    use EntityKind as E;
    use MutationKind as M;

    match (entity, kind) {
        (E::Function, M::Create) => &[K::FunctionDetail, K::FilteredListing],
        (E::Function, M::Update | M::Move | M::Delete) => &[
            K::FunctionDetail,
            K::FilteredListing,
            K::GetStartedIndex,
            K::HighlightPage,
        ],

        (E::Benchmark | E::BenchmarkDataset, _) => &[K::FunctionDetail, K::HighlightPage],

        (E::Family, M::Create) => &[K::FamilyListing, K::FilteredListing],
        (E::Family, M::Update | M::Move) => {
            &[K::FamilyListing, K::FilteredListing, K::FunctionDetail]
        }
        (E::Family, M::Delete) => &[K::FamilyListing, K::FilteredListing],

        (E::Dataset, M::Create) => &[],
        (E::Dataset, M::Update | M::Move) => &[K::FunctionDetail, K::PipelineDetail],
        (E::Dataset, M::Delete) => &[K::FunctionDetail],

        (E::GetStarted, _) => &[K::GetStartedIndex],
        (E::DevArticle, _) => &[K::DevList, K::DevDetail],
        (E::Pipeline | E::PipelineDataset, _) => &[K::PipelineList, K::PipelineDetail],
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Planning
// ═══════════════════════════════════════════════════════════════════════════

/// Expand the rule row of `event` into bucket keys
pub fn plan(event: &MutationEvent) -> InvalidationPlan {
    let kinds = invalidated_kinds(event.entity, event.kind);
    let mut plan = InvalidationPlan::default();

    let result = match event.entity {
        EntityKind::Function => snapshots(event, as_function)
            .and_then(|(pre, post)| plan_function(&mut plan, event.kind, pre, post)),
        EntityKind::Benchmark | EntityKind::BenchmarkDataset => snapshots(event, as_benchmark)
            .and_then(|(pre, post)| plan_benchmark(&mut plan, pre, post)),
        EntityKind::Family => snapshots(event, as_family)
            .and_then(|(pre, post)| plan_family(&mut plan, event.kind, pre, post)),
        EntityKind::Dataset => snapshots(event, as_dataset)
            .and_then(|(pre, post)| plan_dataset(&mut plan, event.kind, pre, post)),
        EntityKind::GetStarted => {
            plan.add(BucketKey::GetStartedIndex);
            Ok(())
        }
        EntityKind::DevArticle => plan_detail_with_list(
            &mut plan,
            event,
            BucketKey::DevList,
            |id| BucketKey::DevDetail { article_id: id },
            |id| SubtreeKey::DevDetail { article_id: id },
        ),
        EntityKind::Pipeline | EntityKind::PipelineDataset => plan_detail_with_list(
            &mut plan,
            event,
            BucketKey::PipelineList,
            |id| BucketKey::PipelineDetail { pipeline_id: id },
            |id| SubtreeKey::PipelineDetail { pipeline_id: id },
        ),
    };

    if let Err(reason) = result {
        // Keys addressed before the missing snapshot was hit stay planned
        plan.unaddressable(kinds, reason);
    }

    plan.settle()
}

type Snapshots<'a, T> = (Option<&'a T>, Option<&'a T>);
type Planned = Result<(), String>;

fn as_function(s: &EntitySnapshot) -> Option<&FunctionSnapshot> {
    match s {
        EntitySnapshot::Function(f) => Some(f),
        _ => None,
    }
}

fn as_benchmark(s: &EntitySnapshot) -> Option<&BenchmarkSnapshot> {
    match s {
        EntitySnapshot::Benchmark(b) => Some(b),
        _ => None,
    }
}

fn as_family(s: &EntitySnapshot) -> Option<&FamilySnapshot> {
    match s {
        EntitySnapshot::Family(f) => Some(f),
        _ => None,
    }
}

fn as_dataset(s: &EntitySnapshot) -> Option<&DatasetSnapshot> {
    match s {
        EntitySnapshot::Dataset(d) => Some(d),
        _ => None,
    }
}

/// Typed pre/post snapshots; a snapshot of the wrong entity type is an error
fn snapshots<'a, T>(
    event: &'a MutationEvent,
    pick: fn(&EntitySnapshot) -> Option<&T>,
) -> Result<Snapshots<'a, T>, String> {
    let typed = |side: &'a Option<EntitySnapshot>, label: &str| -> Result<Option<&'a T>, String> {
        match side {
            None => Ok(None),
            Some(snapshot) => pick(snapshot).map(Some).ok_or_else(|| {
                format!(
                    "{} snapshot of {} {} event has the wrong entity type",
                    label, event.entity, event.kind
                )
            }),
        }
    };
    Ok((typed(&event.pre, "pre")?, typed(&event.post, "post")?))
}

fn required<'a, T>(
    snapshot: Option<&'a T>,
    label: &str,
    event_kind: MutationKind,
) -> Result<&'a T, String> {
    snapshot.ok_or_else(|| format!("{} event is missing its {} snapshot", event_kind, label))
}

fn plan_function(
    plan: &mut InvalidationPlan,
    kind: MutationKind,
    pre: Option<&FunctionSnapshot>,
    post: Option<&FunctionSnapshot>,
) -> Planned {
    match kind {
        MutationKind::Create => {
            let post = required(post, "post", kind)?;
            plan.add(function_detail(post.id));
            plan.extend(filtered_listings(post));
            plan.extend(post.sibling_ids.iter().copied().map(function_detail));
        }
        MutationKind::Update | MutationKind::Move => {
            let pre = required(pre, "pre", kind)?;
            let post = required(post, "post", kind)?;
            plan.add(function_detail(post.id));

            if pre.listing_fields_differ(post) {
                plan.extend(filtered_listings(post));
                plan.extend(post.sibling_ids.iter().copied().map(function_detail));
                if pre.placement() != post.placement() {
                    // Old placement comes from the pre-commit snapshot
                    plan.extend(filtered_listings(&pre.placement()));
                    plan.extend(pre.sibling_ids.iter().copied().map(function_detail));
                }
                if pre.has_get_started || post.has_get_started {
                    plan.add(BucketKey::GetStartedIndex);
                }
                if pre.benchmark_highlighted || post.benchmark_highlighted {
                    plan.add(BucketKey::HighlightPage);
                }
            }
        }
        MutationKind::Delete => {
            let pre = required(pre, "pre", kind)?;
            plan.remove.insert(SubtreeKey::FunctionDetail {
                function_id: pre.id,
            });
            plan.extend(filtered_listings(pre));
            plan.extend(pre.sibling_ids.iter().copied().map(function_detail));
            if pre.has_get_started {
                plan.add(BucketKey::GetStartedIndex);
            }
            if pre.benchmark_highlighted {
                plan.add(BucketKey::HighlightPage);
            }
        }
    }
    Ok(())
}

fn plan_benchmark(
    plan: &mut InvalidationPlan,
    pre: Option<&BenchmarkSnapshot>,
    post: Option<&BenchmarkSnapshot>,
) -> Planned {
    if pre.is_none() && post.is_none() {
        return Err("benchmark event carries no snapshot".to_string());
    }
    for snapshot in pre.iter().chain(post.iter()) {
        plan.add(function_detail(snapshot.function_impl_id));
    }

    let was_highlighted = pre.map_or(false, |b| b.highlighted);
    let is_highlighted = post.map_or(false, |b| b.highlighted);
    let highlighted_content_changed = match (pre, post) {
        (Some(pre), Some(post)) if was_highlighted && is_highlighted => {
            pre.title != post.title
                || pre.description_html != post.description_html
                || pre.function_impl_id != post.function_impl_id
        }
        _ => false,
    };
    if was_highlighted != is_highlighted || highlighted_content_changed {
        plan.add(BucketKey::HighlightPage);
    }
    Ok(())
}

fn plan_family(
    plan: &mut InvalidationPlan,
    kind: MutationKind,
    pre: Option<&FamilySnapshot>,
    post: Option<&FamilySnapshot>,
) -> Planned {
    plan.extend(family_listings());
    match kind {
        MutationKind::Create => {
            let post = required(post, "post", kind)?;
            plan.extend(family_filtered_listings(post.id));
        }
        MutationKind::Update | MutationKind::Move => {
            let pre = required(pre, "pre", kind)?;
            let post = required(post, "post", kind)?;
            // Filtered listings show the family's name; detail pages show it too
            if pre.display_name != post.display_name {
                plan.extend(family_filtered_listings(post.id));
            }
            plan.extend(post.function_ids.iter().copied().map(function_detail));
        }
        MutationKind::Delete => {
            let pre = required(pre, "pre", kind)?;
            plan.remove.insert(SubtreeKey::FamilyListings { family_id: pre.id });
        }
    }
    Ok(())
}

fn plan_dataset(
    plan: &mut InvalidationPlan,
    kind: MutationKind,
    pre: Option<&DatasetSnapshot>,
    post: Option<&DatasetSnapshot>,
) -> Planned {
    match kind {
        MutationKind::Create => {}
        MutationKind::Update | MutationKind::Move => {
            let pre = required(pre, "pre", kind)?;
            let post = required(post, "post", kind)?;
            for snapshot in [pre, post] {
                plan.extend(snapshot.used_by_functions.iter().copied().map(function_detail));
                plan.extend(
                    snapshot
                        .used_by_pipelines
                        .iter()
                        .map(|&pipeline_id| BucketKey::PipelineDetail { pipeline_id }),
                );
            }
        }
        MutationKind::Delete => {
            // Only default-dataset holders remain: referenced datasets cannot be deleted
            let pre = required(pre, "pre", kind)?;
            plan.extend(pre.used_by_functions.iter().copied().map(function_detail));
        }
    }
    Ok(())
}

fn plan_detail_with_list(
    plan: &mut InvalidationPlan,
    event: &MutationEvent,
    list: BucketKey,
    detail: fn(i64) -> BucketKey,
    subtree: fn(i64) -> SubtreeKey,
) -> Planned {
    plan.add(list);
    let id = event
        .entity_id()
        .ok_or_else(|| format!("{} event carries no snapshot", event.entity))?;
    if event.kind == MutationKind::Delete {
        plan.remove.insert(subtree(id));
    } else {
        plan.add(detail(id));
    }
    Ok(())
}
