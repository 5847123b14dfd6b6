/*
 * Pagegraph Orchestration - Incremental Artifact Rebuild Engine
 *
 * Turns committed catalogue mutations into the minimal set of static page
 * rebuilds and removals.
 *
 * Architecture:
 * - Addressing (pure: entity attributes → bucket keys)
 * - Rule Table (mutation shape → invalidated bucket kinds)
 * - Views (per-bucket store reads)
 * - Renderer / Publisher ports (HTML, atomic filesystem publish)
 * - Orchestrator (bounded parallel rebuilds, per-bucket locks, reports)
 */

// Public modules
pub mod addressing;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod publisher;
pub mod renderer;
pub mod rules;
pub mod service;
pub mod views;

// Re-exports
pub use addressing::{BucketKey, BucketKind, Facet, ListingFilter, SubtreeKey};
pub use config::{ConfigError, PagegraphConfig};
pub use error::{ErrorCategory, OrchestratorError, RebuildError, Result};
pub use orchestrator::{
    DetachedRebuild, RebuildFailure, RebuildOrchestrator, RebuildReport, RebuildTarget,
};
pub use publisher::{FsPublisher, Publisher};
pub use renderer::{HtmlRenderer, RenderError, Renderer, TemplateId};
pub use rules::{invalidated_kinds, plan, InvalidationPlan};
pub use service::{EditOutcome, EditService};
