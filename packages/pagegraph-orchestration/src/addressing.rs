//! Bucket addressing
//!
//! Every published artifact lives in a bucket named by a [`BucketKey`].
//! Keys are never stored: they are recomputed from entity attributes, from
//! the post-commit snapshot for current placement and from the pre-commit
//! snapshot for where an entity used to be. All functions here are pure.
//!
//! Layout under the output root:
//!
//! ```text
//! docs/function_doc/<id>/index.html
//! docs/show_functions/<family_id>/<api>/<network><gpu>/index.html
//! docs/show_families/<api>/index.html
//! benchmark/index.html
//! get_started/index.html
//! dev/show_dev/index.html
//! dev/dev/<id>/index.html
//! pipeline/show_pipeline/index.html
//! pipeline/pipeline/<id>/index.html
//! ```

use std::path::PathBuf;

use pagegraph_storage::{
    ApiLevel, ArticleId, FamilyId, FunctionId, HasFamilyAndApiLevel, PipelineId,
};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// Filter facets
// ═══════════════════════════════════════════════════════════════════════════

/// One axis of a filtered listing: `any` matches both values
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facet {
    Any,
    Yes,
    No,
}

impl Facet {
    pub const ALL: [Facet; 3] = [Facet::Any, Facet::Yes, Facet::No];

    pub fn as_str(&self) -> &'static str {
        match self {
            Facet::Any => "any",
            Facet::Yes => "yes",
            Facet::No => "no",
        }
    }

    /// Value a matching row must have (`None` = unconstrained)
    pub fn required(&self) -> Option<bool> {
        match self {
            Facet::Any => None,
            Facet::Yes => Some(true),
            Facet::No => Some(false),
        }
    }

    pub fn matches(&self, value: bool) -> bool {
        self.required().map_or(true, |required| required == value)
    }
}

impl std::fmt::Display for Facet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// (network, gpu) filter pair of a filtered listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListingFilter {
    pub network: Facet,
    pub gpu: Facet,
}

impl ListingFilter {
    pub fn new(network: Facet, gpu: Facet) -> Self {
        Self { network, gpu }
    }

    /// Cartesian product of both facet domains
    pub fn all() -> impl Iterator<Item = ListingFilter> {
        Facet::ALL
            .into_iter()
            .flat_map(|network| Facet::ALL.into_iter().map(move |gpu| Self::new(network, gpu)))
    }

    pub fn matches(&self, network: bool, gpu: bool) -> bool {
        self.network.matches(network) && self.gpu.matches(gpu)
    }

    /// Directory name, e.g. `noyes`
    pub fn segment(&self) -> String {
        format!("{}{}", self.network.as_str(), self.gpu.as_str())
    }

    pub fn parse_segment(segment: &str) -> Option<Self> {
        Self::all().find(|filter| filter.segment() == segment)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bucket keys
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    FunctionDetail,
    FamilyListing,
    FilteredListing,
    HighlightPage,
    GetStartedIndex,
    DevList,
    DevDetail,
    PipelineList,
    PipelineDetail,
}

impl BucketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::FunctionDetail => "function_detail",
            BucketKind::FamilyListing => "family_listing",
            BucketKind::FilteredListing => "filtered_listing",
            BucketKind::HighlightPage => "highlight_page",
            BucketKind::GetStartedIndex => "get_started_index",
            BucketKind::DevList => "dev_list",
            BucketKind::DevDetail => "dev_detail",
            BucketKind::PipelineList => "pipeline_list",
            BucketKind::PipelineDetail => "pipeline_detail",
        }
    }
}

impl std::fmt::Display for BucketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Addressable slot for one published artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketKey {
    FunctionDetail {
        function_id: FunctionId,
    },
    FamilyListing {
        api_level: ApiLevel,
    },
    FilteredListing {
        family_id: FamilyId,
        api_level: ApiLevel,
        filter: ListingFilter,
    },
    HighlightPage,
    GetStartedIndex,
    DevList,
    DevDetail {
        article_id: ArticleId,
    },
    PipelineList,
    PipelineDetail {
        pipeline_id: PipelineId,
    },
}

impl BucketKey {
    pub fn kind(&self) -> BucketKind {
        match self {
            BucketKey::FunctionDetail { .. } => BucketKind::FunctionDetail,
            BucketKey::FamilyListing { .. } => BucketKind::FamilyListing,
            BucketKey::FilteredListing { .. } => BucketKind::FilteredListing,
            BucketKey::HighlightPage => BucketKind::HighlightPage,
            BucketKey::GetStartedIndex => BucketKind::GetStartedIndex,
            BucketKey::DevList => BucketKind::DevList,
            BucketKey::DevDetail { .. } => BucketKind::DevDetail,
            BucketKey::PipelineList => BucketKind::PipelineList,
            BucketKey::PipelineDetail { .. } => BucketKind::PipelineDetail,
        }
    }

    /// Directory segments below the output root
    pub fn segments(&self) -> Vec<String> {
        match self {
            BucketKey::FunctionDetail { function_id } => {
                segments(&["docs", "function_doc"], Some(*function_id))
            }
            BucketKey::FamilyListing { api_level } => {
                segments(&["docs", "show_families", api_level.as_str()], None)
            }
            BucketKey::FilteredListing {
                family_id,
                api_level,
                filter,
            } => {
                let mut out = segments(&["docs", "show_functions"], Some(*family_id));
                out.push(api_level.as_str().to_string());
                out.push(filter.segment());
                out
            }
            BucketKey::HighlightPage => segments(&["benchmark"], None),
            BucketKey::GetStartedIndex => segments(&["get_started"], None),
            BucketKey::DevList => segments(&["dev", "show_dev"], None),
            BucketKey::DevDetail { article_id } => segments(&["dev", "dev"], Some(*article_id)),
            BucketKey::PipelineList => segments(&["pipeline", "show_pipeline"], None),
            BucketKey::PipelineDetail { pipeline_id } => {
                segments(&["pipeline", "pipeline"], Some(*pipeline_id))
            }
        }
    }

    pub fn relative_dir(&self) -> PathBuf {
        self.segments().iter().collect()
    }

    /// Subtree removed together with this bucket, if any
    pub fn enclosing_subtree(&self) -> Option<SubtreeKey> {
        match *self {
            BucketKey::FunctionDetail { function_id } => Some(SubtreeKey::FunctionDetail {
                function_id,
            }),
            BucketKey::FilteredListing { family_id, .. } => {
                Some(SubtreeKey::FamilyListings { family_id })
            }
            BucketKey::DevDetail { article_id } => Some(SubtreeKey::DevDetail { article_id }),
            BucketKey::PipelineDetail { pipeline_id } => {
                Some(SubtreeKey::PipelineDetail { pipeline_id })
            }
            _ => None,
        }
    }

    /// Parse the path form (`docs/show_functions/7/high/noyes`); a trailing
    /// `/index.html` or slash is accepted.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path
            .trim()
            .trim_end_matches("index.html")
            .trim_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();

        let key = match parts.as_slice() {
            ["docs", "function_doc", id] => BucketKey::FunctionDetail {
                function_id: parse_id(id, path)?,
            },
            ["docs", "show_families", api] => BucketKey::FamilyListing {
                api_level: parse_api_level(api, path)?,
            },
            ["docs", "show_functions", family, api, filter] => BucketKey::FilteredListing {
                family_id: parse_id(family, path)?,
                api_level: parse_api_level(api, path)?,
                filter: ListingFilter::parse_segment(filter)
                    .ok_or_else(|| OrchestratorError::invalid_bucket(path))?,
            },
            ["benchmark"] => BucketKey::HighlightPage,
            ["get_started"] => BucketKey::GetStartedIndex,
            ["dev", "show_dev"] => BucketKey::DevList,
            ["dev", "dev", id] => BucketKey::DevDetail {
                article_id: parse_id(id, path)?,
            },
            ["pipeline", "show_pipeline"] => BucketKey::PipelineList,
            ["pipeline", "pipeline", id] => BucketKey::PipelineDetail {
                pipeline_id: parse_id(id, path)?,
            },
            _ => return Err(OrchestratorError::invalid_bucket(path)),
        };
        Ok(key)
    }
}

fn segments(fixed: &[&str], id: Option<i64>) -> Vec<String> {
    let mut out: Vec<String> = fixed.iter().map(|s| s.to_string()).collect();
    if let Some(id) = id {
        out.push(id.to_string());
    }
    out
}

fn parse_id(raw: &str, path: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| OrchestratorError::invalid_bucket(path))
}

fn parse_api_level(raw: &str, path: &str) -> Result<ApiLevel> {
    ApiLevel::from_str(raw).map_err(|_| OrchestratorError::invalid_bucket(path))
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}

/// Directory of artifacts removed as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubtreeKey {
    FunctionDetail { function_id: FunctionId },
    /// All 18 filtered listings of a family
    FamilyListings { family_id: FamilyId },
    DevDetail { article_id: ArticleId },
    PipelineDetail { pipeline_id: PipelineId },
}

impl SubtreeKey {
    pub fn segments(&self) -> Vec<String> {
        let (a, b, id) = match *self {
            SubtreeKey::FunctionDetail { function_id } => ("docs", "function_doc", function_id),
            SubtreeKey::FamilyListings { family_id } => ("docs", "show_functions", family_id),
            SubtreeKey::DevDetail { article_id } => ("dev", "dev", article_id),
            SubtreeKey::PipelineDetail { pipeline_id } => ("pipeline", "pipeline", pipeline_id),
        };
        vec![a.to_string(), b.to_string(), id.to_string()]
    }

    pub fn relative_dir(&self) -> PathBuf {
        self.segments().iter().collect()
    }

    pub fn contains(&self, bucket: &BucketKey) -> bool {
        bucket.enclosing_subtree().as_ref() == Some(self)
    }
}

impl std::fmt::Display for SubtreeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Addressing functions
// ═══════════════════════════════════════════════════════════════════════════

pub fn function_detail(function_id: FunctionId) -> BucketKey {
    BucketKey::FunctionDetail { function_id }
}

/// The nine filtered listings of one (family, api level) placement
pub fn filtered_listings<P: HasFamilyAndApiLevel + ?Sized>(placement: &P) -> Vec<BucketKey> {
    let family_id = placement.family_id();
    let api_level = placement.api_level();
    ListingFilter::all()
        .map(|filter| BucketKey::FilteredListing {
            family_id,
            api_level,
            filter,
        })
        .collect()
}

/// Both api levels' filtered listings of a family (18 buckets)
pub fn family_filtered_listings(family_id: FamilyId) -> Vec<BucketKey> {
    ApiLevel::ALL
        .into_iter()
        .flat_map(|api_level| {
            filtered_listings(&pagegraph_storage::ListingPlacement::new(family_id, api_level))
        })
        .collect()
}

pub fn family_listings() -> Vec<BucketKey> {
    ApiLevel::ALL
        .into_iter()
        .map(|api_level| BucketKey::FamilyListing { api_level })
        .collect()
}

/// Filtered listings a function with these attributes appears in
pub fn listings_containing<P: HasFamilyAndApiLevel + ?Sized>(
    placement: &P,
    network: bool,
    gpu: bool,
) -> Vec<BucketKey> {
    filtered_listings(placement)
        .into_iter()
        .filter(|key| match key {
            BucketKey::FilteredListing { filter, .. } => filter.matches(network, gpu),
            _ => false,
        })
        .collect()
}
