//! Renderer port and the built-in HTML renderer
//!
//! `render(template, data) -> markup` is pure: the same view always yields
//! the same bytes, which is what makes republishing idempotent.

use std::fmt::Write as _;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::addressing::{BucketKind, Facet};
use crate::error::RebuildError;
use crate::views::*;

/// Template a bucket renders with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    FunctionDetail,
    FamilyListing,
    FilteredListing,
    Highlight,
    GetStarted,
    DevList,
    DevDetail,
    PipelineList,
    PipelineDetail,
}

impl TemplateId {
    pub fn for_bucket(kind: BucketKind) -> Self {
        match kind {
            BucketKind::FunctionDetail => TemplateId::FunctionDetail,
            BucketKind::FamilyListing => TemplateId::FamilyListing,
            BucketKind::FilteredListing => TemplateId::FilteredListing,
            BucketKind::HighlightPage => TemplateId::Highlight,
            BucketKind::GetStartedIndex => TemplateId::GetStarted,
            BucketKind::DevList => TemplateId::DevList,
            BucketKind::DevDetail => TemplateId::DevDetail,
            BucketKind::PipelineList => TemplateId::PipelineList,
            BucketKind::PipelineDetail => TemplateId::PipelineDetail,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::FunctionDetail => "docs/function.html",
            TemplateId::FamilyListing => "docs/families.html",
            TemplateId::FilteredListing => "docs/doc_cards.html",
            TemplateId::Highlight => "benchmark.html",
            TemplateId::GetStarted => "get_started.html",
            TemplateId::DevList => "dev/show_dev.html",
            TemplateId::DevDetail => "dev/dev.html",
            TemplateId::PipelineList => "pipeline/show_pipeline.html",
            TemplateId::PipelineDetail => "pipeline/pipeline.html",
        }
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{template}: {message}")]
pub struct RenderError {
    pub template: TemplateId,
    pub message: String,
}

impl RenderError {
    pub fn new(template: TemplateId, message: impl Into<String>) -> Self {
        Self {
            template,
            message: message.into(),
        }
    }
}

impl From<RenderError> for RebuildError {
    fn from(e: RenderError) -> Self {
        RebuildError::Render {
            template: e.template.to_string(),
            message: e.message,
        }
    }
}

/// Renderer port
pub trait Renderer: Send + Sync {
    fn render(&self, template: TemplateId, data: &Value) -> Result<String, RenderError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// HTML renderer
// ═══════════════════════════════════════════════════════════════════════════

/// Plain HTML renderer. Fields named `*_html` (and family descriptions) are
/// trusted markup authored in the CMS and inserted verbatim; everything else
/// is escaped.
#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    site_title: String,
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new("Documentation")
    }
}

impl HtmlRenderer {
    pub fn new(site_title: impl Into<String>) -> Self {
        Self {
            site_title: site_title.into(),
        }
    }

    fn view<V: DeserializeOwned>(template: TemplateId, data: &Value) -> Result<V, RenderError> {
        V::deserialize(data).map_err(|e| RenderError::new(template, e.to_string()))
    }

    fn page(&self, title: &str, body: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{} | {}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
            escape(title),
            escape(&self.site_title),
            body
        )
    }
}

impl Renderer for HtmlRenderer {
    fn render(&self, template: TemplateId, data: &Value) -> Result<String, RenderError> {
        let (title, body) = match template {
            TemplateId::FunctionDetail => {
                let view: FunctionDetailView = Self::view(template, data)?;
                (view.function.real_name.clone(), function_detail(&view))
            }
            TemplateId::FamilyListing => {
                let view: FamilyListingView = Self::view(template, data)?;
                (format!("{} level API", view.api_level), family_listing(&view))
            }
            TemplateId::FilteredListing => {
                let view: FilteredListingView = Self::view(template, data)?;
                (
                    format!("{} ({})", view.family.display_name, view.api_level),
                    filtered_listing(&view),
                )
            }
            TemplateId::Highlight => {
                let view: HighlightView = Self::view(template, data)?;
                ("Benchmarks".to_string(), highlight(&view))
            }
            TemplateId::GetStarted => {
                let view: GetStartedView = Self::view(template, data)?;
                ("Get started".to_string(), get_started(&view))
            }
            TemplateId::DevList => {
                let view: DevListView = Self::view(template, data)?;
                let items = view
                    .articles
                    .iter()
                    .map(|a| link(&format!("/dev/dev/{}/", a.id), &a.title))
                    .collect::<Vec<_>>();
                ("Development".to_string(), list("articles", &items))
            }
            TemplateId::DevDetail => {
                let view: DevDetailView = Self::view(template, data)?;
                let body = format!(
                    "<h1>{}</h1>\n<div class=\"description\">{}</div>\n",
                    escape(&view.article.title),
                    view.article.description_html
                );
                (view.article.title, body)
            }
            TemplateId::PipelineList => {
                let view: PipelineListView = Self::view(template, data)?;
                let items = view
                    .pipelines
                    .iter()
                    .map(|p| link(&format!("/pipeline/pipeline/{}/", p.id), &p.title))
                    .collect::<Vec<_>>();
                ("Pipelines".to_string(), list("pipelines", &items))
            }
            TemplateId::PipelineDetail => {
                let view: PipelineDetailView = Self::view(template, data)?;
                let mut body = format!(
                    "<h1>{}</h1>\n<div class=\"description\">{}</div>\n",
                    escape(&view.pipeline.title),
                    view.pipeline.description_html
                );
                body.push_str(&datasets(&view.datasets));
                (view.pipeline.title, body)
            }
        };
        Ok(self.page(&title, &body))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Fragments
// ═══════════════════════════════════════════════════════════════════════════

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn link(href: &str, text: &str) -> String {
    format!("<a href=\"{}\">{}</a>", escape(href), escape(text))
}

fn list(class: &str, items: &[String]) -> String {
    let mut out = format!("<ul class=\"{}\">\n", class);
    for item in items {
        let _ = writeln!(out, "<li>{}</li>", item);
    }
    out.push_str("</ul>\n");
    out
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn card(card: &FunctionCard) -> String {
    format!(
        "<div class=\"card\">{}<p>{}</p><span class=\"tags\">network: {}, gpu: {}</span></div>",
        link(&format!("/docs/function_doc/{}/", card.id), &card.real_name),
        escape(&card.summary),
        yes_no(card.network),
        yes_no(card.gpu)
    )
}

fn datasets(datasets: &[pagegraph_storage::Dataset]) -> String {
    if datasets.is_empty() {
        return String::new();
    }
    let items = datasets
        .iter()
        .map(|d| match &d.download_url {
            Some(url) => link(url, &format!("{} {}", d.name, d.version)),
            None => escape(&format!("{} {}", d.name, d.version)),
        })
        .collect::<Vec<_>>();
    format!("<h2>Datasets</h2>\n{}", list("datasets", &items))
}

fn function_detail(view: &FunctionDetailView) -> String {
    let f = &view.function;
    let mut out = String::new();
    let _ = writeln!(out, "<h1>{}</h1>", escape(&f.real_name));
    let _ = writeln!(
        out,
        "<p class=\"family\">{} &middot; {} level</p>",
        link(
            &format!("/docs/show_functions/{}/{}/anyany/", view.family.id, f.api_level),
            &view.family.display_name
        ),
        f.api_level
    );
    let _ = writeln!(out, "<p class=\"summary\">{}</p>", escape(&f.summary));
    if let Some(signature) = &f.signature_html {
        let _ = writeln!(out, "<div class=\"signature\">{}</div>", signature);
    }
    if let Some(description) = &f.description_html {
        let _ = writeln!(out, "<div class=\"description\">{}</div>", description);
    }
    if let Some(dataset) = &view.default_dataset {
        let _ = writeln!(
            out,
            "<p class=\"default-dataset\">Default dataset: {}</p>",
            escape(&format!("{} {}", dataset.name, dataset.version))
        );
    }
    if let Some(section) = &view.benchmark {
        let _ = writeln!(
            out,
            "<section class=\"benchmark\">\n<h2>{}</h2>\n<div>{}</div>\n{}</section>",
            escape(&section.benchmark.title),
            section.benchmark.description_html,
            datasets(&section.datasets)
        );
    }
    if !view.siblings.is_empty() {
        let items = view.siblings.iter().map(card).collect::<Vec<_>>();
        let _ = write!(out, "<h2>Related functions</h2>\n{}", list("siblings", &items));
    }
    out
}

fn family_listing(view: &FamilyListingView) -> String {
    let items = view
        .families
        .iter()
        .map(|family| {
            let mut item = link(
                &format!("/docs/show_functions/{}/{}/anyany/", family.id, view.api_level),
                &family.display_name,
            );
            if let Some(description) = &family.description {
                let _ = write!(item, "<div class=\"description\">{}</div>", description);
            }
            item
        })
        .collect::<Vec<_>>();
    format!(
        "<h1>{} level API</h1>\n{}",
        escape(view.api_level.as_str()),
        list("families", &items)
    )
}

fn facet_label(name: &str, facet: Facet) -> String {
    format!("{}: {}", name, facet)
}

fn filtered_listing(view: &FilteredListingView) -> String {
    let mut out = format!(
        "<h1>{}</h1>\n<p class=\"filters\">{} &middot; {}</p>\n",
        escape(&view.family.display_name),
        facet_label("network", view.network),
        facet_label("gpu", view.gpu)
    );
    if view.cards.is_empty() {
        out.push_str("<p class=\"empty\">No functions match these filters.</p>\n");
    } else {
        let items = view.cards.iter().map(card).collect::<Vec<_>>();
        out.push_str(&list("cards", &items));
    }
    out
}

fn highlight(view: &HighlightView) -> String {
    let items = view
        .entries
        .iter()
        .map(|entry| {
            format!(
                "<h2>{}</h2>{}<div>{}</div>",
                escape(&entry.benchmark.title),
                link(
                    &format!("/docs/function_doc/{}/", entry.function_id),
                    &entry.function_name
                ),
                entry.benchmark.description_html
            )
        })
        .collect::<Vec<_>>();
    format!("<h1>Benchmarks</h1>\n{}", list("highlights", &items))
}

fn get_started(view: &GetStartedView) -> String {
    let items = view
        .plans
        .iter()
        .map(|entry| {
            format!(
                "{} {}",
                escape(&entry.plan.goal),
                link(
                    &format!("/docs/function_doc/{}/", entry.plan.function_impl_id),
                    &entry.function_name
                )
            )
        })
        .collect::<Vec<_>>();
    format!("<h1>Get started</h1>\n{}", list("plans", &items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pagegraph_storage::{ApiLevel, FunctionFamily};
    use pretty_assertions::assert_eq;

    fn family() -> FunctionFamily {
        FunctionFamily {
            id: 7,
            slug: "vision".to_string(),
            display_name: "Vision & Imaging".to_string(),
            description: Some("<em>pixels</em>".to_string()),
            created_at: Utc.timestamp_millis_opt(0).unwrap(),
        }
    }

    fn listing(cards: Vec<FunctionCard>) -> Value {
        serde_json::to_value(FilteredListingView {
            family: family(),
            api_level: ApiLevel::High,
            network: Facet::No,
            gpu: Facet::Yes,
            cards,
        })
        .unwrap()
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = HtmlRenderer::new("Docs");
        let data = listing(vec![]);
        let a = renderer.render(TemplateId::FilteredListing, &data).unwrap();
        let b = renderer.render(TemplateId::FilteredListing, &data).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("Vision &amp; Imaging"));
        assert!(a.contains("No functions match"));
        assert!(a.contains("<title>Vision &amp; Imaging (high) | Docs</title>"));
    }

    #[test]
    fn test_cards_link_to_detail_pages() {
        let renderer = HtmlRenderer::default();
        let html = renderer
            .render(
                TemplateId::FilteredListing,
                &listing(vec![FunctionCard {
                    id: 100,
                    real_name: "resize".to_string(),
                    summary: "Resize <an> image".to_string(),
                    api_level: ApiLevel::High,
                    network: false,
                    gpu: true,
                }]),
            )
            .unwrap();
        assert!(html.contains("/docs/function_doc/100/"));
        assert!(html.contains("Resize &lt;an&gt; image"));
        assert!(html.contains("network: no, gpu: yes"));
    }

    #[test]
    fn test_trusted_html_is_not_escaped() {
        let renderer = HtmlRenderer::default();
        let data = serde_json::to_value(FamilyListingView {
            api_level: ApiLevel::Low,
            families: vec![family()],
        })
        .unwrap();
        let html = renderer.render(TemplateId::FamilyListing, &data).unwrap();
        assert!(html.contains("<em>pixels</em>"));
        assert!(html.contains("/docs/show_functions/7/low/anyany/"));
    }

    #[test]
    fn test_mismatched_view_is_render_error() {
        let renderer = HtmlRenderer::default();
        let err = renderer
            .render(TemplateId::FunctionDetail, &serde_json::json!({"articles": []}))
            .unwrap_err();
        assert_eq!(err.template, TemplateId::FunctionDetail);

        let rebuild: RebuildError = err.into();
        assert!(matches!(
            rebuild,
            RebuildError::Render { ref template, .. } if template == "docs/function.html"
        ));
    }

    #[test]
    fn test_template_for_every_bucket_kind() {
        assert_eq!(
            TemplateId::for_bucket(BucketKind::FilteredListing).as_str(),
            "docs/doc_cards.html"
        );
        assert_eq!(
            TemplateId::for_bucket(BucketKind::HighlightPage),
            TemplateId::Highlight
        );
    }
}
