use crate::analytics::{Analytics, ChartLayout, ChartModel, Point};
use crate::block::{self, Block, BlockContent, BuildOptions, Category};
use crate::config::ViewerConfig;
use crate::format::RichText;
use crate::metadata::SessionHeader;
use crate::record::Transcript;
use crate::state::{FILTERS_KEY, ViewState};
use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::info;

const PAGE: &str = include_str!("page.html");

// ===================================================================
// Document: one full parse of a JSONL text
// ===================================================================

/// Everything derived from one document. A new document replaces it whole.
#[derive(Debug)]
pub struct Document {
    pub header: Option<SessionHeader>,
    pub blocks: Vec<Block>,
    pub analytics: Analytics,
    /// 1-based line numbers that were not valid JSON.
    pub unparsed_lines: Vec<usize>,
}

impl Document {
    pub fn parse(text: &str, config: &ViewerConfig, rich_text: &dyn RichText) -> Self {
        let (transcript, unparsed_lines) = Transcript::parse(text);
        let opts = BuildOptions {
            collapse_chars: config.collapse_chars,
            collapse_lines: config.collapse_lines,
            rich_text,
        };
        let built = block::build(transcript.events(), &opts);
        let analytics = Analytics::collect(transcript.events(), &config.rates());
        info!(
            shape = ?transcript.shape(),
            blocks = built.blocks.len(),
            unparsed = unparsed_lines.len(),
            samples = analytics.samples.len(),
            "parsed document"
        );
        Self {
            header: built.header,
            blocks: built.blocks,
            analytics,
            unparsed_lines,
        }
    }
}

// ===================================================================
// Rendered: the output contract
// ===================================================================

/// One filter checkbox, for a category that occurs in the document.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOption {
    pub category: Category,
    pub label: &'static str,
    pub count: usize,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedBlock {
    #[serde(flatten)]
    pub block: Block,
    /// Category filtered out.
    pub hidden: bool,
    /// Current collapse state; always false for non-collapsible blocks.
    pub collapsed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageTotals {
    pub samples: usize,
    pub interventions: usize,
    pub turn_cost_usd: f64,
    pub final_cumulative_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rendered {
    pub title: String,
    pub header: Option<SessionHeader>,
    pub blocks: Vec<RenderedBlock>,
    pub filters: Vec<FilterOption>,
    pub chart: Option<ChartModel>,
    pub show_cumulative: bool,
    pub usage: UsageTotals,
    /// Blocks not filtered out.
    pub visible_count: usize,
    pub unparsed_lines: Vec<usize>,
}

impl Rendered {
    /// Combine a parsed document with the current view state.
    pub fn assemble(doc: Document, config: &ViewerConfig, state: &ViewState) -> Self {
        let filters = Category::ALL
            .into_iter()
            .filter_map(|category| {
                let count = doc.blocks.iter().filter(|b| b.category == category).count();
                (count > 0).then(|| FilterOption {
                    category,
                    label: category.label(),
                    count,
                    visible: state.is_visible(category),
                })
            })
            .collect();
        let chart = ChartModel::compute(&doc.analytics, ChartLayout::default());
        let usage = UsageTotals {
            samples: doc.analytics.samples.len(),
            interventions: doc.analytics.markers.len(),
            turn_cost_usd: doc.analytics.samples.iter().map(|s| s.turn_cost_usd).sum(),
            final_cumulative_cost_usd: doc.analytics.final_cumulative_cost(),
        };
        let visible_count = state.visible_blocks(&doc.blocks).count();
        let blocks = doc
            .blocks
            .into_iter()
            .map(|block| RenderedBlock {
                hidden: !state.is_visible(block.category),
                collapsed: block.collapsible && state.is_collapsed(block.index),
                block,
            })
            .collect();
        Self {
            title: config.title.clone(),
            header: doc.header,
            blocks,
            filters,
            chart,
            show_cumulative: config.show_cumulative,
            usage,
            visible_count,
            unparsed_lines: doc.unparsed_lines,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing rendered document")
    }

    pub fn to_html(&self) -> Result<String> {
        let header_rows: Vec<HeaderRow> = self
            .header
            .iter()
            .flat_map(|h| h.rows())
            .map(|(label, value)| HeaderRow { label, value })
            .collect();
        let blocks: Vec<BlockView> = self.blocks.iter().map(BlockView::from).collect();
        let chart = self
            .chart
            .as_ref()
            .map(|c| ChartView::new(c, self.show_cumulative));
        let total_cost = self.usage.final_cumulative_cost_usd.map(dollars);

        let mut env = Environment::new();
        env.add_template("page.html", PAGE)
            .context("parsing page template")?;
        let tmpl = env.get_template("page.html").context("loading page template")?;
        tmpl.render(context! {
            title => &self.title,
            header_rows,
            chart,
            total_cost,
            filters => &self.filters,
            visible_count => self.visible_count,
            blocks,
            storage_key => FILTERS_KEY,
        })
        .context("rendering page")
    }
}

// ===================================================================
// Template views
// ===================================================================

#[derive(Serialize)]
struct HeaderRow<'a> {
    label: &'static str,
    value: &'a str,
}

#[derive(Serialize)]
struct BlockView<'a> {
    index: usize,
    category: &'static str,
    title: &'a str,
    timestamp: Option<&'a str>,
    collapsible: bool,
    collapsed: bool,
    hidden: bool,
    patch: Option<&'a str>,
    html: &'a str,
}

impl<'a> From<&'a RenderedBlock> for BlockView<'a> {
    fn from(r: &'a RenderedBlock) -> Self {
        let b = &r.block;
        let patch = match &b.content {
            BlockContent::ApplyPatch { encoded, .. } => Some(encoded.as_str()),
            _ => None,
        };
        Self {
            index: b.index,
            category: b.category.key(),
            title: &b.title,
            timestamp: b.timestamp.as_deref(),
            collapsible: b.collapsible,
            collapsed: r.collapsed,
            hidden: r.hidden,
            patch,
            html: &b.html,
        }
    }
}

#[derive(Serialize)]
struct ChartView {
    width: f64,
    height: f64,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
    plot_width: f64,
    plot_height: f64,
    input: String,
    output: String,
    turn_cost: String,
    turn_cost_combined: String,
    cumulative: Option<String>,
    cumulative_shown: bool,
    markers: Vec<String>,
    token_max: String,
    cost_max: String,
    combined_max: Option<String>,
}

impl ChartView {
    fn new(chart: &ChartModel, show_cumulative: bool) -> Self {
        let plot = &chart.plot;
        let cumulative = chart
            .combined_cost_axis
            .is_some()
            .then(|| polyline(&chart.cumulative_cost));
        Self {
            width: chart.layout.width,
            height: chart.layout.height,
            left: plot.x,
            right: plot.x + plot.width,
            top: plot.y,
            bottom: plot.y + plot.height,
            plot_width: plot.width,
            plot_height: plot.height,
            input: polyline(&chart.input_tokens),
            output: polyline(&chart.output_tokens),
            turn_cost: polyline(&chart.turn_cost),
            turn_cost_combined: polyline(&chart.turn_cost_combined),
            cumulative_shown: show_cumulative && cumulative.is_some(),
            cumulative,
            markers: chart.markers.iter().map(|m| format!("{:.1}", m.x)).collect(),
            token_max: format!("{:.0}", chart.token_axis.max),
            cost_max: dollars(chart.cost_axis.max),
            combined_max: chart.combined_cost_axis.map(|a| dollars(a.max)),
        }
    }
}

/// SVG `points` attribute value.
pub fn polyline(points: &[Point]) -> String {
    points
        .iter()
        .map(|p| format!("{:.1},{:.1}", p.x, p.y))
        .collect::<Vec<_>>()
        .join(" ")
}

fn dollars(amount: f64) -> String {
    if amount < 0.01 && amount > 0.0 {
        format!("${amount:.4}")
    } else {
        format!("${amount:.2}")
    }
}

// ===================================================================
// Error document
// ===================================================================

const ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8" />
<title>{{ title }}</title>
</head>
<body>
<div class="container">
<h1>{{ title }}</h1>
<p class="error">Failed to load log: {{ message }}</p>
</div>
</body>
</html>
"#;

/// A page carrying only the reason the log could not be loaded.
pub fn error_html(title: &str, message: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("error.html", ERROR_PAGE)
        .context("parsing error template")?;
    let tmpl = env.get_template("error.html").context("loading error template")?;
    tmpl.render(context! { title, message })
        .context("rendering error page")
}

pub fn error_json(message: &str) -> Result<String> {
    serde_json::to_string_pretty(&serde_json::json!({ "error": message }))
        .context("serializing error document")
}
