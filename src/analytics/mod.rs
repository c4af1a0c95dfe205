use crate::record::{EventSource, NormalizedEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

// ===================================================================
// Pricing
// ===================================================================

pub const DEFAULT_INPUT_PRICE_PER_MILLION: f64 = 1.75;
pub const DEFAULT_OUTPUT_PRICE_PER_MILLION: f64 = 14.00;

/// Per-million-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            input_per_million: DEFAULT_INPUT_PRICE_PER_MILLION,
            output_per_million: DEFAULT_OUTPUT_PRICE_PER_MILLION,
        }
    }
}

impl Rates {
    pub fn cost(&self, input_tokens: f64, output_tokens: f64) -> f64 {
        input_tokens * self.input_per_million / 1_000_000.0
            + output_tokens * self.output_per_million / 1_000_000.0
    }
}

/// Parse a counter: finite numbers, or strings holding one.
pub fn finite_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

// ===================================================================
// Samples and markers
// ===================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenUsageSample {
    pub progress_index: usize,
    pub timestamp: Option<String>,
    pub input_tokens: f64,
    pub output_tokens: f64,
    pub turn_cost_usd: f64,
    /// Cost of the running totals, when the event carried finite totals.
    pub cumulative_cost_usd: Option<f64>,
}

/// A human-authored message, drawn as a vertical line on the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterventionMarker {
    pub progress_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analytics {
    pub samples: Vec<TokenUsageSample>,
    pub markers: Vec<InterventionMarker>,
}

impl Analytics {
    /// Collect samples and intervention markers from a normalized stream.
    pub fn collect(events: &[NormalizedEvent], rates: &Rates) -> Self {
        let mut out = Analytics::default();
        for event in events {
            if matches!(event.source, EventSource::Unparsed(_)) {
                continue;
            }
            match event.discriminant() {
                "token_count" => {
                    if let Some(sample) = sample_from(event, rates) {
                        out.samples.push(sample);
                    }
                }
                "message" if event.str_field("role") == Some("user") => {
                    out.markers.push(InterventionMarker {
                        progress_index: event.progress_index,
                    });
                }
                "user_message" => out.markers.push(InterventionMarker {
                    progress_index: event.progress_index,
                }),
                _ => {}
            }
        }
        debug!(
            samples = out.samples.len(),
            markers = out.markers.len(),
            "collected usage analytics"
        );
        out
    }

    pub fn has_cumulative(&self) -> bool {
        self.samples.iter().any(|s| s.cumulative_cost_usd.is_some())
    }

    /// Cost of the last sample with running totals, if any.
    pub fn final_cumulative_cost(&self) -> Option<f64> {
        self.samples.iter().rev().find_map(|s| s.cumulative_cost_usd)
    }
}

fn sample_from(event: &NormalizedEvent, rates: &Rates) -> Option<TokenUsageSample> {
    let info = event
        .fields
        .get("info")
        .and_then(Value::as_object)
        .unwrap_or(&event.fields);
    let counters = |usage: &str| {
        let usage = info.get(usage)?;
        let input = usage.get("input_tokens").and_then(finite_number)?;
        let output = usage.get("output_tokens").and_then(finite_number)?;
        Some((input, output))
    };

    let Some((input_tokens, output_tokens)) = counters("last_token_usage") else {
        debug!(line = event.line, "token_count without numeric last-call counters");
        return None;
    };
    let cumulative_cost_usd = counters("total_token_usage").map(|(i, o)| rates.cost(i, o));

    Some(TokenUsageSample {
        progress_index: event.progress_index,
        timestamp: event.timestamp.clone(),
        input_tokens,
        output_tokens,
        turn_cost_usd: rates.cost(input_tokens, output_tokens),
        cumulative_cost_usd,
    })
}

// ===================================================================
// Chart geometry
// ===================================================================

/// Pixel dimensions of the chart and the margins around its plot area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartLayout {
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
}

impl Default for ChartLayout {
    fn default() -> Self {
        Self {
            width: 960.0,
            height: 280.0,
            margin_top: 16.0,
            margin_right: 72.0,
            margin_bottom: 32.0,
            margin_left: 72.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotArea {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PlotArea {
    fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Linear map of a value domain `[0, max]` onto the plot's vertical extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueAxis {
    pub max: f64,
}

impl ValueAxis {
    fn project(&self, plot: &PlotArea, value: f64) -> f64 {
        if self.max <= 0.0 {
            return plot.bottom();
        }
        plot.bottom() - (value / self.max) * plot.height
    }
}

/// Linear map of progress indices onto the plot's horizontal extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressAxis {
    pub min: usize,
    pub max: usize,
}

impl ProgressAxis {
    fn project(&self, plot: &PlotArea, progress: usize) -> f64 {
        let span = self.max.saturating_sub(self.min) as f64;
        if span <= 0.0 {
            return plot.x;
        }
        plot.x + (progress.saturating_sub(self.min) as f64 / span) * plot.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerLine {
    pub progress_index: usize,
    pub x: f64,
}

/// Dual-axis chart in pixel space: tokens on the left axis, cost on the
/// right. Per-turn cost and the turn+cumulative overlay are scaled
/// independently, since running totals dwarf per-turn values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartModel {
    pub layout: ChartLayout,
    pub plot: PlotArea,
    pub progress: ProgressAxis,
    pub token_axis: ValueAxis,
    pub cost_axis: ValueAxis,
    /// Present only when at least one sample has a cumulative cost.
    pub combined_cost_axis: Option<ValueAxis>,
    pub input_tokens: Vec<Point>,
    pub output_tokens: Vec<Point>,
    /// Turn cost scaled on `cost_axis`.
    pub turn_cost: Vec<Point>,
    /// Turn cost scaled on `combined_cost_axis` (empty without one).
    pub turn_cost_combined: Vec<Point>,
    /// Cumulative cost on `combined_cost_axis`; only samples that have one.
    pub cumulative_cost: Vec<Point>,
    pub markers: Vec<MarkerLine>,
}

impl ChartModel {
    /// Compute chart geometry. `None` for fewer than two samples or when
    /// the margins leave no plot area.
    pub fn compute(analytics: &Analytics, layout: ChartLayout) -> Option<Self> {
        let samples = &analytics.samples;
        if samples.len() < 2 {
            return None;
        }
        let plot = PlotArea {
            x: layout.margin_left,
            y: layout.margin_top,
            width: layout.width - layout.margin_left - layout.margin_right,
            height: layout.height - layout.margin_top - layout.margin_bottom,
        };
        if !(plot.width > 0.0 && plot.height > 0.0) {
            return None;
        }

        // Widen the progress domain to cover every marker so none is clipped.
        let sample_range = samples.iter().map(|s| s.progress_index);
        let marker_range = analytics.markers.iter().map(|m| m.progress_index);
        let all = sample_range.chain(marker_range);
        let (min, max) = all.fold((usize::MAX, 0), |(lo, hi), p| (lo.min(p), hi.max(p)));
        let progress = if max > min {
            ProgressAxis { min, max }
        } else {
            ProgressAxis {
                min: samples[0].progress_index,
                max: samples[samples.len() - 1].progress_index,
            }
        };

        let token_axis = ValueAxis {
            max: axis_max(samples, |s| Some(s.input_tokens.max(s.output_tokens))),
        };
        let cost_axis = ValueAxis {
            max: axis_max(samples, |s| Some(s.turn_cost_usd)),
        };
        let combined_cost_axis = analytics.has_cumulative().then(|| ValueAxis {
            max: cost_axis.max.max(axis_max(samples, |s| s.cumulative_cost_usd)),
        });

        let frame = Frame {
            plot: &plot,
            progress: &progress,
        };
        let input_tokens = frame.series(samples, &token_axis, |s| Some(s.input_tokens));
        let output_tokens = frame.series(samples, &token_axis, |s| Some(s.output_tokens));
        let turn_cost = frame.series(samples, &cost_axis, |s| Some(s.turn_cost_usd));
        let (turn_cost_combined, cumulative_cost) = match &combined_cost_axis {
            Some(axis) => (
                frame.series(samples, axis, |s| Some(s.turn_cost_usd)),
                frame.series(samples, axis, |s| s.cumulative_cost_usd),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let markers = analytics
            .markers
            .iter()
            .map(|m| MarkerLine {
                progress_index: m.progress_index,
                x: progress.project(&plot, m.progress_index),
            })
            .collect();

        Some(Self {
            layout,
            plot,
            progress,
            token_axis,
            cost_axis,
            combined_cost_axis,
            input_tokens,
            output_tokens,
            turn_cost,
            turn_cost_combined,
            cumulative_cost,
            markers,
        })
    }
}

/// Largest value across samples, floored at zero.
fn axis_max(samples: &[TokenUsageSample], value: impl Fn(&TokenUsageSample) -> Option<f64>) -> f64 {
    samples.iter().filter_map(value).fold(0.0, f64::max)
}

struct Frame<'a> {
    plot: &'a PlotArea,
    progress: &'a ProgressAxis,
}

impl Frame<'_> {
    fn series(
        &self,
        samples: &[TokenUsageSample],
        axis: &ValueAxis,
        value: impl Fn(&TokenUsageSample) -> Option<f64>,
    ) -> Vec<Point> {
        samples
            .iter()
            .filter_map(|s| {
                value(s).map(|v| Point {
                    x: self.progress.project(self.plot, s.progress_index),
                    y: axis.project(self.plot, v),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
