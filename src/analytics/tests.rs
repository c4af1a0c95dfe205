use super::*;
use crate::record::Transcript;
use serde_json::json;

fn analytics_of(lines: &[Value]) -> Analytics {
    let contents = lines
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let (transcript, _) = Transcript::parse(&contents);
    Analytics::collect(transcript.events(), &Rates::default())
}

fn token_count(last: Value, total: Value) -> Value {
    json!({
        "timestamp": "2025-10-01T10:00:00Z",
        "type": "event_msg",
        "payload": {
            "type": "token_count",
            "info": { "last_token_usage": last, "total_token_usage": total }
        }
    })
}

fn user(text: &str) -> Value {
    json!({
        "timestamp": "2025-10-01T10:00:00Z",
        "type": "response_item",
        "payload": { "type": "message", "role": "user", "content": [{ "type": "input_text", "text": text }] }
    })
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{a} != {b}");
}

// ===================================================================
// Pricing
// ===================================================================

#[test]
fn turn_cost_uses_per_million_rates() {
    let rates = Rates::default();
    assert_close(rates.cost(1_000_000.0, 0.0), 1.75);
    assert_close(rates.cost(0.0, 1_000_000.0), 14.00);
    assert_close(rates.cost(500_000.0, 100_000.0), 0.875 + 1.4);
}

#[test]
fn finite_number_accepts_numbers_and_numeric_strings() {
    assert_eq!(finite_number(&json!(12)), Some(12.0));
    assert_eq!(finite_number(&json!(" 7.5 ")), Some(7.5));
    assert_eq!(finite_number(&json!("NaN")), None);
    assert_eq!(finite_number(&json!("inf")), None);
    assert_eq!(finite_number(&json!("abc")), None);
    assert_eq!(finite_number(&json!(null)), None);
    assert_eq!(finite_number(&json!(true)), None);
}

// ===================================================================
// Samples
// ===================================================================

#[test]
fn sample_per_numeric_token_count() {
    let analytics = analytics_of(&[
        user("hello"),
        token_count(
            json!({ "input_tokens": 1_000_000, "output_tokens": 0 }),
            json!({ "input_tokens": 2_000_000, "output_tokens": 1_000_000 }),
        ),
    ]);
    assert_eq!(analytics.samples.len(), 1);
    let sample = &analytics.samples[0];
    assert_eq!(sample.progress_index, 1);
    assert_eq!(sample.timestamp.as_deref(), Some("2025-10-01T10:00:00Z"));
    assert_close(sample.turn_cost_usd, 1.75);
    assert_close(sample.cumulative_cost_usd.unwrap(), 3.5 + 14.0);
}

#[test]
fn non_numeric_last_usage_contributes_no_sample() {
    let analytics = analytics_of(&[
        token_count(json!({ "input_tokens": "lots", "output_tokens": 5 }), json!(null)),
        token_count(json!({ "output_tokens": 5 }), json!(null)),
        json!({ "timestamp": "t", "type": "event_msg", "payload": { "type": "token_count", "info": null } }),
    ]);
    assert!(analytics.samples.is_empty());
}

#[test]
fn progress_index_is_record_ordinal_not_sample_ordinal() {
    let usage = || token_count(json!({ "input_tokens": 10, "output_tokens": 1 }), json!(null));
    let analytics = analytics_of(&[
        usage(),
        token_count(json!({ "input_tokens": "x", "output_tokens": 1 }), json!(null)),
        user("hi"),
        usage(),
    ]);
    let indices: Vec<usize> = analytics.samples.iter().map(|s| s.progress_index).collect();
    assert_eq!(indices, vec![0, 3]);
    assert!(!analytics.has_cumulative());
}

#[test]
fn cumulative_is_optional_per_sample() {
    let analytics = analytics_of(&[
        token_count(json!({ "input_tokens": 10, "output_tokens": 1 }), json!(null)),
        token_count(
            json!({ "input_tokens": 10, "output_tokens": 1 }),
            json!({ "input_tokens": 20, "output_tokens": "?" }),
        ),
        token_count(
            json!({ "input_tokens": 10, "output_tokens": 1 }),
            json!({ "input_tokens": 30, "output_tokens": 3 }),
        ),
    ]);
    let cumulative: Vec<bool> = analytics
        .samples
        .iter()
        .map(|s| s.cumulative_cost_usd.is_some())
        .collect();
    assert_eq!(cumulative, vec![false, false, true]);
    assert!(analytics.has_cumulative());
    assert!(analytics.final_cumulative_cost().is_some());
}

#[test]
fn user_messages_record_markers() {
    let analytics = analytics_of(&[
        user("a"),
        json!({ "timestamp": "t", "type": "event_msg", "payload": { "type": "user_message", "message": "a" } }),
        json!({ "timestamp": "t", "type": "response_item", "payload": { "type": "message", "role": "assistant", "content": [] } }),
        json!({ "timestamp": "t", "type": "response_item", "payload": { "type": "message", "role": "developer", "content": [] } }),
    ]);
    let markers: Vec<usize> = analytics.markers.iter().map(|m| m.progress_index).collect();
    assert_eq!(markers, vec![0, 1]);
    assert!(analytics.samples.is_empty());
}

// ===================================================================
// Chart geometry
// ===================================================================

fn sample(progress_index: usize, input: f64, output: f64, cumulative: Option<f64>) -> TokenUsageSample {
    let rates = Rates::default();
    TokenUsageSample {
        progress_index,
        timestamp: None,
        input_tokens: input,
        output_tokens: output,
        turn_cost_usd: rates.cost(input, output),
        cumulative_cost_usd: cumulative,
    }
}

fn layout() -> ChartLayout {
    ChartLayout {
        width: 120.0,
        height: 70.0,
        margin_top: 10.0,
        margin_right: 10.0,
        margin_bottom: 10.0,
        margin_left: 10.0,
    }
}

#[test]
fn fewer_than_two_samples_yield_no_chart() {
    let analytics = Analytics {
        samples: vec![sample(0, 10.0, 1.0, None)],
        markers: vec![],
    };
    assert!(ChartModel::compute(&analytics, layout()).is_none());
    assert!(ChartModel::compute(&Analytics::default(), layout()).is_none());
}

#[test]
fn zero_plot_area_yields_no_chart() {
    let analytics = Analytics {
        samples: vec![sample(0, 10.0, 1.0, None), sample(1, 20.0, 2.0, None)],
        markers: vec![],
    };
    let cramped = ChartLayout {
        width: 20.0,
        ..layout()
    };
    assert!(ChartModel::compute(&analytics, cramped).is_none());
}

#[test]
fn geometry_maps_domains_linearly() {
    let analytics = Analytics {
        samples: vec![
            sample(2, 100.0, 10.0, None),
            sample(4, 50.0, 20.0, None),
            sample(6, 200.0, 0.0, None),
        ],
        markers: vec![],
    };
    let chart = ChartModel::compute(&analytics, layout()).unwrap();
    // plot is 100 x 50 at (10, 10)
    assert_eq!(chart.plot, PlotArea { x: 10.0, y: 10.0, width: 100.0, height: 50.0 });
    assert_eq!(chart.progress, ProgressAxis { min: 2, max: 6 });
    assert_eq!(chart.token_axis.max, 200.0);

    let xs: Vec<f64> = chart.input_tokens.iter().map(|p| p.x).collect();
    assert_eq!(xs, vec![10.0, 60.0, 110.0]);
    let ys: Vec<f64> = chart.input_tokens.iter().map(|p| p.y).collect();
    assert_eq!(ys, vec![35.0, 47.5, 10.0]);
    // zero is the floor of every value axis
    assert_eq!(chart.output_tokens[2].y, 60.0);
    assert!(chart.combined_cost_axis.is_none());
    assert!(chart.cumulative_cost.is_empty());
    assert!(chart.turn_cost_combined.is_empty());
}

#[test]
fn cumulative_overlay_has_independent_scale() {
    let analytics = Analytics {
        samples: vec![
            sample(0, 1_000_000.0, 0.0, Some(10.0)),
            sample(1, 2_000_000.0, 0.0, None),
            sample(2, 1_000_000.0, 0.0, Some(20.0)),
        ],
        markers: vec![],
    };
    let chart = ChartModel::compute(&analytics, layout()).unwrap();
    assert_close(chart.cost_axis.max, 3.5);
    assert_close(chart.combined_cost_axis.unwrap().max, 20.0);
    // turn cost peaks at the top of its own axis
    assert_close(chart.turn_cost[1].y, 10.0);
    // only samples with a cumulative value are plotted
    assert_eq!(chart.cumulative_cost.len(), 2);
    assert_close(chart.cumulative_cost[1].y, 10.0);
    assert_eq!(chart.turn_cost_combined.len(), 3);
}

#[test]
fn markers_widen_progress_domain() {
    let analytics = Analytics {
        samples: vec![sample(3, 10.0, 1.0, None), sample(5, 10.0, 1.0, None)],
        markers: vec![InterventionMarker { progress_index: 1 }, InterventionMarker { progress_index: 9 }],
    };
    let chart = ChartModel::compute(&analytics, layout()).unwrap();
    assert_eq!(chart.progress, ProgressAxis { min: 1, max: 9 });
    let xs: Vec<f64> = chart.markers.iter().map(|m| m.x).collect();
    assert_eq!(xs, vec![10.0, 110.0]);
    assert!(chart.markers.iter().all(|m| m.x >= chart.plot.x && m.x <= chart.plot.x + chart.plot.width));
}

#[test]
fn all_zero_values_sit_on_the_baseline() {
    let analytics = Analytics {
        samples: vec![sample(0, 0.0, 0.0, None), sample(1, 0.0, 0.0, None)],
        markers: vec![],
    };
    let chart = ChartModel::compute(&analytics, layout()).unwrap();
    assert!(chart.input_tokens.iter().all(|p| p.y == 60.0));
    assert!(chart.turn_cost.iter().all(|p| p.y == 60.0));
}
