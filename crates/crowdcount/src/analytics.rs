//! Ratio chart and scalar metrics for one session record.

use crate::error::CrowdError;
use crate::snapshot::SessionRecord;
use diagnostics::*;
use serde_json::{Value, json};
use std::fmt;

pub const ATTENDEES_LABEL: &str = "Total Attendees";
pub const RAISED_HANDS_LABEL: &str = "Raised Hands";
pub const ATTENDEES_COLOR: &str = "#2ca02c";
pub const RAISED_HANDS_COLOR: &str = "#ff7f0e";

/// Shown in place of a missing conversion percentage
pub const NOT_AVAILABLE: &str = "N/A";

const CHART_SIZE: u32 = 300;
const INNER_RADIUS: u32 = 50;
const SLICE_CHARS: [char; 2] = ['█', '▒'];

#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub category: &'static str,
    pub count: u64,
    pub color: &'static str,
}

/// Two-slice proportion chart: attendees against raised hands
#[derive(Debug, Clone, PartialEq)]
pub struct RatioChart {
    pub slices: [Slice; 2],
}

impl RatioChart {
    pub fn new(total_attendees: u64, raised_hands: u64) -> Self {
        Self {
            slices: [
                Slice {
                    category: ATTENDEES_LABEL,
                    count: total_attendees,
                    color: ATTENDEES_COLOR,
                },
                Slice {
                    category: RAISED_HANDS_LABEL,
                    count: raised_hands,
                    color: RAISED_HANDS_COLOR,
                },
            ],
        }
    }

    pub fn values(&self) -> [u64; 2] {
        [self.slices[0].count, self.slices[1].count]
    }

    /// Proportional bars, one line per slice
    pub fn to_text(&self, width: usize) -> String {
        let total: u64 = self.slices.iter().map(|s| s.count).sum();
        let label_width = self
            .slices
            .iter()
            .map(|s| s.category.len())
            .max()
            .unwrap_or(0);
        let bar_width = width.saturating_sub(label_width + 20).max(10);

        let mut out = String::new();
        for (i, slice) in self.slices.iter().enumerate() {
            let share = if total > 0 {
                slice.count as f64 / total as f64
            } else {
                0.0
            };
            let fill = (share * bar_width as f64).round() as usize;
            let bar: String = std::iter::repeat_n(SLICE_CHARS[i % SLICE_CHARS.len()], fill).collect();
            out.push_str(&format!(
                "{:<lw$}  {:<bw$} {:>6} ({:>5.1}%)\n",
                slice.category,
                bar,
                slice.count,
                share * 100.0,
                lw = label_width,
                bw = bar_width
            ));
        }
        out
    }

    /// Vega-Lite spec of the donut chart
    pub fn to_vega_lite(&self) -> Value {
        let values: Vec<Value> = self
            .slices
            .iter()
            .map(|s| json!({ "Category": s.category, "Count": s.count }))
            .collect();
        json!({
            "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
            "width": CHART_SIZE,
            "height": CHART_SIZE,
            "data": { "values": values },
            "mark": { "type": "arc", "innerRadius": INNER_RADIUS },
            "encoding": {
                "theta": { "field": "Count", "type": "quantitative" },
                "color": {
                    "field": "Category",
                    "type": "nominal",
                    "scale": { "range": [ATTENDEES_COLOR, RAISED_HANDS_COLOR] }
                },
                "tooltip": [
                    { "field": "Category", "type": "nominal" },
                    { "field": "Count", "type": "quantitative" }
                ]
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub label: &'static str,
    pub value: String,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analytics {
    pub chart: RatioChart,
    pub hands_per_attendee: f64,
    pub conversion: Metric,
    pub attendees: Metric,
    pub raised_hands: Metric,
}

impl Analytics {
    pub fn metrics(&self) -> [&Metric; 3] {
        [&self.conversion, &self.attendees, &self.raised_hands]
    }
}

/// "24.0%" or "N/A"
pub fn format_conversion(percentage: Option<f64>) -> String {
    match percentage {
        Some(p) if p.is_finite() => format!("{p:.1}%"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Chart and metrics for a record with at least one attendee
pub fn render(record: &SessionRecord) -> Result<Analytics, CrowdError> {
    let index = record.index;
    if record.total_attendees == 0 {
        return Err(CrowdError::invalid_row(
            index,
            "no attendees counted, conversion is undefined",
        ));
    }

    let hands_per_attendee = record.raised_hands as f64 / record.total_attendees as f64;

    if record.raised_hands > record.total_attendees {
        warn!("Row {index} has more raised hands than attendees", index: index);
    }
    if let Some(stored) = record.percentage_with_hands_up {
        let computed = hands_per_attendee * 100.0;
        if (stored - computed).abs() > 0.5 {
            warn!("Row {index} stores {stored}% but counts give {computed}%",
                index: index, stored: stored, computed: computed);
        }
    }

    Ok(Analytics {
        chart: RatioChart::new(record.total_attendees, record.raised_hands),
        hands_per_attendee,
        conversion: Metric {
            label: "Conversion Rate",
            value: format_conversion(record.percentage_with_hands_up),
        },
        attendees: Metric {
            label: "Total Attendees",
            value: record.total_attendees.to_string(),
        },
        raised_hands: Metric {
            label: "Raised Hands",
            value: record.raised_hands.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: u64, hands: u64, pct: Option<f64>) -> SessionRecord {
        SessionRecord {
            index: 0,
            total_attendees: total,
            raised_hands: hands,
            percentage_with_hands_up: pct,
            caption: None,
            file_name: None,
            raw: None,
        }
    }

    #[test]
    fn test_render_scenario() {
        let analytics = render(&record(50, 12, Some(24.0))).expect("renders");
        assert_eq!(analytics.conversion.value, "24.0%");
        assert_eq!(analytics.attendees.value, "50");
        assert_eq!(analytics.raised_hands.value, "12");
        assert_eq!(analytics.chart.values(), [50, 12]);
        assert!((analytics.hands_per_attendee - 0.24).abs() < 1e-9);
    }

    #[test]
    fn test_null_percentage_shows_sentinel() {
        let analytics = render(&record(10, 3, None)).expect("renders");
        assert_eq!(analytics.conversion.value, NOT_AVAILABLE);
        assert_eq!(analytics.conversion.to_string(), "Conversion Rate: N/A");
    }

    #[test]
    fn test_zero_attendees_is_invalid() {
        match render(&record(0, 0, None)) {
            Err(CrowdError::InvalidRow { index: 0, reason }) => {
                assert!(reason.contains("no attendees"));
            }
            other => panic!("expected invalid row, got {other:?}"),
        }
    }

    #[test]
    fn test_text_chart() {
        let text = RatioChart::new(50, 12).to_text(80);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(text.ends_with('\n'));
        assert!(lines[0].starts_with(ATTENDEES_LABEL));
        assert!(lines[0].contains("80.6%"));
        assert!(lines[1].starts_with(RAISED_HANDS_LABEL));
        assert!(lines[1].contains("19.4%"));
        assert!(lines[0].matches('█').count() > lines[1].matches('▒').count());
    }

    #[test]
    fn test_vega_lite_spec() {
        let spec = RatioChart::new(50, 12).to_vega_lite();
        assert_eq!(spec["mark"]["type"], "arc");
        assert_eq!(spec["mark"]["innerRadius"], 50);
        assert_eq!(spec["width"], 300);
        assert_eq!(spec["data"]["values"][0]["Count"], 50);
        assert_eq!(spec["data"]["values"][1]["Category"], "Raised Hands");
        assert_eq!(spec["encoding"]["color"]["scale"]["range"][1], "#ff7f0e");
    }
}
