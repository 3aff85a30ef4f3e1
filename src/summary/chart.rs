use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::MetricSample;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 240.0;
const MARGIN_LEFT: f64 = 40.0;
const MARGIN_RIGHT: f64 = 16.0;
const MARGIN_TOP: f64 = 16.0;
const MARGIN_BOTTOM: f64 = 32.0;
const GRID_STEPS: [u8; 5] = [0, 25, 50, 75, 100];

const LINE_COLOR: &str = "#a78bfa";
const GRID_COLOR: &str = "#334155";
const LABEL_COLOR: &str = "#94a3b8";
const BACKGROUND: &str = "#0f172a";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub score: u8,
}

/// Score trace of a finished session, x = wall-clock time, y = score on a fixed 0–100 axis.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryChart {
    points: Vec<ChartPoint>,
}

impl SummaryChart {
    /// Builds the chart from samples in any order; points are sorted by timestamp
    /// because the collector may have stored concurrent submissions out of order.
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        let mut points: Vec<ChartPoint> = samples
            .iter()
            .map(|sample| ChartPoint {
                timestamp: sample.timestamp,
                score: sample.score.min(100),
            })
            .collect();
        points.sort_by_key(|point| point.timestamp);
        Self { points }
    }

    pub fn points(&self) -> &[ChartPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn average_score(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let total: u64 = self.points.iter().map(|point| u64::from(point.score)).sum();
        Some(total as f64 / self.points.len() as f64)
    }

    pub fn min_score(&self) -> Option<u8> {
        self.points.iter().map(|point| point.score).min()
    }

    pub fn max_score(&self) -> Option<u8> {
        self.points.iter().map(|point| point.score).max()
    }

    /// Plot coordinates for each point inside the SVG viewport.
    pub fn plot_coordinates(&self) -> Vec<(f64, f64)> {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return Vec::new();
        };

        let span_ms = (last.timestamp - first.timestamp).num_milliseconds();
        self.points
            .iter()
            .map(|point| {
                let x = if span_ms <= 0 {
                    MARGIN_LEFT + plot_width() / 2.0
                } else {
                    let offset = (point.timestamp - first.timestamp).num_milliseconds();
                    MARGIN_LEFT + plot_width() * offset as f64 / span_ms as f64
                };
                (x, y_for(point.score))
            })
            .collect()
    }

    /// Renders a standalone SVG document. An empty chart draws a flat line at zero
    /// and a "no data" caption.
    pub fn render_svg(&self) -> String {
        let mut svg = String::with_capacity(2048);
        svg.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n"
        ));
        svg.push_str(&format!(
            "<rect width=\"{WIDTH}\" height=\"{HEIGHT}\" fill=\"{BACKGROUND}\"/>\n"
        ));

        for step in GRID_STEPS {
            let y = y_for(step);
            svg.push_str(&format!(
                "<line x1=\"{MARGIN_LEFT}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"{GRID_COLOR}\" stroke-width=\"1\"/>\n",
                WIDTH - MARGIN_RIGHT
            ));
            svg.push_str(&format!(
                "<text x=\"{:.1}\" y=\"{:.1}\" fill=\"{LABEL_COLOR}\" font-size=\"10\" text-anchor=\"end\">{step}</text>\n",
                MARGIN_LEFT - 6.0,
                y + 3.0
            ));
        }

        let coordinates = self.plot_coordinates();
        match coordinates.as_slice() {
            [] => {
                let y = y_for(0);
                svg.push_str(&format!(
                    "<polyline class=\"trace empty\" fill=\"none\" stroke=\"{LINE_COLOR}\" stroke-width=\"2\" points=\"{MARGIN_LEFT:.1},{y:.1} {:.1},{y:.1}\"/>\n",
                    WIDTH - MARGIN_RIGHT
                ));
                svg.push_str(&format!(
                    "<text x=\"{:.1}\" y=\"{:.1}\" fill=\"{LABEL_COLOR}\" font-size=\"12\" text-anchor=\"middle\">No focus data recorded</text>\n",
                    MARGIN_LEFT + plot_width() / 2.0,
                    MARGIN_TOP + plot_height() / 2.0
                ));
            }
            [(x, y)] => {
                svg.push_str(&format!(
                    "<circle class=\"trace\" cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"3\" fill=\"{LINE_COLOR}\"/>\n"
                ));
            }
            many => {
                let points: Vec<String> = many
                    .iter()
                    .map(|(x, y)| format!("{x:.1},{y:.1}"))
                    .collect();
                svg.push_str(&format!(
                    "<polyline class=\"trace\" fill=\"none\" stroke=\"{LINE_COLOR}\" stroke-width=\"2\" points=\"{}\"/>\n",
                    points.join(" ")
                ));
            }
        }

        if let (Some(first), Some(last)) = (self.points.first(), self.points.last()) {
            let label_y = HEIGHT - MARGIN_BOTTOM / 2.0 + 4.0;
            svg.push_str(&format!(
                "<text x=\"{MARGIN_LEFT:.1}\" y=\"{label_y:.1}\" fill=\"{LABEL_COLOR}\" font-size=\"10\">{}</text>\n",
                first.timestamp.format("%H:%M:%S")
            ));
            svg.push_str(&format!(
                "<text x=\"{:.1}\" y=\"{label_y:.1}\" fill=\"{LABEL_COLOR}\" font-size=\"10\" text-anchor=\"end\">{}</text>\n",
                WIDTH - MARGIN_RIGHT,
                last.timestamp.format("%H:%M:%S")
            ));
        }

        svg.push_str("</svg>\n");
        svg
    }
}

fn plot_width() -> f64 {
    WIDTH - MARGIN_LEFT - MARGIN_RIGHT
}

fn plot_height() -> f64 {
    HEIGHT - MARGIN_TOP - MARGIN_BOTTOM
}

fn y_for(score: u8) -> f64 {
    MARGIN_TOP + plot_height() * (1.0 - f64::from(score.min(100)) / 100.0)
}
