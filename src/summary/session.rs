use serde::Serialize;

use crate::models::MetricSample;

use super::SummaryChart;

/// The collector's copy of a finished session, rendered for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    /// As stored by the collector; empty when it was unreachable or never knew the session.
    pub samples: Vec<MetricSample>,
    pub chart: SummaryChart,
    pub chart_svg: String,
}

impl SessionSummary {
    pub fn from_samples(session_id: impl Into<String>, samples: Vec<MetricSample>) -> Self {
        let chart = SummaryChart::from_samples(&samples);
        let chart_svg = chart.render_svg();
        Self {
            session_id: session_id.into(),
            samples,
            chart,
            chart_svg,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
