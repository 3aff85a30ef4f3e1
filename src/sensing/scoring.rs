use rand::Rng;
use serde::{Deserialize, Serialize};

const BASE_SCORE: f64 = 100.0;
const OFF_CENTER_PENALTY: f64 = 30.0;
const BLINK_PENALTY_PER_UNIT: f64 = 5.0;
const MAX_BLINK_PENALTY: f64 = 30.0;
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Metrics reported by the frame scorer for one image.
///
/// Every field is optional; unknown fields are carried through in `extra` so the
/// sample pushed to the collector keeps the scorer's full payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaze_direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blink_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawMetrics {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Derives the 0–100 focus score from scorer metrics.
///
/// Starts at 100, loses 30 when the gaze is reported anywhere but "center", loses
/// up to 30 more for blinking (5 per unit of blink rate), then scales by the
/// scorer's confidence (0.5 when missing).
pub fn compute_focus_score(metrics: &RawMetrics) -> u8 {
    let mut score = BASE_SCORE;

    if let Some(gaze) = metrics.gaze_direction.as_deref() {
        if gaze != "center" {
            score -= OFF_CENTER_PENALTY;
        }
    }

    if let Some(blink_rate) = metrics.blink_rate.filter(|rate| rate.is_finite()) {
        score -= (blink_rate.max(0.0) * BLINK_PENALTY_PER_UNIT).min(MAX_BLINK_PENALTY);
    }

    let confidence = metrics
        .confidence
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    (score * confidence).clamp(0.0, 100.0).round() as u8
}

/// Placeholder jitter in 80..=99, used only when the sampler runs in
/// [`ScoringMode::Placeholder`]. Not a measurement of anything.
pub fn placeholder_score<R: Rng>(rng: &mut R) -> u8 {
    rng.gen_range(80..100)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScoringMode {
    /// Frames are encoded and sent to the remote scorer.
    #[default]
    Remote,
    /// No scorer round-trip; each ready frame gets a [`placeholder_score`].
    Placeholder,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn metrics(gaze: Option<&str>, blink: Option<f64>, confidence: Option<f64>) -> RawMetrics {
        RawMetrics {
            gaze_direction: gaze.map(String::from),
            blink_rate: blink,
            confidence,
            ..RawMetrics::default()
        }
    }

    #[test]
    fn off_center_gaze_and_blinks_are_penalized() {
        let score = compute_focus_score(&metrics(Some("left"), Some(4.0), Some(1.0)));
        assert_eq!(score, 50);
    }

    #[test]
    fn missing_fields_use_default_confidence_only() {
        assert_eq!(compute_focus_score(&metrics(None, None, Some(0.5))), 50);
        assert_eq!(compute_focus_score(&RawMetrics::default()), 50);
    }

    #[test]
    fn centered_gaze_with_full_confidence_is_perfect() {
        let score = compute_focus_score(&metrics(Some("center"), Some(0.0), Some(1.0)));
        assert_eq!(score, 100);
    }

    #[test]
    fn blink_penalty_is_capped() {
        let score = compute_focus_score(&metrics(Some("center"), Some(1000.0), Some(1.0)));
        assert_eq!(score, 70);
        let score = compute_focus_score(&metrics(Some("down"), Some(1000.0), Some(1.0)));
        assert_eq!(score, 40);
    }

    #[test]
    fn adversarial_inputs_stay_in_range() {
        let cases = [
            metrics(Some("up"), Some(-50.0), Some(7.0)),
            metrics(None, Some(f64::NAN), Some(f64::INFINITY)),
            metrics(Some(""), Some(f64::INFINITY), Some(-3.0)),
            metrics(Some("center"), Some(2.5), Some(0.33)),
        ];
        for case in &cases {
            let score = compute_focus_score(case);
            assert!(score <= 100, "score {score} out of range for {case:?}");
        }
        assert_eq!(compute_focus_score(&cases[0]), 70);
        assert_eq!(compute_focus_score(&cases[2]), 0);
    }

    #[test]
    fn rounding_goes_to_nearest() {
        // (100 - 12.5) * 0.33 = 28.875
        assert_eq!(compute_focus_score(&metrics(Some("center"), Some(2.5), Some(0.33))), 29);
    }

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let raw: RawMetrics = serde_json::from_value(serde_json::json!({
            "gaze_direction": "center",
            "blink_rate": 1,
            "confidence": 0.9,
            "head_pose": [0, 1, 2],
        }))
        .unwrap();
        assert_eq!(raw.blink_rate, Some(1.0));
        assert!(raw.extra.contains_key("head_pose"));
        assert_eq!(raw.to_json()["head_pose"], serde_json::json!([0, 1, 2]));
    }

    #[test]
    fn placeholder_jitter_stays_in_band() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let score = placeholder_score(&mut rng);
            assert!((80..100).contains(&score));
        }
    }
}
