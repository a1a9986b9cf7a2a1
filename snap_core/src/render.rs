//! Presentation helpers: pure functions from a prediction to the text and
//! styling the UI adapter renders with.

use crate::pipeline::Prediction;

/// Visual confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    /// Low below 0.6, medium in [0.6, 0.8), high from 0.8 up.
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            ConfidenceBand::High
        } else if confidence >= 0.6 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            ConfidenceBand::Low => "#dc3545",
            ConfidenceBand::Medium => "#ffc107",
            ConfidenceBand::High => "#28a745",
        }
    }
}

/// Confidence bar width in percent, linear in the confidence.
pub fn bar_width_percent(confidence: f32) -> f32 {
    (confidence * 100.0).clamp(0.0, 100.0)
}

/// Percentage text shown next to the bar.
pub fn confidence_percent(confidence: f32) -> String {
    format!("{:.1}%", confidence * 100.0)
}

/// One human-readable log line per prediction. Undecided results keep the
/// argmax class visible as a low-confidence guess.
pub fn result_log_line(prediction: &Prediction) -> String {
    let percent = confidence_percent(prediction.confidence);
    if prediction.decided {
        format!("result: {} ({percent})", prediction.label)
    } else {
        format!(
            "confidence too low to decide; best guess {} ({percent})",
            prediction.label
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn prediction(confidence: f32, decided: bool) -> Prediction {
        Prediction {
            class_id: 0,
            label: "阿部輝".to_owned(),
            confidence,
            decided,
        }
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(ConfidenceBand::from_confidence(0.0), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_confidence(0.59), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_confidence(0.6), ConfidenceBand::Medium);
        assert_eq!(
            ConfidenceBand::from_confidence(0.79),
            ConfidenceBand::Medium
        );
        assert_eq!(ConfidenceBand::from_confidence(0.8), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_confidence(1.0), ConfidenceBand::High);
    }

    #[test]
    fn bands_have_distinct_colors() {
        assert_eq!(ConfidenceBand::Low.color(), "#dc3545");
        assert_eq!(ConfidenceBand::Medium.color(), "#ffc107");
        assert_eq!(ConfidenceBand::High.color(), "#28a745");
    }

    #[test]
    fn bar_width_is_linear_and_clamped() {
        assert_eq!(bar_width_percent(0.25), 25.0);
        assert_eq!(bar_width_percent(0.0), 0.0);
        assert_eq!(bar_width_percent(1.2), 100.0);
        assert_eq!(bar_width_percent(-0.1), 0.0);
    }

    #[test]
    fn decided_and_undecided_lines_both_carry_the_score() {
        let line = result_log_line(&prediction(0.9, true));
        assert_eq!(line, "result: 阿部輝 (90.0%)");

        let line = result_log_line(&prediction(0.3, false));
        assert!(line.contains("阿部輝"));
        assert!(line.contains("30.0%"));
    }
}
