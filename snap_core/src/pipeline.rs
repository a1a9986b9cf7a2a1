//! The capture-classify pipeline.
//!
//! One call captures one frame, runs the model and interprets the score
//! vector. Preconditions are checked before any frame or tensor is touched,
//! and refusals are ordinary values distinct from runtime errors so the UI
//! can render them as warnings rather than failures.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::nn::InferModel;
use crate::sensors::FrameSource;

/// A classification derived from one frame.
///
/// `decided` is false when `confidence` fell below the configured threshold;
/// the argmax class and its numeric confidence are still reported so the UI
/// can show a low-confidence guess instead of nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub decided: bool,
}

/// Why a prediction was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    CameraNotStarted,
    ModelNotLoaded,
    Busy,
}

impl Refusal {
    pub fn message(&self) -> &'static str {
        match self {
            Refusal::CameraNotStarted => "camera not started; start the camera first",
            Refusal::ModelNotLoaded => "model not loaded; check the model URL",
            Refusal::Busy => "a prediction is already in progress",
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Predicted(Prediction),
    Refused(Refusal),
}

/// Run one prediction against the current camera session and model.
///
/// Precondition order is fixed: camera first, then model. Each refusal
/// returns before a frame is captured or a tensor allocated.
pub fn predict_once(
    camera: Option<&dyn FrameSource>,
    model: Option<&dyn InferModel>,
    class_names: &[String],
    threshold: f32,
    image_size: u32,
) -> Result<Outcome> {
    let Some(camera) = camera else {
        return Ok(Outcome::Refused(Refusal::CameraNotStarted));
    };
    let Some(model) = model else {
        return Ok(Outcome::Refused(Refusal::ModelNotLoaded));
    };

    let frame = camera.grab(image_size).context("frame capture failed")?;
    let scores = model.run(&frame).context("inference failed")?;

    match interpret(&scores, class_names, threshold) {
        Some(prediction) => Ok(Outcome::Predicted(prediction)),
        None => bail!("model returned an empty score vector"),
    }
}

/// Turn a score vector into a [`Prediction`]. Returns `None` for an empty
/// vector.
pub fn interpret(scores: &[f32], class_names: &[String], threshold: f32) -> Option<Prediction> {
    let class_id = argmax(scores)?;
    let confidence = scores[class_id];
    let label = class_names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class {class_id}"));

    Some(Prediction {
        class_id,
        label,
        confidence,
        decided: confidence >= threshold,
    })
}

/// Index of the greatest score; ties break to the lowest index.
fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        match best {
            // Strict comparison keeps the first occurrence on ties and
            // never promotes NaN over a real score.
            Some((_, best_score)) if score > best_score => best = Some((index, score)),
            None => best = Some((index, score)),
            _ => {}
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::RgbImage;

    use super::*;
    use crate::sensors::CameraError;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    struct CountingFrames(AtomicUsize);

    impl FrameSource for CountingFrames {
        fn grab(&self, image_size: u32) -> Result<RgbImage, CameraError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RgbImage::new(image_size, image_size))
        }
    }

    struct FixedScores {
        scores: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedScores {
        fn new(scores: &[f32]) -> Self {
            Self {
                scores: scores.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl InferModel for FixedScores {
        fn run(&self, _frame: &RgbImage) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    #[test]
    fn argmax_picks_greatest_score() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.9]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn argmax_ties_break_to_lowest_index() {
        assert_eq!(argmax(&[0.3, 0.3]), Some(0));
        assert_eq!(argmax(&[0.1, 0.5, 0.5, 0.2]), Some(1));
    }

    #[test]
    fn confident_result_is_decided() {
        // Worked example: ["阿部輝", "お茶"], threshold 0.5, scores [0.9, 0.1].
        let prediction = interpret(&[0.9, 0.1], &names(&["阿部輝", "お茶"]), 0.5).unwrap();
        assert_eq!(
            prediction,
            Prediction {
                class_id: 0,
                label: "阿部輝".to_owned(),
                confidence: 0.9,
                decided: true,
            }
        );
    }

    #[test]
    fn low_confidence_still_reports_class_and_score() {
        let prediction = interpret(&[0.3, 0.3], &names(&["阿部輝", "お茶"]), 0.5).unwrap();
        assert_eq!(prediction.class_id, 0);
        assert_eq!(prediction.label, "阿部輝");
        assert_eq!(prediction.confidence, 0.3);
        assert!(!prediction.decided);
    }

    #[test]
    fn threshold_is_inclusive() {
        let prediction = interpret(&[0.5, 0.1], &names(&["a", "b"]), 0.5).unwrap();
        assert!(prediction.decided);
    }

    #[test]
    fn out_of_range_class_gets_synthesized_label() {
        let prediction = interpret(&[0.1, 0.1, 0.1, 0.8], &names(&["a", "b", "c"]), 0.5).unwrap();
        assert_eq!(prediction.class_id, 3);
        assert_eq!(prediction.label, "class 3");
        assert!(prediction.decided);
    }

    #[test]
    fn refuses_without_camera_before_touching_the_model() {
        let model = FixedScores::new(&[0.9, 0.1]);
        let outcome = predict_once(None, Some(&model), &names(&["a", "b"]), 0.5, 224).unwrap();

        assert!(matches!(
            outcome,
            Outcome::Refused(Refusal::CameraNotStarted)
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn refuses_without_model_before_capturing() {
        let camera = CountingFrames(AtomicUsize::new(0));
        let outcome = predict_once(Some(&camera), None, &names(&["a", "b"]), 0.5, 224).unwrap();

        assert!(matches!(outcome, Outcome::Refused(Refusal::ModelNotLoaded)));
        assert_eq!(camera.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn camera_refusal_takes_precedence_over_model_refusal() {
        let outcome = predict_once(None, None, &names(&["a"]), 0.5, 224).unwrap();
        assert!(matches!(
            outcome,
            Outcome::Refused(Refusal::CameraNotStarted)
        ));
    }

    #[test]
    fn successful_prediction_runs_exactly_one_capture_and_inference() {
        let camera = CountingFrames(AtomicUsize::new(0));
        let model = FixedScores::new(&[0.2, 0.7]);
        let outcome =
            predict_once(Some(&camera), Some(&model), &names(&["a", "b"]), 0.5, 224).unwrap();

        match outcome {
            Outcome::Predicted(prediction) => {
                assert_eq!(prediction.class_id, 1);
                assert_eq!(prediction.label, "b");
                assert!(prediction.decided);
            }
            other => panic!("expected prediction, got {other:?}"),
        }
        assert_eq!(camera.0.load(Ordering::SeqCst), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_score_vector_is_an_error() {
        let camera = CountingFrames(AtomicUsize::new(0));
        let model = FixedScores::new(&[]);
        let result = predict_once(Some(&camera), Some(&model), &names(&["a"]), 0.5, 224);
        assert!(result.is_err());
    }
}
