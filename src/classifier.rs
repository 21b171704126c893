use std::sync::Mutex;
use std::time::Instant;

use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::registry::{InferenceEngine, InferenceError, Prediction};
use crate::tensor::InputTensor;

/// Upper bound on a model's spatial input size, validated at load time.
const MAX_INPUT_DIMENSION: i64 = 4096;

/// Minimum class count for a model to make sense as a classifier.
const MIN_CLASSES: usize = 2;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("inference engine error")]
    Engine(String), // Sanitized - no raw ORT errors

    #[error("model configuration mismatch: {0}")]
    ModelMismatch(String),
}

// Manual From impls to sanitize ORT errors
impl From<ort::Error> for ClassifierError {
    fn from(e: ort::Error) -> Self {
        // Log full error internally, return sanitized version externally
        tracing::error!(error = %e, "ORT session error");
        ClassifierError::Engine("internal inference error".into())
    }
}

impl From<ort::Error> for InferenceError {
    fn from(e: ort::Error) -> Self {
        tracing::error!(error = %e, "ORT inference error");
        InferenceError::Engine("internal inference error".into())
    }
}

// ============================================================================
// Model configuration (extracted at load time)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TensorLayout {
    /// `[batch, channels, height, width]`
    Nchw,
    /// `[batch, height, width, channels]`
    Nhwc,
}

#[derive(Debug, Clone)]
struct ClassifierConfig {
    input_height: u32,
    input_width: u32,
    layout: TensorLayout,
    num_classes: usize,
    output_name: String,
}

// ============================================================================
// OnnxClassifier
// ============================================================================

/// Image classifier over an ONNX session.
///
/// The model's input geometry (layout and fixed spatial size) and class
/// count are extracted and validated once, when the artifact is loaded.
/// Inference is serialized through a mutex; multiple classify calls may
/// arrive concurrently from overlapping pipeline runs.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    config: ClassifierConfig,
    labels: Vec<String>,
}

impl OnnxClassifier {
    /// Creates a classifier from ONNX model bytes.
    ///
    /// `labels` are class names in model output order; when empty, positional
    /// names are used. A non-empty list whose length disagrees with the
    /// model's class count is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or has an unexpected
    /// structure.
    #[instrument(skip(model_bytes, labels), fields(model_size = model_bytes.len()))]
    pub fn new(model_bytes: &[u8], labels: Vec<String>) -> Result<Self, ClassifierError> {
        let session = Session::builder()?.commit_from_memory(model_bytes)?;

        let config = Self::extract_config(&session)?;

        if !labels.is_empty() && labels.len() != config.num_classes {
            return Err(ClassifierError::ModelMismatch(format!(
                "{} labels configured but model has {} classes",
                labels.len(),
                config.num_classes
            )));
        }

        debug!(
            input_size = %format!("{}x{}", config.input_width, config.input_height),
            layout = ?config.layout,
            num_classes = config.num_classes,
            "classifier loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
            labels,
        })
    }

    /// Extracts input/output geometry from model metadata and validates it.
    fn extract_config(session: &Session) -> Result<ClassifierConfig, ClassifierError> {
        let input = session
            .inputs
            .first()
            .ok_or_else(|| ClassifierError::ModelMismatch("model has no inputs".into()))?;

        let input_dims: Vec<i64> = input
            .input_type
            .tensor_dimensions()
            .ok_or_else(|| ClassifierError::ModelMismatch("input is not a tensor".into()))?
            .collect();

        if input_dims.len() != 4 {
            return Err(ClassifierError::ModelMismatch(format!(
                "expected 4D input, got {}D",
                input_dims.len()
            )));
        }

        // [1, 3, H, W] or [1, H, W, 3]; anything else is not an RGB classifier.
        let (layout, height, width) = if input_dims[1] == 3 {
            (TensorLayout::Nchw, input_dims[2], input_dims[3])
        } else if input_dims[3] == 3 {
            (TensorLayout::Nhwc, input_dims[1], input_dims[2])
        } else {
            return Err(ClassifierError::ModelMismatch(format!(
                "no 3-channel axis in input shape {input_dims:?}"
            )));
        };

        if height <= 0 || width <= 0 || height > MAX_INPUT_DIMENSION || width > MAX_INPUT_DIMENSION
        {
            return Err(ClassifierError::ModelMismatch(format!(
                "invalid or dynamic input dimensions: {width}x{height}"
            )));
        }

        let output = session
            .outputs
            .first()
            .ok_or_else(|| ClassifierError::ModelMismatch("model has no outputs".into()))?;

        let output_dims: Vec<i64> = output
            .output_type
            .tensor_dimensions()
            .ok_or_else(|| ClassifierError::ModelMismatch("output is not a tensor".into()))?
            .collect();

        let num_classes = *output_dims.last().ok_or_else(|| {
            ClassifierError::ModelMismatch("output has no dimensions".into())
        })?;
        let num_classes = usize::try_from(num_classes).unwrap_or(0);

        if num_classes < MIN_CLASSES {
            return Err(ClassifierError::ModelMismatch(format!(
                "class count too small in output shape {output_dims:?}"
            )));
        }

        Ok(ClassifierConfig {
            input_height: height as u32,
            input_width: width as u32,
            layout,
            num_classes,
            output_name: output.name.clone(),
        })
    }

    /// Resizes the tensor to the model's input size and normalizes to [0,1].
    fn preprocess(&self, input: &InputTensor) -> Result<Array4<f32>, InferenceError> {
        let width = u32::try_from(input.width())
            .map_err(|_| InferenceError::Engine("tensor width out of range".into()))?;
        let height = u32::try_from(input.height())
            .map_err(|_| InferenceError::Engine("tensor height out of range".into()))?;

        let rgb = image::RgbImage::from_raw(width, height, input.as_bytes().to_vec())
            .ok_or_else(|| InferenceError::Engine("tensor buffer does not match shape".into()))?;

        let resized = image::DynamicImage::ImageRgb8(rgb)
            .resize_exact(
                self.config.input_width,
                self.config.input_height,
                FilterType::Triangle,
            )
            .to_rgb8();

        let (in_h, in_w) = (
            self.config.input_height as usize,
            self.config.input_width as usize,
        );
        let mut canvas = match self.config.layout {
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, in_h, in_w)),
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, in_h, in_w, 3)),
        };

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                match self.config.layout {
                    TensorLayout::Nchw => canvas[[0, c, y, x]] = value,
                    TensorLayout::Nhwc => canvas[[0, y, x, c]] = value,
                }
            }
        }

        Ok(canvas)
    }

    /// Runs the session and extracts the per-class scores.
    fn run_inference(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let input_value = ort::value::Value::from_array(input)?;

        let session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Engine("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![input_value])?;

        let output_tensor = outputs.get(self.config.output_name.as_str()).ok_or_else(|| {
            InferenceError::InvalidOutput {
                expected: format!("output node '{}'", self.config.output_name),
                got: "missing".into(),
            }
        })?;

        let (shape, data) = output_tensor.try_extract_tensor::<f32>()?;

        let total: i64 = shape.iter().product();
        if usize::try_from(total).ok() != Some(self.config.num_classes) {
            return Err(InferenceError::InvalidOutput {
                expected: format!("{} scores", self.config.num_classes),
                got: format!("shape {shape:?}"),
            });
        }

        Ok(data.to_vec())
    }

    fn label_for(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class {index}"))
    }
}

impl InferenceEngine for OnnxClassifier {
    #[instrument(skip(self, input), fields(shape = ?input.shape()))]
    fn classify(&self, input: &InputTensor) -> Result<Vec<Prediction>, InferenceError> {
        let preprocess_start = Instant::now();
        let model_input = self.preprocess(input)?;
        let preprocess_ms = preprocess_start.elapsed().as_secs_f64() * 1000.0;

        let inference_start = Instant::now();
        let scores = self.run_inference(model_input)?;
        let inference_ms = inference_start.elapsed().as_secs_f64() * 1000.0;

        let probabilities = to_probabilities(scores);
        let mut predictions: Vec<Prediction> = probabilities
            .into_iter()
            .enumerate()
            .map(|(index, probability)| Prediction {
                label: self.label_for(index),
                probability,
            })
            .collect();

        rank_descending(&mut predictions);

        debug!(
            preprocess_ms,
            inference_ms,
            top_label = predictions.first().map(|p| p.label.as_str()),
            "classification completed"
        );

        Ok(predictions)
    }
}

// ============================================================================
// Score postprocessing
// ============================================================================

/// Converts raw model output into probabilities.
///
/// Models exported with a softmax head already emit values in [0,1]; those
/// are passed through. Logit outputs get a numerically-stable softmax.
pub(crate) fn to_probabilities(scores: Vec<f32>) -> Vec<f32> {
    let already_probabilities = scores
        .iter()
        .all(|s| s.is_finite() && (0.0..=1.0).contains(s));
    if already_probabilities {
        return scores;
    }
    softmax(&scores)
}

fn softmax(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max_val = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut exps = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for v in values {
        let e = (v - max_val).exp();
        exps.push(e);
        sum += e;
    }
    if sum <= 0.0 {
        return vec![0.0; values.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}

pub(crate) fn rank_descending(predictions: &mut [Prediction]) {
    predictions.sort_unstable_by(|a, b| b.probability.total_cmp(&a.probability));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_stable_for_large_logits() {
        let probs = softmax(&[1000.0, 1001.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_empty() {
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn test_probabilities_passed_through() {
        // Already in [0,1]: a softmax head was part of the model.
        let scores = vec![0.1, 0.7, 0.2];
        assert_eq!(to_probabilities(scores.clone()), scores);
    }

    #[test]
    fn test_logits_get_softmaxed() {
        let probs = to_probabilities(vec![-2.0, 5.0, 1.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_rank_descending() {
        let mut predictions = vec![
            Prediction {
                label: "a".into(),
                probability: 0.1,
            },
            Prediction {
                label: "b".into(),
                probability: 0.8,
            },
            Prediction {
                label: "c".into(),
                probability: 0.3,
            },
        ];
        rank_descending(&mut predictions);
        let labels: Vec<&str> = predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["b", "c", "a"]);
    }
}
