use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::{self, DecodeError};
use crate::registry::{InferenceError, ModelId, ModelRegistry, Prediction, RegistryError};
use crate::source::SourceError;
use crate::tensor::{self, PackError};

/// Which pipeline stage produced a failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifyStage {
    Resolve,
    Decode,
    Pack,
    Infer,
}

impl ClassifyStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassifyStage::Resolve => "resolve",
            ClassifyStage::Decode => "decode",
            ClassifyStage::Pack => "pack",
            ClassifyStage::Infer => "infer",
        }
    }
}

/// A classification failure, tagged with the stage that produced it.
///
/// One structured failure per attempt: no silent recovery, no fallback
/// image, no partial predictions. All per-call state is discarded, so a
/// failed attempt leaves the core ready for the next one.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationError {
    #[error("image source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("image decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("tensor packing failed: {0}")]
    InvariantViolation(#[from] PackError),

    #[error("model '{model}' is not ready")]
    ModelNotReady { model: ModelId },

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("no model selected")]
    NoActiveModel,
}

impl ClassificationError {
    pub fn stage(&self) -> ClassifyStage {
        match self {
            ClassificationError::SourceUnavailable(_) => ClassifyStage::Resolve,
            ClassificationError::Decode(_) => ClassifyStage::Decode,
            ClassificationError::InvariantViolation(_) => ClassifyStage::Pack,
            ClassificationError::ModelNotReady { .. }
            | ClassificationError::Inference(_)
            | ClassificationError::NoActiveModel => ClassifyStage::Infer,
        }
    }

    /// Message the shell shows the user, with the failing stage named.
    pub fn display_message(&self) -> String {
        format!("classification failed at {} stage: {self}", self.stage().as_str())
    }
}

impl From<RegistryError> for ClassificationError {
    fn from(e: RegistryError) -> Self {
        match e {
            // A model that was never registered is, from the caller's point
            // of view, simply not ready to serve.
            RegistryError::UnknownModel(model) | RegistryError::ModelNotReady(model) => {
                ClassificationError::ModelNotReady { model }
            }
            RegistryError::Inference(e) => ClassificationError::Inference(e),
        }
    }
}

/// Runs the post-resolution pipeline: decode -> pack -> infer.
///
/// Stages run strictly in order and short-circuit on the first failure;
/// each stage is attempted at most once. Re-invoking classification is the
/// only retry path. The returned ranking is unmodified; consumers truncate
/// to top-K themselves.
///
/// # Errors
///
/// Returns [`ClassificationError`] tagged with the failing stage.
pub fn classify_bytes(
    registry: &ModelRegistry,
    model: &ModelId,
    bytes: &[u8],
) -> Result<Vec<Prediction>, ClassificationError> {
    let decoded = decode::decode_jpeg(bytes)?;
    let tensor = tensor::pack(&decoded)?;
    let predictions = registry.infer(model, &tensor)?;
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InferenceEngine, ModelSource, ModelSpec};
    use crate::tensor::InputTensor;

    const TINY_JPEG: &[u8] = include_bytes!("../tests/fixtures/tiny.jpg");

    struct FixedEngine;

    impl InferenceEngine for FixedEngine {
        fn classify(&self, _input: &InputTensor) -> Result<Vec<Prediction>, InferenceError> {
            Ok(vec![Prediction {
                label: "barn owl".into(),
                probability: 0.83,
            }])
        }
    }

    fn ready_registry(id: &str) -> (ModelRegistry, ModelId) {
        let mut registry = ModelRegistry::new();
        registry.register(ModelSpec::new(
            id,
            "Test",
            ModelSource::Bundled {
                resource: "models/test.onnx".into(),
            },
        ));
        let model = ModelId::new(id);
        registry.begin_load(&model).unwrap();
        registry.complete_load(&model, Ok(Box::new(FixedEngine)));
        (registry, model)
    }

    #[test]
    fn test_classify_bytes_happy_path() {
        let (registry, model) = ready_registry("m");
        let predictions = classify_bytes(&registry, &model, TINY_JPEG).unwrap();
        assert_eq!(predictions[0].label, "barn owl");
    }

    #[test]
    fn test_classify_bytes_decode_failure_short_circuits() {
        let (registry, model) = ready_registry("m");
        let err = classify_bytes(&registry, &model, b"not a jpeg").unwrap_err();
        assert_eq!(err.stage(), ClassifyStage::Decode);
    }

    #[test]
    fn test_classify_bytes_model_not_ready() {
        let mut registry = ModelRegistry::new();
        registry.register(ModelSpec::new(
            "m",
            "Test",
            ModelSource::Bundled {
                resource: "models/test.onnx".into(),
            },
        ));
        let model = ModelId::new("m");

        let err = classify_bytes(&registry, &model, TINY_JPEG).unwrap_err();
        assert_eq!(err, ClassificationError::ModelNotReady { model });
        assert_eq!(err.stage(), ClassifyStage::Infer);
    }

    #[test]
    fn test_stage_tags() {
        assert_eq!(
            ClassificationError::SourceUnavailable(SourceError::Status { status: 404 }).stage(),
            ClassifyStage::Resolve
        );
        assert_eq!(
            ClassificationError::Decode(DecodeError::Empty).stage(),
            ClassifyStage::Decode
        );
        assert_eq!(
            ClassificationError::InvariantViolation(PackError::InvariantViolation {
                width: 1,
                height: 1,
                expected: 4,
                actual: 3,
            })
            .stage(),
            ClassifyStage::Pack
        );
        assert_eq!(ClassificationError::NoActiveModel.stage(), ClassifyStage::Infer);
    }

    #[test]
    fn test_display_message_names_stage() {
        let err = ClassificationError::SourceUnavailable(SourceError::Status { status: 404 });
        let message = err.display_message();
        assert!(message.contains("resolve"));
        assert!(message.contains("404"));
    }
}
