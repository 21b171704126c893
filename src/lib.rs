// lib.rs - fieldlens shared core
//
// Headless app core: the shell (iOS / Android / Web) sends events, performs
// requested side effects, and renders the view model. Everything stateful
// lives here.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
#[cfg(feature = "ml")]
pub mod classifier;
pub mod decode;
pub mod event;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod tensor;

mod app;

pub use app::{App, Model, ModelStatusView, PredictionView, ViewModel};
pub use capabilities::{Capabilities, Effect};
pub use event::Event;
pub use pipeline::{ClassificationError, ClassifyStage};
pub use registry::{ModelId, ModelRegistry, ModelSource, ModelSpec, Prediction};
pub use source::ImageRef;

/// Bundled general-purpose classifier, available offline.
pub const GENERAL_MODEL_ID: &str = "mobilenet-v2";
pub const GENERAL_MODEL_RESOURCE: &str = "models/mobilenet-v2.onnx";

/// Remote specialist classifier for plant/animal identification.
pub const SPECIALIST_MODEL_ID: &str = "inat-inception-v3";
pub const SPECIALIST_MODEL_URL: &str = "https://models.fieldlens.dev/inat/inception-v3.onnx";

/// Sample image shipped with the app; selected until the user picks one.
pub const DEFAULT_IMAGE_URI: &str = "assets/sample.jpg";

pub const IMAGE_FETCH_TIMEOUT_MS: u64 = 30_000;
pub const MODEL_FETCH_TIMEOUT_MS: u64 = 120_000;
pub const MAX_MODEL_BYTES: usize = 256 * 1024 * 1024;

/// How many ranked predictions the view surfaces.
pub const MAX_PREDICTION_ROWS: usize = 5;

/// The two classifiers the app registers at start-up. Shells that bundle
/// label tables attach them here via [`ModelSpec::with_labels`].
pub fn default_model_specs() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new(
            GENERAL_MODEL_ID,
            "General classifier",
            ModelSource::Bundled {
                resource: GENERAL_MODEL_RESOURCE.to_string(),
            },
        ),
        ModelSpec::new(
            SPECIALIST_MODEL_ID,
            "Nature specialist",
            ModelSource::Remote {
                url: SPECIALIST_MODEL_URL.to_string(),
            },
        ),
    ]
}
