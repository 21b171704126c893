use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capabilities::{Capabilities, HttpRequest};
use crate::decode::MAX_COMPRESSED_SIZE;
use crate::event::Event;
use crate::pipeline::{self, ClassificationError};
use crate::registry::{
    InferenceEngine, LoadDecision, LoadPhase, ModelId, ModelRegistry, ModelSource, Prediction,
};
use crate::source::{self, ImageRef, SourceError};
use crate::{
    default_model_specs, DEFAULT_IMAGE_URI, GENERAL_MODEL_ID, IMAGE_FETCH_TIMEOUT_MS,
    MAX_MODEL_BYTES, MAX_PREDICTION_ROWS, MODEL_FETCH_TIMEOUT_MS,
};

/// All state the core owns. The shell never mutates this directly; it sends
/// events and renders the [`ViewModel`].
pub struct Model {
    pub registry: ModelRegistry,
    pub active_model: Option<ModelId>,
    pub selected_image: Option<ImageRef>,
    pub predictions: Vec<Prediction>,
    /// Bumped per classify request; completions carrying an older value are
    /// superseded and discarded.
    pub classify_generation: u64,
    pub is_classifying: bool,
    pub classify_error: Option<ClassificationError>,
    pub selection_error: Option<String>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            registry: ModelRegistry::new(),
            active_model: None,
            // The bundled sample image is selected up front, so classify
            // works before the user has picked anything.
            selected_image: Some(ImageRef::Local {
                uri: DEFAULT_IMAGE_URI.to_string(),
            }),
            predictions: Vec::new(),
            classify_generation: 0,
            is_classifying: false,
            classify_error: None,
            selection_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatusView {
    pub id: String,
    pub display_name: String,
    pub state: String,
    pub ready: bool,
    pub active: bool,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionView {
    pub label: String,
    pub probability: f32,
    pub confidence_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ViewModel {
    pub models: Vec<ModelStatusView>,
    pub selected_image: Option<String>,
    pub can_classify: bool,
    pub is_classifying: bool,
    pub predictions: Vec<PredictionView>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct App;

impl App {
    fn start_model_load(model: &mut Model, caps: &Capabilities, id: &ModelId) {
        match model.registry.begin_load(id) {
            Ok(LoadDecision::Start(ModelSource::Remote { url })) => {
                let request = HttpRequest::get(url)
                    .and_then(|r| r.with_timeout_ms(MODEL_FETCH_TIMEOUT_MS))
                    .map(|r| r.with_max_response_size(MAX_MODEL_BYTES));
                match request {
                    Ok(request) => {
                        let id = id.clone();
                        caps.http
                            .fetch(request, move |result| Event::ModelFetched {
                                model: id,
                                result,
                            });
                    }
                    Err(e) => model.registry.complete_load(id, Err(e.to_string())),
                }
            }
            Ok(LoadDecision::Start(ModelSource::Bundled { resource })) => {
                let id = id.clone();
                caps.fs.read(resource, move |result| Event::ModelRead {
                    model: id,
                    result,
                });
            }
            Ok(decision) => {
                debug!(model = %id, ?decision, "model load request collapsed");
            }
            Err(e) => {
                warn!(model = %id, error = %e, "model load request rejected");
            }
        }
    }

    fn finish_model_load(model: &mut Model, id: &ModelId, bytes: Result<Vec<u8>, SourceError>) {
        let labels = model
            .registry
            .spec(id)
            .map(|s| s.labels.clone())
            .unwrap_or_default();

        let outcome = match bytes {
            Ok(bytes) => build_engine(&bytes, labels),
            Err(e) => Err(e.to_string()),
        };
        model.registry.complete_load(id, outcome);
    }

    fn run_pipeline(model: &Model, bytes: &[u8]) -> Result<Vec<Prediction>, ClassificationError> {
        let active = model
            .active_model
            .as_ref()
            .ok_or(ClassificationError::NoActiveModel)?;
        pipeline::classify_bytes(&model.registry, active, bytes)
    }

    fn apply_classification(
        model: &mut Model,
        outcome: Result<Vec<Prediction>, ClassificationError>,
    ) {
        model.is_classifying = false;
        match outcome {
            Ok(predictions) => {
                model.predictions = predictions;
                model.classify_error = None;
            }
            Err(e) => {
                warn!(stage = e.stage().as_str(), error = %e, "classification failed");
                model.classify_error = Some(e);
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        debug!(event = event.name(), "event received");

        match event {
            Event::AppStarted => {
                for spec in default_model_specs() {
                    model.registry.register(spec);
                }
                if model.active_model.is_none() {
                    model.active_model = Some(ModelId::new(GENERAL_MODEL_ID));
                }

                let ids: Vec<ModelId> = model
                    .registry
                    .statuses()
                    .into_iter()
                    .map(|s| s.id)
                    .collect();
                for id in &ids {
                    Self::start_model_load(model, caps, id);
                }
                caps.render.render();
            }

            Event::ImageSelected { uri } => {
                model.selected_image = Some(ImageRef::from_uri(uri));
                model.selection_error = None;
                caps.render.render();
            }

            Event::ImageSelectionFailed { reason } => {
                model.selection_error = Some(reason);
                caps.render.render();
            }

            Event::ActiveModelSelected { model: id } => {
                if model.registry.contains(&id) {
                    model.active_model = Some(id);
                } else {
                    warn!(model = %id, "cannot activate unknown model");
                }
                caps.render.render();
            }

            Event::ClassifyRequested => {
                let Some(reference) = model.selected_image.clone() else {
                    model.selection_error = Some("no image selected".to_string());
                    caps.render.render();
                    return;
                };

                model.classify_generation += 1;
                model.is_classifying = true;
                model.classify_error = None;
                model.selection_error = None;
                let generation = model.classify_generation;

                match reference {
                    ImageRef::Remote { url } => {
                        let request = HttpRequest::get(url)
                            .and_then(|r| r.with_timeout_ms(IMAGE_FETCH_TIMEOUT_MS))
                            .map(|r| r.with_max_response_size(MAX_COMPRESSED_SIZE));
                        match request {
                            Ok(request) => {
                                caps.http.fetch(request, move |result| Event::ImageFetched {
                                    generation,
                                    result,
                                });
                            }
                            Err(e) => {
                                // The reference never became a request; that
                                // is a resolution failure.
                                Self::apply_classification(
                                    model,
                                    Err(ClassificationError::SourceUnavailable(
                                        SourceError::Fetch(e.to_string()),
                                    )),
                                );
                            }
                        }
                    }
                    ImageRef::Local { uri } => {
                        caps.fs.read(uri, move |result| Event::ImageRead {
                            generation,
                            result,
                        });
                    }
                }
                caps.render.render();
            }

            Event::DismissError => {
                model.classify_error = None;
                model.selection_error = None;
                caps.render.render();
            }

            Event::ImageFetched { generation, result } => {
                if generation != model.classify_generation {
                    debug!(
                        generation,
                        current = model.classify_generation,
                        "stale image fetch discarded"
                    );
                    return;
                }
                let outcome = source::bytes_from_response(result)
                    .map_err(ClassificationError::from)
                    .and_then(|bytes| Self::run_pipeline(model, &bytes));
                Self::apply_classification(model, outcome);
                caps.render.render();
            }

            Event::ImageRead { generation, result } => {
                if generation != model.classify_generation {
                    debug!(
                        generation,
                        current = model.classify_generation,
                        "stale image read discarded"
                    );
                    return;
                }
                let outcome = source::bytes_from_contents(result)
                    .map_err(ClassificationError::from)
                    .and_then(|bytes| Self::run_pipeline(model, &bytes));
                Self::apply_classification(model, outcome);
                caps.render.render();
            }

            Event::ModelFetched { model: id, result } => {
                Self::finish_model_load(model, &id, source::bytes_from_response(result));
                caps.render.render();
            }

            Event::ModelRead { model: id, result } => {
                Self::finish_model_load(model, &id, source::bytes_from_contents(result));
                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let active_ready = model
            .active_model
            .as_ref()
            .is_some_and(|id| model.registry.is_ready(id));

        ViewModel {
            models: model
                .registry
                .statuses()
                .into_iter()
                .map(|s| ModelStatusView {
                    active: model.active_model.as_ref() == Some(&s.id),
                    id: s.id.to_string(),
                    display_name: s.display_name,
                    state: s.phase.as_str().to_string(),
                    ready: s.phase == LoadPhase::Ready,
                    failure: s.failure,
                })
                .collect(),
            selected_image: model.selected_image.as_ref().map(|r| r.uri().to_string()),
            can_classify: active_ready && model.selected_image.is_some(),
            is_classifying: model.is_classifying,
            predictions: model
                .predictions
                .iter()
                .take(MAX_PREDICTION_ROWS)
                .map(|p| PredictionView {
                    label: p.label.clone(),
                    probability: p.probability,
                    confidence_text: format_confidence(p.probability),
                })
                .collect(),
            error: model
                .selection_error
                .clone()
                .or_else(|| model.classify_error.as_ref().map(|e| e.display_message())),
        }
    }
}

#[cfg(feature = "ml")]
fn build_engine(bytes: &[u8], labels: Vec<String>) -> Result<Box<dyn InferenceEngine>, String> {
    crate::classifier::OnnxClassifier::new(bytes, labels)
        .map(|c| Box::new(c) as Box<dyn InferenceEngine>)
        .map_err(|e| e.to_string())
}

#[cfg(not(feature = "ml"))]
fn build_engine(_bytes: &[u8], _labels: Vec<String>) -> Result<Box<dyn InferenceEngine>, String> {
    Err("inference engine not available: built without the `ml` feature".to_string())
}

fn format_confidence(probability: f32) -> String {
    let percent = (f64::from(probability) * 100.0).clamp(0.0, 100.0);
    format!("{percent:.1}%")
}
