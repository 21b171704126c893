use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::tensor::InputTensor;

/// Opaque identifier for a registered classification model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub String);

impl ModelId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a model's artifact comes from. The registry treats both as opaque
/// string keys; the app layer turns them into capability requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    Remote { url: String },
    Bundled { resource: String },
}

/// Registration-time description of a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: ModelId,
    pub display_name: String,
    pub source: ModelSource,
    /// Class labels in model output order. Empty means the engine falls
    /// back to positional names.
    pub labels: Vec<String>,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, source: ModelSource) -> Self {
        Self {
            id: ModelId::new(id),
            display_name: display_name.into(),
            source,
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }
}

/// A single ranked classification result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("inference engine error: {0}")]
    Engine(String),

    #[error("invalid model output: expected {expected}, got {got}")]
    InvalidOutput { expected: String, got: String },
}

/// The seam between the registry and whatever actually runs the network.
///
/// Implementations map an input tensor to ranked predictions, descending by
/// probability. `OnnxClassifier` is the production implementation; tests
/// substitute fakes.
pub trait InferenceEngine: Send {
    fn classify(&self, input: &InputTensor) -> Result<Vec<Prediction>, InferenceError>;
}

/// Lifecycle of one model: `Unloaded -> Loading -> Ready | Failed`.
/// The transition out of `Loading` happens exactly once.
pub enum LoadState {
    Unloaded,
    Loading,
    Ready(Box<dyn InferenceEngine>),
    Failed(String),
}

impl LoadState {
    pub fn phase(&self) -> LoadPhase {
        match self {
            LoadState::Unloaded => LoadPhase::Unloaded,
            LoadState::Loading => LoadPhase::Loading,
            LoadState::Ready(_) => LoadPhase::Ready,
            LoadState::Failed(_) => LoadPhase::Failed,
        }
    }
}

impl fmt::Debug for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Unloaded => f.write_str("Unloaded"),
            LoadState::Loading => f.write_str("Loading"),
            LoadState::Ready(_) => f.write_str("Ready"),
            LoadState::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadPhase {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl LoadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadPhase::Ready | LoadPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadPhase::Unloaded => "unloaded",
            LoadPhase::Loading => "loading",
            LoadPhase::Ready => "ready",
            LoadPhase::Failed => "failed",
        }
    }
}

/// What the caller should do after asking for a model to be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadDecision {
    /// First request: the caller must fetch this source and report back via
    /// `complete_load`.
    Start(ModelSource),
    /// A load is already in flight; this request collapses into it.
    AlreadyLoading,
    /// The model already reached a terminal state.
    Settled(LoadPhase),
}

/// Snapshot of one model's readiness for the view layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub id: ModelId,
    pub display_name: String,
    pub phase: LoadPhase,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown model '{0}'")]
    UnknownModel(ModelId),

    #[error("model '{0}' is not ready")]
    ModelNotReady(ModelId),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

struct ModelEntry {
    spec: ModelSpec,
    state: LoadState,
}

/// Owns the asynchronous lifecycle of every registered model.
///
/// Models load independently; one becoming `Ready` never waits on another.
/// Readiness is written once, at load completion, and read-only afterwards.
#[derive(Default)]
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model in the `Unloaded` state. Re-registering an id is
    /// ignored so a duplicated start-up event cannot reset a live model.
    pub fn register(&mut self, spec: ModelSpec) {
        if self.entry(&spec.id).is_some() {
            warn!(model = %spec.id, "model already registered, ignoring");
            return;
        }
        debug!(model = %spec.id, "model registered");
        self.entries.push(ModelEntry {
            spec,
            state: LoadState::Unloaded,
        });
    }

    /// Requests that a model be loaded.
    ///
    /// Only the first request for a given model returns
    /// [`LoadDecision::Start`]; duplicates while the load is in flight (or
    /// after it settled) collapse without issuing a second underlying load.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownModel`] for an unregistered id.
    pub fn begin_load(&mut self, id: &ModelId) -> Result<LoadDecision, RegistryError> {
        let entry = self
            .entry_mut(id)
            .ok_or_else(|| RegistryError::UnknownModel(id.clone()))?;

        match entry.state {
            LoadState::Unloaded => {
                entry.state = LoadState::Loading;
                debug!(model = %id, "model load started");
                Ok(LoadDecision::Start(entry.spec.source.clone()))
            }
            LoadState::Loading => {
                debug!(model = %id, "model load already in flight");
                Ok(LoadDecision::AlreadyLoading)
            }
            ref state => Ok(LoadDecision::Settled(state.phase())),
        }
    }

    /// Settles a load with its terminal state. Write-once: completions for a
    /// model that is not `Loading` are discarded.
    pub fn complete_load(
        &mut self,
        id: &ModelId,
        outcome: Result<Box<dyn InferenceEngine>, String>,
    ) {
        let Some(entry) = self.entry_mut(id) else {
            warn!(model = %id, "load completion for unknown model, discarding");
            return;
        };

        if !matches!(entry.state, LoadState::Loading) {
            warn!(
                model = %id,
                state = ?entry.state,
                "load completion for model not in Loading state, discarding"
            );
            return;
        }

        entry.state = match outcome {
            Ok(engine) => {
                debug!(model = %id, "model ready");
                LoadState::Ready(engine)
            }
            Err(reason) => {
                warn!(model = %id, %reason, "model load failed");
                LoadState::Failed(reason)
            }
        };
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.entry(id).is_some()
    }

    pub fn spec(&self, id: &ModelId) -> Option<&ModelSpec> {
        self.entry(id).map(|e| &e.spec)
    }

    pub fn phase(&self, id: &ModelId) -> Option<LoadPhase> {
        self.entry(id).map(|e| e.state.phase())
    }

    pub fn is_ready(&self, id: &ModelId) -> bool {
        self.phase(id) == Some(LoadPhase::Ready)
    }

    /// Readiness snapshot for every model, in registration order.
    pub fn statuses(&self) -> Vec<ModelStatus> {
        self.entries
            .iter()
            .map(|e| ModelStatus {
                id: e.spec.id.clone(),
                display_name: e.spec.display_name.clone(),
                phase: e.state.phase(),
                failure: match &e.state {
                    LoadState::Failed(reason) => Some(reason.clone()),
                    _ => None,
                },
            })
            .collect()
    }

    /// Runs inference on a model.
    ///
    /// Never blocks waiting for readiness: a model that is not `Ready` fails
    /// immediately with [`RegistryError::ModelNotReady`]. Callers observe
    /// readiness through [`ModelRegistry::statuses`] instead of polling here.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the model is unknown, not ready, or the
    /// engine fails.
    pub fn infer(
        &self,
        id: &ModelId,
        input: &InputTensor,
    ) -> Result<Vec<Prediction>, RegistryError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| RegistryError::UnknownModel(id.clone()))?;

        match &entry.state {
            LoadState::Ready(engine) => Ok(engine.classify(input)?),
            _ => Err(RegistryError::ModelNotReady(id.clone())),
        }
    }

    fn entry(&self, id: &ModelId) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| &e.spec.id == id)
    }

    fn entry_mut(&mut self, id: &ModelId) -> Option<&mut ModelEntry> {
        self.entries.iter_mut().find(|e| &e.spec.id == id)
    }
}
