use serde::{Deserialize, Serialize};

use crate::capabilities::{FileResult, HttpResult};
use crate::registry::ModelId;

/// Everything that can happen to the core: user intents from the shell and
/// completions of capability requests. Shell responses carry the generation
/// or model id they belong to, so stale completions can be recognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // --- User / shell intents ---
    AppStarted,
    ImageSelected { uri: String },
    ImageSelectionFailed { reason: String },
    ActiveModelSelected { model: ModelId },
    ClassifyRequested,
    DismissError,

    // --- Capability completions ---
    ImageFetched { generation: u64, result: HttpResult },
    ImageRead { generation: u64, result: FileResult },
    ModelFetched { model: ModelId, result: HttpResult },
    ModelRead { model: ModelId, result: FileResult },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AppStarted => "app_started",
            Event::ImageSelected { .. } => "image_selected",
            Event::ImageSelectionFailed { .. } => "image_selection_failed",
            Event::ActiveModelSelected { .. } => "active_model_selected",
            Event::ClassifyRequested => "classify_requested",
            Event::DismissError => "dismiss_error",
            Event::ImageFetched { .. } => "image_fetched",
            Event::ImageRead { .. } => "image_read",
            Event::ModelFetched { .. } => "model_fetched",
            Event::ModelRead { .. } => "model_read",
        }
    }

    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Event::ImageSelected { .. }
                | Event::ActiveModelSelected { .. }
                | Event::ClassifyRequested
                | Event::DismissError
        )
    }
}
