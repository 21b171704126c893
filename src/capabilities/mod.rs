mod fs;
mod http;

pub use self::fs::{FileContents, FileError, FileOperation, FileResult, FileStore};
pub use self::http::{
    Http, HttpError, HttpOperation, HttpRequest, HttpResponse, HttpResult, ValidatedUrl,
    DEFAULT_TIMEOUT_MS, MAX_RESPONSE_BODY_SIZE, MAX_TIMEOUT_MS, MAX_URL_LENGTH,
};

// We use Crux's built-in Render capability directly because it provides
// all necessary functionality for triggering view updates.
pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

pub type AppHttp = Http<Event>;
pub type AppFs = FileStore<Event>;
pub type AppRender = Render<Event>;

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub http: Http<Event>,
    pub fs: FileStore<Event>,
    pub render: Render<Event>,
}
