use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reads local and bundled resources through the shell.
///
/// Mobile storage APIs expose file contents in a text-safe encoding, so the
/// shell returns base64 and the core decodes it back to raw bytes (see
/// `source::bytes_from_contents`).
#[derive(Clone)]
pub struct FileStore<E> {
    context: CapabilityContext<FileOperation, E>,
}

impl<E> std::fmt::Debug for FileStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").finish_non_exhaustive()
    }
}

impl<Ev> Capability<Ev> for FileStore<Ev> {
    type Operation = FileOperation;
    type MappedSelf<MappedEv> = FileStore<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        FileStore::new(self.context.map_event(f))
    }
}

impl<E> FileStore<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<FileOperation, E>) -> Self {
        Self { context }
    }

    pub fn read<F>(&self, uri: impl Into<String>, callback: F)
    where
        E: Send,
        F: FnOnce(FileResult) -> E + Send + 'static,
    {
        let ctx = self.context.clone();
        let uri = uri.into();
        self.context.spawn(async move {
            let result = ctx.request_from_shell(FileOperation::Read { uri }).await;
            ctx.update_app(callback(result));
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOperation {
    Read { uri: String },
}

impl Operation for FileOperation {
    type Output = FileResult;
}

/// File contents in the text-safe encoding the storage API hands out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContents {
    pub base64: String,
}

impl FileContents {
    pub fn new(base64: impl Into<String>) -> Self {
        Self {
            base64: base64.into(),
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileError {
    #[error("file not found: {uri}")]
    NotFound { uri: String },

    #[error("permission denied reading {uri}")]
    PermissionDenied { uri: String },

    #[error("read failed: {message}")]
    Io { message: String },
}

impl FileError {
    pub fn is_permission_error(&self) -> bool {
        matches!(self, FileError::PermissionDenied { .. })
    }
}

pub type FileResult = Result<FileContents, FileError>;
