use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::{FileResult, HttpResult};

/// Where an image comes from: a remote URI fetched over the network, or a
/// local/bundled resource read through the shell's storage API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageRef {
    Remote { url: String },
    Local { uri: String },
}

impl ImageRef {
    /// Splits a reference by scheme: `http`/`https` go over the network,
    /// everything else (file paths, `content://`, bundled asset ids) is a
    /// local read.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let lower = uri.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageRef::Remote { url: uri }
        } else {
            ImageRef::Local { uri }
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            ImageRef::Remote { url } => url,
            ImageRef::Local { uri } => uri,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageRef::Remote { .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("resource read failed: {0}")]
    Read(String),

    #[error("resource is not valid base64: {0}")]
    Encoding(String),

    #[error("source returned an empty body")]
    Empty,
}

/// Normalizes the remote arm: a 2xx response body, interpreted as raw
/// binary, is the image. Transport failures, non-2xx statuses, and empty
/// bodies are all `SourceError`.
pub fn bytes_from_response(result: HttpResult) -> Result<Vec<u8>, SourceError> {
    let response = result.map_err(|e| SourceError::Fetch(e.to_string()))?;

    if !response.is_success() {
        return Err(SourceError::Status {
            status: response.status(),
        });
    }

    let body = response.into_body();
    if body.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(body)
}

/// Normalizes the local arm: storage hands contents back base64-encoded,
/// so decode them into the original raw bytes.
pub fn bytes_from_contents(result: FileResult) -> Result<Vec<u8>, SourceError> {
    let contents = result.map_err(|e| SourceError::Read(e.to_string()))?;

    let bytes = STANDARD
        .decode(contents.base64.trim())
        .map_err(|e| SourceError::Encoding(e.to_string()))?;

    if bytes.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{FileContents, FileError, HttpError, HttpResponse};

    #[test]
    fn test_image_ref_scheme_split() {
        assert!(ImageRef::from_uri("https://example.com/a.jpg").is_remote());
        assert!(ImageRef::from_uri("http://example.com/a.jpg").is_remote());
        assert!(ImageRef::from_uri("HTTPS://EXAMPLE.COM/A.JPG").is_remote());

        assert!(!ImageRef::from_uri("file:///sdcard/a.jpg").is_remote());
        assert!(!ImageRef::from_uri("content://media/external/images/1").is_remote());
        assert!(!ImageRef::from_uri("assets/sample.jpg").is_remote());
        // A scheme-ish prefix inside a path must not count as remote.
        assert!(!ImageRef::from_uri("photos/http/a.jpg").is_remote());
    }

    #[test]
    fn test_image_ref_preserves_original_uri() {
        let reference = ImageRef::from_uri("HTTP://Example.com/Photo.JPG");
        assert_eq!(reference.uri(), "HTTP://Example.com/Photo.JPG");
    }

    #[test]
    fn test_response_success_returns_body() {
        let result = Ok(HttpResponse::new(200, vec![0xFF, 0xD8, 0xFF], "r".into(), 5));
        assert_eq!(bytes_from_response(result).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_response_404_is_source_error() {
        let result = Ok(HttpResponse::new(404, b"not found".to_vec(), "r".into(), 5));
        assert_eq!(
            bytes_from_response(result),
            Err(SourceError::Status { status: 404 })
        );
    }

    #[test]
    fn test_response_transport_failure() {
        let result = Err(HttpError::Timeout { timeout_ms: 30_000 });
        assert!(matches!(
            bytes_from_response(result),
            Err(SourceError::Fetch(_))
        ));
    }

    #[test]
    fn test_response_empty_body() {
        let result = Ok(HttpResponse::new(200, Vec::new(), "r".into(), 5));
        assert_eq!(bytes_from_response(result), Err(SourceError::Empty));
    }

    #[test]
    fn test_contents_base64_round_trip_is_lossless() {
        // Every byte value survives encode -> decode unchanged.
        let original: Vec<u8> = (0..=255u8).collect();
        let encoded = STANDARD.encode(&original);
        let result = bytes_from_contents(Ok(FileContents::new(encoded)));
        assert_eq!(result.unwrap(), original);
    }

    #[test]
    fn test_contents_tolerates_surrounding_whitespace() {
        let encoded = format!("  {}\n", STANDARD.encode(b"jpeg bytes"));
        let result = bytes_from_contents(Ok(FileContents::new(encoded)));
        assert_eq!(result.unwrap(), b"jpeg bytes");
    }

    #[test]
    fn test_contents_invalid_base64() {
        let result = bytes_from_contents(Ok(FileContents::new("!!! not base64 !!!")));
        assert!(matches!(result, Err(SourceError::Encoding(_))));
    }

    #[test]
    fn test_contents_read_failure() {
        let result = bytes_from_contents(Err(FileError::NotFound {
            uri: "assets/missing.jpg".into(),
        }));
        assert!(matches!(result, Err(SourceError::Read(_))));
    }

    #[test]
    fn test_contents_empty_file() {
        let result = bytes_from_contents(Ok(FileContents::new("")));
        assert_eq!(result, Err(SourceError::Empty));
    }
}
