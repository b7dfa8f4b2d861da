use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for prediction generation.
///
/// Each variant carries the context of its error domain (filesystem, image
/// decoding, model inference, remote services, sketch programs) so callers can
/// match on the failure class instead of parsing strings.
#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Service error ({service}): {message}")]
    Service { service: String, message: String },

    #[error("Grid parse error: {reason}")]
    GridParse { reason: String },

    #[error("Sketch error: {message}")]
    Sketch { message: String },

    #[error("Query error: {query} at ({x}, {y}): {reason}")]
    Query {
        query: String,
        x: usize,
        y: usize,
        reason: String,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SafetyError>;

impl SafetyError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn file_system(path: impl Into<PathBuf>, operation: &str, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.to_string(),
            source,
        }
    }

    pub fn sketch(message: impl Into<String>) -> Self {
        Self::Sketch {
            message: message.into(),
        }
    }
}

/// Fallback for I/O errors raised without a known path. Code that knows the
/// path builds `SafetyError::FileSystem` directly.
impl From<std::io::Error> for SafetyError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for SafetyError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for SafetyError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only come out of tensor and mask reshaping, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for SafetyError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "array shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for SafetyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: format!("invalid JSON: {err}"),
        }
    }
}

impl From<reqwest::Error> for SafetyError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        Self::Service {
            service,
            message: err.to_string(),
        }
    }
}
