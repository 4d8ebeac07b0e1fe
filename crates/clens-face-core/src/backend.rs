//! Face embedding backends.
//!
//! The model that turns image bytes into an embedding lives outside this
//! crate. A backend is plugged in once at startup; if none can be loaded the
//! process runs with face recognition explicitly unavailable.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected in the image")]
    NoFace,
    #[error("expected exactly one face, found {count}")]
    MultipleFaces { count: usize },
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("embedding backend failed: {0}")]
    Backend(String),
}

impl ExtractError {
    /// True when the end user should simply retry with a better photo.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractError::Backend(_))
    }
}

/// Image bytes in, one face embedding out.
///
/// `extract` takes `&mut self` because inference sessions are typically
/// stateful; the engine thread owns the backend exclusively.
pub trait FaceRecognitionBackend: Send {
    /// Backend identifier, e.g. "Facenet512/opencv".
    fn name(&self) -> &str;

    fn extract(&mut self, image: &[u8]) -> Result<Embedding, ExtractError>;
}

impl<B: FaceRecognitionBackend + ?Sized> FaceRecognitionBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn extract(&mut self, image: &[u8]) -> Result<Embedding, ExtractError> {
        (**self).extract(image)
    }
}

/// Whether face recognition is available in this process. Decided once at startup.
pub enum FaceCapability {
    Available(Box<dyn FaceRecognitionBackend>),
    Unavailable { reason: String },
}

impl FaceCapability {
    /// Wrap an optional backend, logging the decision.
    pub fn detect(
        backend: Option<Box<dyn FaceRecognitionBackend>>,
        reason_if_missing: &str,
    ) -> Self {
        match backend {
            Some(b) => {
                tracing::info!(backend = b.name(), "face recognition available");
                FaceCapability::Available(b)
            }
            None => {
                tracing::warn!(reason = reason_if_missing, "face recognition unavailable");
                FaceCapability::Unavailable {
                    reason: reason_if_missing.to_string(),
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, FaceCapability::Available(_))
    }

    pub fn backend_name(&self) -> Option<&str> {
        match self {
            FaceCapability::Available(b) => Some(b.name()),
            FaceCapability::Unavailable { .. } => None,
        }
    }
}

impl std::fmt::Debug for FaceCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaceCapability::Available(b) => f.debug_tuple("Available").field(&b.name()).finish(),
            FaceCapability::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}
