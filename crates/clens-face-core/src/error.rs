use crate::backend::ExtractError;
use crate::image_input::ImageInputError;
use crate::similarity::SimilarityError;
use crate::template::TemplateError;
use crate::types::SubjectId;
use thiserror::Error;

/// Error surfaced by the register/verify operations.
///
/// Variants are grouped by [`ErrorKind`] so the REST layer can pick the
/// right message: retry with a better photo, face already registered,
/// stored data corrupt, or a bug.
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("no usable face in the image: {0}")]
    FaceDetection(#[source] ExtractError),
    #[error("invalid image upload: {0}")]
    InvalidImage(#[from] ImageInputError),
    #[error("this face is already registered for another student (ID: {conflicting_subject_id})")]
    DuplicateFace { conflicting_subject_id: SubjectId },
    #[error("stored face template is unreadable, re-registration required: {0}")]
    CorruptTemplate(#[source] TemplateError),
    #[error("no face registered for this student")]
    NotRegistered,
    #[error("could not seal new face template: {0}")]
    Seal(#[source] TemplateError),
    #[error("embedding invariant violated: {0}")]
    InvalidEmbedding(String),
    #[error(transparent)]
    DimensionMismatch(#[from] SimilarityError),
    #[error("embedding backend failed: {0}")]
    Backend(String),
    #[error("face recognition is not available: {reason}")]
    Unavailable { reason: String },
    #[error("face engine thread exited")]
    EngineClosed,
    #[error("failed to start face engine thread: {0}")]
    EngineSpawn(#[source] std::io::Error),
}

/// Error taxonomy used for user-facing mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad image or no face; the user can retry.
    Input,
    /// Face already belongs to someone else.
    Conflict,
    /// Stored template unreadable; needs re-registration.
    Integrity,
    /// Internal invariant broken (dimension mismatch, unencodable embedding).
    Invariant,
    /// Caller precondition not met (no template on file).
    Precondition,
    /// Face recognition not available in this process.
    Unavailable,
}

impl FaceError {
    pub(crate) fn from_extract(err: ExtractError) -> Self {
        match err {
            ExtractError::Backend(message) => FaceError::Backend(message),
            other => FaceError::FaceDetection(other),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FaceError::FaceDetection(_) | FaceError::InvalidImage(_) => ErrorKind::Input,
            FaceError::DuplicateFace { .. } => ErrorKind::Conflict,
            FaceError::CorruptTemplate(_) => ErrorKind::Integrity,
            FaceError::NotRegistered => ErrorKind::Precondition,
            FaceError::Seal(_)
            | FaceError::InvalidEmbedding(_)
            | FaceError::DimensionMismatch(_)
            | FaceError::Backend(_)
            | FaceError::EngineClosed
            | FaceError::EngineSpawn(_) => ErrorKind::Invariant,
            FaceError::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }

    /// HTTP status the REST layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Input => 400,
            ErrorKind::Precondition => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Integrity | ErrorKind::Invariant => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    /// Whether repeating the same request with a new photo may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Input
    }
}
