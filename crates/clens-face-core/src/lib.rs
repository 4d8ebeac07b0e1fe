//! clens-face-core — Face identity core for attendance check-in.
//!
//! Encrypts face embeddings for storage, scores embeddings with a bounded
//! cosine similarity, verifies a claimed identity, and rejects faces that are
//! already registered to another subject. The embedding model itself is an
//! external [`FaceRecognitionBackend`].

pub mod backend;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod image_input;
pub mod scanner;
pub mod service;
pub mod similarity;
pub mod template;
pub mod types;

pub use backend::{ExtractError, FaceCapability, FaceRecognitionBackend};
pub use cipher::{CipherError, KeySource, TemplateCipher};
pub use config::{ConfigError, FaceConfig};
pub use engine::{spawn_engine, spawn_from_config, EngineHandle};
pub use error::{ErrorKind, FaceError};
pub use scanner::{find_duplicate, DuplicateScanner, FirstMatchScanner, ScanStats};
pub use service::{require_template, FaceService};
pub use similarity::{is_match, similarity, SimilarityError};
pub use template::{open_template, seal_embedding, TemplateError};
pub use types::{
    Candidate, DuplicateMatch, Embedding, EncryptedTemplate, MatchThreshold, SimilarityScore,
    SubjectId, Verification,
};
