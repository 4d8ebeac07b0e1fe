use thiserror::Error;

use crate::backend::{FaceCapability, FaceRecognitionBackend};
use crate::cipher::{CipherError, TemplateCipher};
use crate::image_input::DEFAULT_MAX_IMAGE_BYTES;
use crate::types::MatchThreshold;

const DEFAULT_FACE_MODEL: &str = "Facenet512";
const DEFAULT_DETECTOR_BACKEND: &str = "opencv";
const DEFAULT_ENGINE_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("CLENS_ENCRYPTION_KEY is not set")]
    MissingKey,
    #[error("invalid value {value:?} for {key}: {message}")]
    Invalid {
        key: &'static str,
        value: String,
        message: String,
    },
}

/// Face subsystem configuration, loaded from environment variables.
#[derive(Clone)]
pub struct FaceConfig {
    /// Secret used to build the template cipher. Never logged.
    pub encryption_key: String,
    /// Minimum similarity for a positive match.
    pub similarity_threshold: MatchThreshold,
    /// Embedding model identifier, opaque to the core.
    pub face_model: String,
    /// Face detector identifier, opaque to the core.
    pub detector_backend: String,
    /// Largest accepted decoded image upload.
    pub max_image_bytes: usize,
    /// Whether the face capability should be enabled at all.
    pub face_enabled: bool,
    /// Bound on queued engine requests.
    pub engine_queue_depth: usize,
}

impl FaceConfig {
    /// Load configuration from `CLENS_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let encryption_key = lookup("CLENS_ENCRYPTION_KEY")
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingKey)?;

        let similarity_threshold = Self::threshold_from_lookup(&lookup)?;

        Ok(Self {
            encryption_key,
            similarity_threshold,
            face_model: lookup("CLENS_FACE_MODEL")
                .unwrap_or_else(|| DEFAULT_FACE_MODEL.to_string()),
            detector_backend: lookup("CLENS_FACE_DETECTOR_BACKEND")
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            max_image_bytes: parse_or(&lookup, "CLENS_MAX_UPLOAD_SIZE", DEFAULT_MAX_IMAGE_BYTES)?,
            face_enabled: lookup("CLENS_FACE_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
            engine_queue_depth: parse_or(
                &lookup,
                "CLENS_FACE_QUEUE_DEPTH",
                DEFAULT_ENGINE_QUEUE_DEPTH,
            )?,
        })
    }

    /// Read only `CLENS_FACE_SIMILARITY_THRESHOLD`, for tools that never need the key.
    pub fn threshold_from_env() -> Result<MatchThreshold, ConfigError> {
        Self::threshold_from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn threshold_from_lookup<F>(lookup: &F) -> Result<MatchThreshold, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = parse_or(
            lookup,
            "CLENS_FACE_SIMILARITY_THRESHOLD",
            MatchThreshold::DEFAULT_VALUE,
        )?;
        MatchThreshold::new(raw).ok_or_else(|| ConfigError::Invalid {
            key: "CLENS_FACE_SIMILARITY_THRESHOLD",
            value: raw.to_string(),
            message: "must be between 0.0 and 1.0".into(),
        })
    }

    /// Template cipher for the configured key.
    pub fn cipher(&self) -> Result<TemplateCipher, CipherError> {
        TemplateCipher::from_config_key(&self.encryption_key)
    }

    /// Decide face availability at startup. `CLENS_FACE_ENABLED=0` wins over a loaded backend.
    pub fn capability(&self, backend: Option<Box<dyn FaceRecognitionBackend>>) -> FaceCapability {
        if !self.face_enabled {
            tracing::warn!("face recognition disabled by CLENS_FACE_ENABLED=0");
            return FaceCapability::Unavailable {
                reason: "disabled by configuration".into(),
            };
        }
        FaceCapability::detect(
            backend,
            &format!("no embedding backend loaded for {}", self.backend_id()),
        )
    }

    /// Backend identifier reported in logs and status output.
    pub fn backend_id(&self) -> String {
        format!("{}/{}", self.face_model, self.detector_backend)
    }
}

impl std::fmt::Debug for FaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceConfig")
            .field("encryption_key", &"<redacted>")
            .field("similarity_threshold", &self.similarity_threshold.value())
            .field("face_model", &self.face_model)
            .field("detector_backend", &self.detector_backend)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("face_enabled", &self.face_enabled)
            .field("engine_queue_depth", &self.engine_queue_depth)
            .finish()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => {
            let parsed: Result<T, T::Err> = value.trim().parse();
            parsed.map_err(|err| ConfigError::Invalid {
                key,
                message: err.to_string(),
                value,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExtractError;
    use crate::types::Embedding;
    use std::collections::HashMap;

    struct Fixed;

    impl FaceRecognitionBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn extract(&mut self, _image: &[u8]) -> Result<Embedding, ExtractError> {
            Ok(Embedding::new(vec![1.0, 0.0]))
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = FaceConfig::from_lookup(lookup(&[("CLENS_ENCRYPTION_KEY", "k")])).unwrap();
        assert_eq!(cfg.similarity_threshold.value(), 0.80);
        assert_eq!(cfg.face_model, "Facenet512");
        assert_eq!(cfg.detector_backend, "opencv");
        assert_eq!(cfg.max_image_bytes, 10_485_760);
        assert!(cfg.face_enabled);
        assert_eq!(cfg.engine_queue_depth, 4);
        assert_eq!(cfg.backend_id(), "Facenet512/opencv");
    }

    #[test]
    fn test_missing_key() {
        assert_eq!(
            FaceConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingKey
        );
        assert_eq!(
            FaceConfig::from_lookup(lookup(&[("CLENS_ENCRYPTION_KEY", "")])).unwrap_err(),
            ConfigError::MissingKey
        );
    }

    #[test]
    fn test_overrides() {
        let cfg = FaceConfig::from_lookup(lookup(&[
            ("CLENS_ENCRYPTION_KEY", "k"),
            ("CLENS_FACE_SIMILARITY_THRESHOLD", "0.65"),
            ("CLENS_FACE_MODEL", "ArcFace"),
            ("CLENS_FACE_ENABLED", "0"),
            ("CLENS_MAX_UPLOAD_SIZE", "1024"),
        ]))
        .unwrap();
        assert_eq!(cfg.similarity_threshold.value(), 0.65);
        assert_eq!(cfg.face_model, "ArcFace");
        assert!(!cfg.face_enabled);
        assert_eq!(cfg.max_image_bytes, 1024);
    }

    #[test]
    fn test_invalid_threshold() {
        let err = FaceConfig::from_lookup(lookup(&[
            ("CLENS_ENCRYPTION_KEY", "k"),
            ("CLENS_FACE_SIMILARITY_THRESHOLD", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CLENS_FACE_SIMILARITY_THRESHOLD", .. }));

        let err = FaceConfig::from_lookup(lookup(&[
            ("CLENS_ENCRYPTION_KEY", "k"),
            ("CLENS_FACE_SIMILARITY_THRESHOLD", "high"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_threshold_without_key() {
        let only_threshold = lookup(&[("CLENS_FACE_SIMILARITY_THRESHOLD", "0.6")]);
        assert_eq!(
            FaceConfig::threshold_from_lookup(&only_threshold).unwrap().value(),
            0.6
        );
        assert_eq!(
            FaceConfig::threshold_from_lookup(&lookup(&[])).unwrap(),
            MatchThreshold::default()
        );
        let out_of_range = lookup(&[("CLENS_FACE_SIMILARITY_THRESHOLD", "1.5")]);
        assert!(matches!(
            FaceConfig::threshold_from_lookup(&out_of_range),
            Err(ConfigError::Invalid { key: "CLENS_FACE_SIMILARITY_THRESHOLD", .. })
        ));
    }

    #[test]
    fn test_disabled_capability_ignores_backend() {
        let cfg = FaceConfig::from_lookup(lookup(&[
            ("CLENS_ENCRYPTION_KEY", "k"),
            ("CLENS_FACE_ENABLED", "0"),
        ]))
        .unwrap();
        let cap = cfg.capability(Some(Box::new(Fixed)));
        assert!(!cap.is_available());
    }

    #[test]
    fn test_enabled_capability() {
        let cfg = FaceConfig::from_lookup(lookup(&[("CLENS_ENCRYPTION_KEY", "k")])).unwrap();
        assert!(cfg.capability(Some(Box::new(Fixed))).is_available());
        match cfg.capability(None) {
            FaceCapability::Unavailable { reason } => {
                assert!(reason.contains("Facenet512/opencv"))
            }
            FaceCapability::Available(_) => panic!("no backend was supplied"),
        }
        assert!(cfg.cipher().is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let cfg =
            FaceConfig::from_lookup(lookup(&[("CLENS_ENCRYPTION_KEY", "super-secret")])).unwrap();
        assert!(!format!("{cfg:?}").contains("super-secret"));
    }
}
