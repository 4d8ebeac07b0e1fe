//! Register and verify faces.
//!
//! The service never touches storage: callers hand in stored templates and
//! persist the template returned by [`FaceService::register`] themselves,
//! inside their own transaction. Writes for one subject must be serialized
//! by the caller, and the duplicate scan only sees the snapshot it is given.

use crate::backend::{FaceCapability, FaceRecognitionBackend};
use crate::cipher::TemplateCipher;
use crate::config::FaceConfig;
use crate::error::FaceError;
use crate::scanner::{DuplicateScanner, FirstMatchScanner};
use crate::similarity::{self, is_match};
use crate::template::{open_template, seal_embedding};
use crate::types::{
    Candidate, DuplicateMatch, Embedding, EncryptedTemplate, MatchThreshold, SimilarityScore,
    SubjectId, Verification,
};

pub struct FaceService<B> {
    backend: B,
    cipher: TemplateCipher,
    threshold: MatchThreshold,
}

impl<B: FaceRecognitionBackend> FaceService<B> {
    pub fn new(backend: B, cipher: TemplateCipher, threshold: MatchThreshold) -> Self {
        Self {
            backend,
            cipher,
            threshold,
        }
    }

    pub fn threshold(&self) -> MatchThreshold {
        self.threshold
    }

    pub fn cipher(&self) -> &TemplateCipher {
        &self.cipher
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Extract an embedding for `subject_id` and return the template to persist.
    ///
    /// With `check_duplicate`, every candidate except `subject_id` itself is
    /// scanned first; a hit fails with [`FaceError::DuplicateFace`] and no
    /// template is produced.
    pub fn register<'a, I>(
        &mut self,
        image: &[u8],
        subject_id: SubjectId,
        check_duplicate: bool,
        candidates: I,
    ) -> Result<EncryptedTemplate, FaceError>
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        let embedding = self.extract(image)?;

        if check_duplicate {
            if let Some(hit) = self.scan_duplicates(&embedding, candidates, Some(subject_id)) {
                tracing::warn!(
                    %subject_id,
                    conflicting_subject_id = %hit.subject_id,
                    score = %hit.score,
                    "register: face already registered to another subject"
                );
                return Err(FaceError::DuplicateFace {
                    conflicting_subject_id: hit.subject_id,
                });
            }
        }

        let template = seal_embedding(&self.cipher, &embedding).map_err(FaceError::Seal)?;
        tracing::info!(
            %subject_id,
            dim = embedding.dim(),
            check_duplicate,
            "register: face template sealed"
        );
        Ok(template)
    }

    /// Compare a probe image against one stored template.
    ///
    /// A low score is a successful verification with `matched == false`.
    /// An unreadable stored template fails with [`FaceError::CorruptTemplate`].
    pub fn verify(
        &mut self,
        image: &[u8],
        stored: &EncryptedTemplate,
    ) -> Result<Verification, FaceError> {
        let probe = self.extract(image)?;
        let reference = open_template(&self.cipher, stored).map_err(|err| {
            tracing::error!(error = %err, "verify: stored template unreadable");
            FaceError::CorruptTemplate(err)
        })?;

        let score = similarity::similarity(&probe, &reference).map_err(|err| {
            tracing::error!(error = %err, "verify: probe and template dimensions differ");
            FaceError::from(err)
        })?;
        let matched = is_match(score, self.threshold);

        tracing::info!(matched, %score, threshold = self.threshold.value(), "verify: decision");
        Ok(Verification { matched, score })
    }

    /// Raw similarity of two embeddings.
    pub fn similarity(&self, a: &Embedding, b: &Embedding) -> Result<SimilarityScore, FaceError> {
        Ok(similarity::similarity(a, b)?)
    }

    /// First stored template, in caller order, that matches `probe`.
    pub fn scan_duplicates<'a, I>(
        &self,
        probe: &Embedding,
        candidates: I,
        exclude: Option<SubjectId>,
    ) -> Option<DuplicateMatch>
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        FirstMatchScanner::new(&self.cipher)
            .scan(probe, candidates, exclude, self.threshold)
            .0
    }

    fn extract(&mut self, image: &[u8]) -> Result<Embedding, FaceError> {
        let embedding = self.backend.extract(image).map_err(|err| {
            tracing::info!(backend = self.backend.name(), error = %err, "face extraction failed");
            FaceError::from_extract(err)
        })?;

        if embedding.dim() == 0 {
            return Err(FaceError::InvalidEmbedding(
                "backend returned an empty embedding".into(),
            ));
        }
        if let Some(index) = embedding.first_non_finite() {
            return Err(FaceError::InvalidEmbedding(format!(
                "backend returned a non-finite value at index {index}"
            )));
        }
        Ok(embedding)
    }
}

impl FaceService<Box<dyn FaceRecognitionBackend>> {
    /// Build a service if face recognition is available.
    pub fn from_capability(
        capability: FaceCapability,
        cipher: TemplateCipher,
        threshold: MatchThreshold,
    ) -> Result<Self, FaceError> {
        match capability {
            FaceCapability::Available(backend) => Ok(Self::new(backend, cipher, threshold)),
            FaceCapability::Unavailable { reason } => Err(FaceError::Unavailable { reason }),
        }
    }

    /// Startup constructor: cipher, threshold and availability all come from `config`.
    pub fn from_config(
        config: &FaceConfig,
        backend: Option<Box<dyn FaceRecognitionBackend>>,
    ) -> Result<Self, FaceError> {
        let cipher = config.cipher().map_err(|err| FaceError::Unavailable {
            reason: format!("template cipher: {err}"),
        })?;
        Self::from_capability(
            config.capability(backend),
            cipher,
            config.similarity_threshold,
        )
    }
}

/// Caller-side precondition: a subject must have a template on file before verify.
pub fn require_template(
    stored: Option<&EncryptedTemplate>,
) -> Result<&EncryptedTemplate, FaceError> {
    match stored {
        Some(template) if !template.is_empty() => Ok(template),
        _ => Err(FaceError::NotRegistered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExtractError;
    use crate::cipher::generate_key;
    use crate::error::ErrorKind;
    use crate::template::TemplateError;

    /// Backend that reads the embedding straight out of the "image" bytes.
    struct Echo;

    impl FaceRecognitionBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn extract(&mut self, image: &[u8]) -> Result<Embedding, ExtractError> {
            match image {
                b"" => Err(ExtractError::NoFace),
                b"crash" => Err(ExtractError::Backend("inference crashed".into())),
                b"nan" => Ok(Embedding::new(vec![f64::NAN, 1.0])),
                b"empty" => Ok(Embedding::new(Vec::new())),
                other => serde_json::from_slice::<Vec<f64>>(other)
                    .map(Embedding::new)
                    .map_err(|e| ExtractError::InvalidImage(e.to_string())),
            }
        }
    }

    fn service() -> FaceService<Echo> {
        let cipher = TemplateCipher::from_config_key(&generate_key()).unwrap();
        FaceService::new(Echo, cipher, MatchThreshold::default())
    }

    #[test]
    fn test_register_then_verify() {
        let mut svc = service();
        let template = svc
            .register(b"[1.0, 0.0, 0.0]", SubjectId(1), false, std::iter::empty())
            .unwrap();
        let v = svc.verify(b"[0.98, 0.1, 0.0]", &template).unwrap();
        assert!(v.matched);
        assert!(v.score.value() >= 0.80);
    }

    #[test]
    fn test_register_allows_own_previous_template() {
        let mut svc = service();
        let first = svc
            .register(b"[1.0, 0.0]", SubjectId(1), true, std::iter::empty())
            .unwrap();
        let candidates = vec![Candidate::new(1, first)];
        // Re-registration by the same subject is not a duplicate.
        assert!(svc
            .register(b"[1.0, 0.0]", SubjectId(1), true, &candidates)
            .is_ok());
    }

    #[test]
    fn test_extraction_failures() {
        let mut svc = service();
        let err = svc
            .register(b"", SubjectId(1), false, std::iter::empty())
            .unwrap_err();
        assert!(matches!(err, FaceError::FaceDetection(ExtractError::NoFace)));

        let err = svc
            .register(b"crash", SubjectId(1), false, std::iter::empty())
            .unwrap_err();
        assert!(matches!(err, FaceError::Backend(_)));

        let err = svc
            .register(b"nan", SubjectId(1), false, std::iter::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);

        let err = svc
            .register(b"empty", SubjectId(1), false, std::iter::empty())
            .unwrap_err();
        assert!(matches!(err, FaceError::InvalidEmbedding(_)));
    }

    #[test]
    fn test_verify_dimension_mismatch_is_invariant_error() {
        let mut svc = service();
        let template = svc
            .register(b"[1.0, 0.0]", SubjectId(1), false, std::iter::empty())
            .unwrap();
        let err = svc.verify(b"[1.0, 0.0, 0.0]", &template).unwrap_err();
        assert!(matches!(err, FaceError::DimensionMismatch(_)));
    }

    #[test]
    fn test_verify_empty_stored_embedding_is_corrupt() {
        let mut svc = service();
        let stored = EncryptedTemplate::new(svc.cipher().encrypt("[]").unwrap());
        let err = svc.verify(b"[1.0, 0.0]", &stored).unwrap_err();
        assert!(matches!(
            err,
            FaceError::CorruptTemplate(TemplateError::EmptyEmbedding)
        ));
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_require_template() {
        assert!(matches!(require_template(None), Err(FaceError::NotRegistered)));
        let empty = EncryptedTemplate::new("");
        assert!(matches!(
            require_template(Some(&empty)),
            Err(FaceError::NotRegistered)
        ));
        let t = EncryptedTemplate::new("abc");
        assert_eq!(require_template(Some(&t)).unwrap(), &t);
    }

    fn config(pairs: &[(&str, &str)]) -> FaceConfig {
        FaceConfig::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_from_config_uses_configured_threshold() {
        let key = generate_key();
        let cfg = config(&[
            ("CLENS_ENCRYPTION_KEY", key.as_str()),
            ("CLENS_FACE_SIMILARITY_THRESHOLD", "0.95"),
        ]);
        let svc = FaceService::from_config(&cfg, Some(Box::new(Echo))).unwrap();
        assert_eq!(svc.threshold().value(), 0.95);
        assert_eq!(svc.backend_name(), "echo");
    }

    #[test]
    fn test_from_config_disabled() {
        let key = generate_key();
        let cfg = config(&[
            ("CLENS_ENCRYPTION_KEY", key.as_str()),
            ("CLENS_FACE_ENABLED", "0"),
        ]);
        let err = FaceService::from_config(&cfg, Some(Box::new(Echo)))
            .err()
            .unwrap();
        assert!(matches!(err, FaceError::Unavailable { .. }));
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_from_capability_unavailable() {
        let cipher = TemplateCipher::from_config_key(&generate_key()).unwrap();
        let cap = FaceCapability::Unavailable {
            reason: "disabled".into(),
        };
        let err = FaceService::from_capability(cap, cipher, MatchThreshold::default())
            .err()
            .unwrap();
        assert_eq!(err.status_code(), 503);
    }
}
