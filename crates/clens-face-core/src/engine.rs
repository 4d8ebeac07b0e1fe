//! Dedicated thread that owns the face service.
//!
//! Embedding extraction is CPU-bound model inference. Async request
//! handlers send work to this thread and await a oneshot reply instead of
//! running inference on the runtime's worker threads. Requests are served
//! one at a time in arrival order.

use tokio::sync::{mpsc, oneshot};

use crate::backend::FaceRecognitionBackend;
use crate::config::FaceConfig;
use crate::error::FaceError;
use crate::service::{require_template, FaceService};
use crate::types::{
    Candidate, DuplicateMatch, Embedding, EncryptedTemplate, SubjectId, Verification,
};

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Register {
        image: Vec<u8>,
        subject_id: SubjectId,
        check_duplicate: bool,
        candidates: Vec<Candidate>,
        reply: oneshot::Sender<Result<EncryptedTemplate, FaceError>>,
    },
    Verify {
        image: Vec<u8>,
        stored: EncryptedTemplate,
        reply: oneshot::Sender<Result<Verification, FaceError>>,
    },
    Scan {
        probe: Embedding,
        candidates: Vec<Candidate>,
        exclude: Option<SubjectId>,
        reply: oneshot::Sender<Option<DuplicateMatch>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Register a face; see [`FaceService::register`].
    pub async fn register(
        &self,
        image: Vec<u8>,
        subject_id: SubjectId,
        check_duplicate: bool,
        candidates: Vec<Candidate>,
    ) -> Result<EncryptedTemplate, FaceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                image,
                subject_id,
                check_duplicate,
                candidates,
                reply: reply_tx,
            })
            .await
            .map_err(|_| FaceError::EngineClosed)?;
        reply_rx.await.map_err(|_| FaceError::EngineClosed)?
    }

    /// Verify a probe image against the subject's template on file, if any.
    pub async fn verify(
        &self,
        image: Vec<u8>,
        stored: Option<EncryptedTemplate>,
    ) -> Result<Verification, FaceError> {
        let stored = require_template(stored.as_ref())?.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                image,
                stored,
                reply: reply_tx,
            })
            .await
            .map_err(|_| FaceError::EngineClosed)?;
        reply_rx.await.map_err(|_| FaceError::EngineClosed)?
    }

    /// Duplicate scan of an already-extracted embedding.
    pub async fn scan_duplicates(
        &self,
        probe: Embedding,
        candidates: Vec<Candidate>,
        exclude: Option<SubjectId>,
    ) -> Result<Option<DuplicateMatch>, FaceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Scan {
                probe,
                candidates,
                exclude,
                reply: reply_tx,
            })
            .await
            .map_err(|_| FaceError::EngineClosed)?;
        reply_rx.await.map_err(|_| FaceError::EngineClosed)
    }
}

/// Spawn the engine on a dedicated OS thread with a bounded request queue.
///
/// The thread exits once every [`EngineHandle`] has been dropped.
pub fn spawn_engine<B>(
    mut service: FaceService<B>,
    queue_depth: usize,
) -> std::io::Result<EngineHandle>
where
    B: FaceRecognitionBackend + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("clens-face-engine".into())
        .spawn(move || {
            tracing::info!(backend = service.backend_name(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register {
                        image,
                        subject_id,
                        check_duplicate,
                        candidates,
                        reply,
                    } => {
                        let result =
                            service.register(&image, subject_id, check_duplicate, &candidates);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify {
                        image,
                        stored,
                        reply,
                    } => {
                        let result = service.verify(&image, &stored);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Scan {
                        probe,
                        candidates,
                        exclude,
                        reply,
                    } => {
                        let result = service.scan_duplicates(&probe, &candidates, exclude);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Build the service from `config` and spawn it with the configured queue depth.
///
/// Fails with [`FaceError::Unavailable`] when face recognition is disabled or
/// no backend was loaded.
pub fn spawn_from_config(
    config: &FaceConfig,
    backend: Option<Box<dyn FaceRecognitionBackend>>,
) -> Result<EngineHandle, FaceError> {
    let service = FaceService::from_config(config, backend)?;
    tracing::info!(
        backend = config.backend_id(),
        threshold = config.similarity_threshold.value(),
        queue_depth = config.engine_queue_depth,
        "starting face engine"
    );
    spawn_engine(service, config.engine_queue_depth).map_err(FaceError::EngineSpawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExtractError;
    use crate::cipher::{generate_key, TemplateCipher};
    use crate::types::MatchThreshold;

    struct Echo;

    impl FaceRecognitionBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn extract(&mut self, image: &[u8]) -> Result<Embedding, ExtractError> {
            serde_json::from_slice::<Vec<f64>>(image)
                .map(Embedding::new)
                .map_err(|_| ExtractError::NoFace)
        }
    }

    fn engine() -> EngineHandle {
        let cipher = TemplateCipher::from_config_key(&generate_key()).unwrap();
        spawn_engine(FaceService::new(Echo, cipher, MatchThreshold::default()), 4).unwrap()
    }

    #[tokio::test]
    async fn test_register_verify_round_trip() {
        let engine = engine();
        let template = engine
            .register(b"[0.6, 0.8]".to_vec(), SubjectId(1), true, Vec::new())
            .await
            .unwrap();

        let v = engine
            .verify(b"[0.6, 0.8]".to_vec(), Some(template.clone()))
            .await
            .unwrap();
        assert!(v.matched);

        let v = engine
            .verify(b"[-0.8, 0.6]".to_vec(), Some(template))
            .await
            .unwrap();
        assert!(!v.matched);
    }

    #[tokio::test]
    async fn test_duplicate_via_engine() {
        let engine = engine();
        let template = engine
            .register(b"[1.0, 0.0]".to_vec(), SubjectId(1), false, Vec::new())
            .await
            .unwrap();
        let candidates = vec![Candidate::new(1, template)];

        let hit = engine
            .scan_duplicates(Embedding::new(vec![1.0, 0.01]), candidates.clone(), None)
            .await
            .unwrap();
        assert_eq!(hit.unwrap().subject_id, SubjectId(1));

        let err = engine
            .register(b"[1.0, 0.0]".to_vec(), SubjectId(2), true, candidates)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FaceError::DuplicateFace {
                conflicting_subject_id: SubjectId(1)
            }
        ));
    }

    fn config(enabled: &str) -> FaceConfig {
        let key = generate_key();
        FaceConfig::from_lookup(|name| match name {
            "CLENS_ENCRYPTION_KEY" => Some(key.clone()),
            "CLENS_FACE_ENABLED" => Some(enabled.to_string()),
            "CLENS_FACE_QUEUE_DEPTH" => Some("1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_spawn_from_config() {
        let engine = spawn_from_config(&config("1"), Some(Box::new(Echo))).unwrap();
        let template = engine
            .register(b"[0.6, 0.8]".to_vec(), SubjectId(1), false, Vec::new())
            .await
            .unwrap();
        let v = engine.verify(b"[0.6, 0.8]".to_vec(), Some(template)).await.unwrap();
        assert!(v.matched);
    }

    #[test]
    fn test_spawn_from_config_disabled() {
        let err = spawn_from_config(&config("0"), Some(Box::new(Echo)))
            .err()
            .unwrap();
        assert!(matches!(err, FaceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_verify_without_template() {
        let engine = engine();
        let err = engine.verify(b"[1.0]".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, FaceError::NotRegistered));
    }

    #[tokio::test]
    async fn test_concurrent_handles() {
        let engine = engine();
        let mut tasks = Vec::new();
        for id in 0..8i64 {
            let handle = engine.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .register(b"[0.3, 0.4]".to_vec(), SubjectId(id), false, Vec::new())
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }
}
