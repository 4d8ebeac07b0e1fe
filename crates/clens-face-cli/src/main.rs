use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clens_face_core::{
    cipher, codec, find_duplicate, similarity, Candidate, EncryptedTemplate, FaceConfig,
    SubjectId, TemplateCipher,
};

#[derive(Parser)]
#[command(name = "clens-face", about = "clens face template tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new encryption key for CLENS_ENCRYPTION_KEY
    GenKey,
    /// Report whether the configured key is a proper key or a padded fallback
    KeyStatus,
    /// Encrypt an embedding (JSON array of numbers) into a storage template
    Seal {
        /// Path to the embedding JSON file
        embedding: PathBuf,
    },
    /// Decrypt a stored template and print its embedding
    Open {
        /// Template text as stored in the student record
        template: String,
    },
    /// Similarity score between two embedding files
    Similarity { a: PathBuf, b: PathBuf },
    /// Check a probe embedding against stored templates
    Scan {
        /// Path to the probe embedding JSON file
        probe: PathBuf,
        /// Path to a JSON array of {"subject_id": .., "template": ..}
        candidates: PathBuf,
        /// Subject to leave out of the scan
        #[arg(long)]
        exclude: Option<i64>,
    },
    /// Show effective configuration
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::GenKey => {
            println!("{}", cipher::generate_key());
        }
        Commands::KeyStatus => {
            let (_, cipher) = load_cipher()?;
            let status = serde_json::json!({
                "source": format!("{:?}", cipher.key_source()),
                "fingerprint": cipher.key_fingerprint(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Seal { embedding } => {
            let (_, cipher) = load_cipher()?;
            let embedding = load_embedding(&embedding)?;
            let template = clens_face_core::seal_embedding(&cipher, &embedding)
                .context("failed to seal embedding")?;
            println!("{}", template.as_str());
        }
        Commands::Open { template } => {
            let (_, cipher) = load_cipher()?;
            let template = EncryptedTemplate::new(template.trim());
            let embedding = clens_face_core::open_template(&cipher, &template)
                .context("template is unreadable with the configured key")?;
            let issued_at = cipher.issued_at(template.as_str())?;
            let out = serde_json::json!({
                "issued_at": issued_at.to_rfc3339(),
                "dim": embedding.dim(),
                "embedding": embedding.values,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Similarity { a, b } => {
            let threshold = FaceConfig::threshold_from_env()?;
            let a = load_embedding(&a)?;
            let b = load_embedding(&b)?;
            let score = similarity(&a, &b)?;
            let out = serde_json::json!({
                "similarity": score.value(),
                "threshold": threshold.value(),
                "is_match": clens_face_core::is_match(score, threshold),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Scan {
            probe,
            candidates,
            exclude,
        } => {
            let (config, cipher) = load_cipher()?;
            let probe = load_embedding(&probe)?;
            let candidates = load_candidates(&candidates)?;
            let hit = find_duplicate(
                &cipher,
                &probe,
                &candidates,
                exclude.map(SubjectId),
                config.similarity_threshold,
            );
            let out = serde_json::json!({
                "found": hit.is_some(),
                "subject_id": hit.map(|h| h.subject_id),
                "similarity": hit.map(|h| h.score.value()),
                "scanned": candidates.len(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Status => {
            let config = FaceConfig::from_env()?;
            let out = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "face_enabled": config.face_enabled,
                "backend": config.backend_id(),
                "similarity_threshold": config.similarity_threshold.value(),
                "max_image_bytes": config.max_image_bytes,
                "engine_queue_depth": config.engine_queue_depth,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

fn load_cipher() -> Result<(FaceConfig, TemplateCipher)> {
    let config = FaceConfig::from_env()?;
    let cipher = TemplateCipher::from_config_key(&config.encryption_key)?;
    Ok((config, cipher))
}

fn load_embedding(path: &Path) -> Result<clens_face_core::Embedding> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    codec::deserialize(&text).with_context(|| format!("{} is not an embedding", path.display()))
}

fn load_candidates(path: &Path) -> Result<Vec<Candidate>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_candidates(&text).with_context(|| format!("invalid candidates file {}", path.display()))
}

fn parse_candidates(text: &str) -> Result<Vec<Candidate>> {
    Ok(serde_json::from_str(text)?)
}
