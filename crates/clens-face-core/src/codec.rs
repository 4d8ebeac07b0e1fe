//! Embedding codec: JSON numeric array text.
//!
//! `serde_json` is built with `float_roundtrip`, so every finite `f64`
//! survives `deserialize(serialize(x))` bit-for-bit.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("embedding value at index {index} is not finite")]
    NonFinite { index: usize },
    #[error("malformed embedding: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode an embedding as a JSON array of numbers.
pub fn serialize(embedding: &Embedding) -> Result<String, CodecError> {
    // serde_json writes NaN/inf as `null`, which would not round-trip.
    if let Some(index) = embedding.first_non_finite() {
        return Err(CodecError::NonFinite { index });
    }
    Ok(serde_json::to_string(&embedding.values)?)
}

/// Decode a JSON array of numbers back into an embedding.
pub fn deserialize(data: &str) -> Result<Embedding, CodecError> {
    let values: Vec<f64> = serde_json::from_str(data)?;
    Ok(Embedding::new(values))
}
