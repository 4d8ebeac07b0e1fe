use crate::cipher::{CipherError, TemplateCipher};
use crate::codec::{self, CodecError};
use crate::types::{Embedding, EncryptedTemplate};
use thiserror::Error;

/// Failure turning an embedding into a template or back.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("template holds an empty embedding")]
    EmptyEmbedding,
}

/// Encode then encrypt an embedding for storage.
pub fn seal_embedding(
    cipher: &TemplateCipher,
    embedding: &Embedding,
) -> Result<EncryptedTemplate, TemplateError> {
    let text = codec::serialize(embedding)?;
    Ok(EncryptedTemplate::new(cipher.encrypt(&text)?))
}

/// Decrypt then decode a stored template.
pub fn open_template(
    cipher: &TemplateCipher,
    template: &EncryptedTemplate,
) -> Result<Embedding, TemplateError> {
    let text = cipher.decrypt(template.as_str())?;
    let embedding = codec::deserialize(&text)?;
    if embedding.dim() == 0 {
        return Err(TemplateError::EmptyEmbedding);
    }
    Ok(embedding)
}
