//! Decoding of uploaded face images.
//!
//! Clients send base64 text, optionally as a `data:image/...;base64,` URL.
//! Backends that want pixels can use [`load_rgb`], which honours EXIF
//! orientation so phone photos arrive upright.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// Default upload limit (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ImageInputError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode base64 image text into raw bytes, enforcing `max_bytes`.
pub fn decode_base64_image(payload: &str, max_bytes: usize) -> Result<Vec<u8>, ImageInputError> {
    let body = match payload.split_once(',') {
        Some((prefix, body)) if prefix.starts_with("data:") => body,
        _ => payload,
    };
    let body: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if body.is_empty() {
        return Err(ImageInputError::Empty);
    }

    // Cheap bound before allocating the decoded buffer.
    let estimated = body.len() / 4 * 3;
    if estimated > max_bytes.saturating_add(2) {
        return Err(ImageInputError::TooLarge {
            size: estimated,
            limit: max_bytes,
        });
    }

    let bytes = STANDARD.decode(body.as_bytes())?;
    if bytes.len() > max_bytes {
        return Err(ImageInputError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Decode image bytes to RGB8 with EXIF orientation applied.
pub fn load_rgb(bytes: &[u8]) -> Result<RgbImage, ImageInputError> {
    if bytes.is_empty() {
        return Err(ImageInputError::Empty);
    }
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img.to_rgb8())
}
