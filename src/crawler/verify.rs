//! Structural verification and decoding of downloaded payloads

use crate::crawler::FetchError;
use crate::dedup::PerceptualSignature;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;

/// Decodes `bytes` after checking that they look like a well-formed image
///
/// The format is sniffed from the magic bytes and the header is parsed for
/// dimensions before any pixel data is touched; only then is the image decoded.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, FetchError> {
    let format = sniff_format(bytes)?;

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| FetchError::InvalidImage(format!("bad {:?} header: {}", format, e)))?;

    if width == 0 || height == 0 {
        return Err(FetchError::InvalidImage(format!(
            "zero-sized image ({}x{})",
            width, height
        )));
    }

    ImageReader::with_format(Cursor::new(bytes), format)
        .decode()
        .map_err(|e| FetchError::InvalidImage(e.to_string()))
}

/// Verifies a payload and computes its perceptual signature
///
/// CPU-bound; the pipeline runs it on the blocking thread pool.
pub fn verify_and_sign(bytes: &[u8]) -> Result<PerceptualSignature, FetchError> {
    let image = decode_image(bytes)?;
    Ok(PerceptualSignature::compute(&image))
}

fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, FetchError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FetchError::InvalidImage(e.to_string()))?;

    reader
        .format()
        .ok_or_else(|| FetchError::InvalidImage("unrecognized image format".to_string()))
}
