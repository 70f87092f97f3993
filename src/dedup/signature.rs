//! Perceptual signatures for near-duplicate detection

use image::imageops::{self, FilterType};
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Side length of the grayscale thumbnail a signature is computed from
pub const SIGNATURE_SOURCE_SIZE: u32 = 64;

/// Bytes in a signature (8x8 bits)
pub const SIGNATURE_BYTES: usize = 8;

/// A 64-bit DCT hash of an image's normalized luminance
///
/// Each bit records whether a low-frequency coefficient lies above the
/// median, which is the classic pHash construction. Two signatures are
/// compared by the number of differing bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PerceptualSignature(ImageHash);

impl PerceptualSignature {
    /// Computes the signature of a decoded image
    pub fn compute(image: &DynamicImage) -> Self {
        let luma = image.to_luma8();
        let thumbnail = imageops::resize(
            &luma,
            SIGNATURE_SOURCE_SIZE,
            SIGNATURE_SOURCE_SIZE,
            FilterType::Lanczos3,
        );

        let hasher = HasherConfig::new()
            .hash_size(8, 8)
            .hash_alg(HashAlg::Median)
            .preproc_dct()
            .to_hasher();

        Self(hasher.hash_image(&DynamicImage::ImageLuma8(thumbnail)))
    }

    /// Rebuilds a signature from its raw bits
    ///
    /// Returns `None` unless exactly [`SIGNATURE_BYTES`] bytes are given.
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SIGNATURE_BYTES {
            return None;
        }
        ImageHash::from_bytes(bytes).ok().map(Self)
    }

    /// Number of differing bits between two signatures
    pub fn distance(&self, other: &Self) -> u32 {
        self.0.dist(&other.0)
    }
}
