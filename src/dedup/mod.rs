//! Duplicate detection
//!
//! Two duplicate classes are recognised:
//! - exact duplicates, identified by the MD5 content hash of the raw bytes
//! - near duplicates, identified by perceptual signatures closer than a threshold
//!
//! The [`DuplicateIndex`] holds both for the current run and is rebuilt from
//! the image directory at startup by [`rebuild_index`].

mod hash;
mod index;
mod rebuild;
mod signature;

pub use hash::{ContentHash, InvalidContentHash, IMAGE_EXTENSION};
pub use index::{DuplicateIndex, DuplicateKind};
pub use rebuild::{list_stored_images, rebuild_index, RebuildReport};
pub use signature::{PerceptualSignature, SIGNATURE_BYTES, SIGNATURE_SOURCE_SIZE};
