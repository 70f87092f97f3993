//! Startup reconstruction of the duplicate index from saved images
//!
//! Signatures are not persisted. Instead every `<hash>.jpg` already in the
//! image directory is decoded and signed again, so near-duplicate protection
//! covers images kept by earlier runs, not just this one.

use crate::crawler::verify::decode_image;
use crate::dedup::{ContentHash, DuplicateIndex, PerceptualSignature};
use crate::state::CheckpointState;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// What the rebuild found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Saved images re-signed and registered with both hash forms
    pub signed: usize,

    /// Accepted hashes registered without a signature (file missing or unreadable)
    pub hash_only: usize,

    /// Saved images that the checkpoint did not list yet
    pub reconciled: Vec<ContentHash>,
}

/// Rebuilds `index` from `image_dir` and reconciles `checkpoint` with it
///
/// A file present on disk but absent from the checkpoint means the process
/// stopped between writing the image and saving the checkpoint; the image is
/// kept and its hash added to `checkpoint`. The resume index is left alone.
pub fn rebuild_index(
    index: &DuplicateIndex,
    image_dir: &Path,
    checkpoint: &mut CheckpointState,
) -> std::io::Result<RebuildReport> {
    let stored = list_stored_images(image_dir)?;
    let on_disk: HashSet<ContentHash> = stored.iter().map(|(hash, _)| *hash).collect();

    let signed: Vec<(ContentHash, Option<PerceptualSignature>)> = stored
        .par_iter()
        .map(|(hash, path)| (*hash, sign_file(path)))
        .collect();

    let mut report = RebuildReport::default();

    for (hash, signature) in signed {
        match signature {
            Some(signature) => {
                index.register(hash, signature);
                report.signed += 1;
            }
            None => {
                tracing::warn!("Saved image {} could not be decoded; exact match only", hash);
                index.register_hash_only(hash);
                report.hash_only += 1;
            }
        }

        if checkpoint.record_acceptance(hash) {
            report.reconciled.push(hash);
        }
    }

    for hash in checkpoint.accepted_hashes() {
        if !on_disk.contains(hash) {
            tracing::debug!("Accepted image {} is no longer on disk", hash);
            index.register_hash_only(*hash);
            report.hash_only += 1;
        }
    }

    report.reconciled.sort();
    Ok(report)
}

/// Lists `<hash>.jpg` files directly inside `image_dir`
pub fn list_stored_images(image_dir: &Path) -> std::io::Result<Vec<(ContentHash, PathBuf)>> {
    let mut stored = Vec::new();

    for entry in std::fs::read_dir(image_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(hash) = name.to_str().and_then(ContentHash::from_file_name) {
            stored.push((hash, entry.path()));
        }
    }

    stored.sort();
    Ok(stored)
}

fn sign_file(path: &Path) -> Option<PerceptualSignature> {
    let bytes = std::fs::read(path).ok()?;
    let image = decode_image(&bytes).ok()?;
    Some(PerceptualSignature::compute(&image))
}
