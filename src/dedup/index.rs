//! Live duplicate index shared by all pipeline workers

use crate::dedup::{ContentHash, PerceptualSignature};
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Why a payload was judged a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// Byte-identical to an accepted image
    Exact,
    /// Perceptually within the threshold of an accepted image
    Near { distance: u32 },
}

#[derive(Debug, Default)]
struct IndexInner {
    hashes: HashSet<ContentHash>,
    signatures: Vec<PerceptualSignature>,
}

/// In-memory record of every image accepted in this run
///
/// Holds the exact-match hash set and the perceptual signatures behind one
/// reader-writer lock, so a registration is never half-visible. Near-duplicate
/// lookups scan every stored signature; that linear scan is the scaling limit
/// once the corpus reaches the hundreds of thousands.
#[derive(Debug)]
pub struct DuplicateIndex {
    threshold: u32,
    inner: RwLock<IndexInner>,
}

impl DuplicateIndex {
    /// Creates an empty index
    ///
    /// # Arguments
    ///
    /// * `threshold` - Signatures differing by fewer bits than this are near-duplicates
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            inner: RwLock::new(IndexInner::default()),
        }
    }

    pub fn is_exact_duplicate(&self, hash: &ContentHash) -> bool {
        self.read().hashes.contains(hash)
    }

    pub fn is_near_duplicate(&self, signature: &PerceptualSignature) -> bool {
        self.closest_within_threshold(&self.read(), signature).is_some()
    }

    /// Runs both duplicate checks under a single read lock
    ///
    /// Exact matches win over near matches.
    pub fn check(
        &self,
        hash: &ContentHash,
        signature: &PerceptualSignature,
    ) -> Option<DuplicateKind> {
        let inner = self.read();
        if inner.hashes.contains(hash) {
            return Some(DuplicateKind::Exact);
        }
        self.closest_within_threshold(&inner, signature)
            .map(|distance| DuplicateKind::Near { distance })
    }

    /// Adds an accepted image to both stores at once
    pub fn register(&self, hash: ContentHash, signature: PerceptualSignature) {
        let mut inner = self.write();
        inner.hashes.insert(hash);
        inner.signatures.push(signature);
    }

    /// Adds a hash whose image is no longer available for signing
    pub fn register_hash_only(&self, hash: ContentHash) {
        self.write().hashes.insert(hash);
    }

    /// Number of exact hashes held
    pub fn len(&self) -> usize {
        self.read().hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signature_count(&self) -> usize {
        self.read().signatures.len()
    }

    fn closest_within_threshold(
        &self,
        inner: &IndexInner,
        signature: &PerceptualSignature,
    ) -> Option<u32> {
        inner
            .signatures
            .iter()
            .map(|stored| stored.distance(signature))
            .filter(|distance| *distance < self.threshold)
            .min()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
