//! Batch discovery: neighbor search per method, pair extraction, registry update.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use super::candidates::extract_pairs;
use super::sensitivity::{self, Sensitivities};
use super::{ContentHash, Duplicates, Method, PairScores};
use crate::error::Result;

/// Fingerprint of one image under one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fingerprint {
    /// Hex-encoded perceptual hash (percept, average, diff, wavelet)
    Hash(String),
    /// Embedding vector (cnn)
    Embedding(Vec<f32>),
}

/// `{method: {hash: fingerprint}}`
pub type EncodingMap = BTreeMap<Method, BTreeMap<ContentHash, Fingerprint>>;

/// Neighbors found for each hash, with their scores.
pub type NeighborMap = BTreeMap<ContentHash, Vec<(ContentHash, f64)>>;

/// Nearest-neighbor search over the encodings of one method.
///
/// Implementations must be symmetric: if `b` is reported for `a` with some
/// score, `a` is reported for `b` with the same score.
pub trait NeighborSearch {
    fn find_neighbors(
        &self,
        method: Method,
        encodings: &BTreeMap<ContentHash, Fingerprint>,
        threshold: f64,
    ) -> Result<NeighborMap>;
}

impl Duplicates {
    /// Run a full discovery pass and fold every surviving pair into the registry.
    ///
    /// Methods are processed in `Method::ALL` order; a method whose regular
    /// threshold is negative is skipped. Pairs are applied to a staged copy
    /// that replaces `self` only once everything succeeded.
    ///
    /// Returns the number of newly grouped hashes.
    pub fn find_duplicates<S>(
        &mut self,
        encodings: &EncodingMap,
        animated: &BTreeSet<ContentHash>,
        regular: &Sensitivities,
        animated_sensitivity: &Sensitivities,
        search: &S,
    ) -> Result<usize>
    where
        S: NeighborSearch + ?Sized,
    {
        sensitivity::validate(regular, animated_sensitivity)?;

        info!("Searching for perceptual duplicates in database...");
        let no_encodings = BTreeMap::new();
        let mut candidates: Vec<(Method, PairScores)> = Vec::with_capacity(Method::ALL.len());
        for method in Method::ALL {
            if !regular.is_enabled(method) {
                warn!("Duplicate method {} disabled: SKIP", method);
                continue;
            }
            let threshold = regular.get(method);
            if method.is_similarity() {
                info!(
                    "Computing diffs using {}, with threshold >={:.2} and animated >={:.2}",
                    method,
                    threshold,
                    animated_sensitivity.get(method)
                );
            } else {
                info!(
                    "Computing diffs using {}, with regular threshold <={} and animated <={}",
                    method,
                    threshold,
                    animated_sensitivity.get(method)
                );
            }
            let method_encodings = encodings.get(&method).unwrap_or(&no_encodings);
            let neighbors = search.find_neighbors(method, method_encodings, threshold)?;
            let pairs = extract_pairs(method, &neighbors, animated, animated_sensitivity.get(method))?;
            candidates.push((method, pairs));
        }

        let mut staged = self.clone();
        let mut new_hashes = 0;
        for (method, pairs) in candidates {
            for (pair, score) in pairs {
                new_hashes += staged.add_duplicate_pair(pair.lo(), pair.hi(), score, method)?;
            }
        }
        *self = staged;

        info!(
            "Found {} new perceptual duplicate individual images; \
             currently {} images are marked as duplicates, lumped in {} groups",
            new_hashes,
            self.hash_count(),
            self.group_count()
        );
        Ok(new_hashes)
    }
}
