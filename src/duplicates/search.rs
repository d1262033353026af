//! All-pairs neighbor search over stored fingerprints.

use rayon::prelude::*;
use std::collections::BTreeMap;

use super::discovery::{Fingerprint, NeighborMap, NeighborSearch};
use super::{ContentHash, Method};
use crate::error::{Error, Result};

/// Compares every pair of encodings directly.
///
/// Hash methods score by Hamming distance between hex strings, `cnn` by
/// cosine similarity. Each pair is scored once and reported from both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExhaustiveSearch;

impl NeighborSearch for ExhaustiveSearch {
    fn find_neighbors(
        &self,
        method: Method,
        encodings: &BTreeMap<ContentHash, Fingerprint>,
        threshold: f64,
    ) -> Result<NeighborMap> {
        let entries: Vec<(&ContentHash, &Fingerprint)> = encodings.iter().collect();

        let found: Vec<Vec<(usize, usize, f64)>> = (0..entries.len())
            .into_par_iter()
            .map(|i| -> Result<Vec<(usize, usize, f64)>> {
                let mut hits = Vec::new();
                for j in (i + 1)..entries.len() {
                    let score = pair_score(method, entries[i], entries[j])?;
                    if method.accepts(score, threshold) {
                        hits.push((i, j, score));
                    }
                }
                Ok(hits)
            })
            .collect::<Result<_>>()?;

        let mut neighbors: NeighborMap = BTreeMap::new();
        for (i, j, score) in found.into_iter().flatten() {
            let (a, b) = (entries[i].0, entries[j].0);
            neighbors.entry(a.clone()).or_default().push((b.clone(), score));
            neighbors.entry(b.clone()).or_default().push((a.clone(), score));
        }
        Ok(neighbors)
    }
}

fn pair_score(
    method: Method,
    (ha, fa): (&ContentHash, &Fingerprint),
    (hb, fb): (&ContentHash, &Fingerprint),
) -> Result<f64> {
    let invalid = |hash: &ContentHash, reason: String| Error::Fingerprint {
        method,
        hash: hash.clone(),
        reason,
    };
    match (method.is_similarity(), fa, fb) {
        (false, Fingerprint::Hash(a), Fingerprint::Hash(b)) => {
            if a.len() != b.len() {
                return Err(invalid(
                    hb,
                    format!("hash length {} does not match {} of {}", b.len(), a.len(), ha),
                ));
            }
            Ok(hamming_distance(a, b).map_err(|reason| invalid(ha, reason))? as f64)
        }
        (true, Fingerprint::Embedding(a), Fingerprint::Embedding(b)) => {
            if a.len() != b.len() {
                return Err(invalid(
                    hb,
                    format!("embedding length {} does not match {} of {}", b.len(), a.len(), ha),
                ));
            }
            Ok(cosine_similarity(a, b) as f64)
        }
        (true, Fingerprint::Hash(_), _) | (false, Fingerprint::Embedding(_), _) => {
            Err(invalid(ha, "wrong fingerprint kind for this method".to_string()))
        }
        _ => Err(invalid(hb, "wrong fingerprint kind for this method".to_string())),
    }
}

/// Number of differing bits between two equal-length hex strings.
fn hamming_distance(a: &str, b: &str) -> std::result::Result<u32, String> {
    a.chars()
        .zip(b.chars())
        .map(|(x, y)| match (x.to_digit(16), y.to_digit(16)) {
            (Some(x), Some(y)) => Ok((x ^ y).count_ones()),
            _ => Err(format!("non-hex digit in {:?} or {:?}", a, b)),
        })
        .sum()
}

/// Calculate cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::tests::hash;

    fn hashes(rows: &[(&str, &str)]) -> BTreeMap<ContentHash, Fingerprint> {
        rows.iter()
            .map(|(h, fp)| (hash(h), Fingerprint::Hash(fp.to_string())))
            .collect()
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance("00", "00"), Ok(0));
        assert_eq!(hamming_distance("0f", "00"), Ok(4));
        assert_eq!(hamming_distance("ff", "00"), Ok(8));
        assert!(hamming_distance("zz", "00").is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - (-1.0)).abs() < 0.0001);
    }

    #[test]
    fn test_neighbors_are_symmetric() {
        let encodings = hashes(&[("aaa", "f0"), ("bbb", "f1"), ("ccc", "0f")]);
        let found = ExhaustiveSearch.find_neighbors(Method::Diff, &encodings, 2.0).unwrap();
        assert_eq!(found[&hash("aaa")], vec![(hash("bbb"), 1.0)]);
        assert_eq!(found[&hash("bbb")], vec![(hash("aaa"), 1.0)]);
        assert!(!found.contains_key(&hash("ccc")));
    }

    #[test]
    fn test_cnn_uses_similarity_threshold() {
        let encodings: BTreeMap<ContentHash, Fingerprint> = [
            (hash("aaa"), Fingerprint::Embedding(vec![1.0, 0.0])),
            (hash("bbb"), Fingerprint::Embedding(vec![1.0, 0.1])),
            (hash("ccc"), Fingerprint::Embedding(vec![0.0, 1.0])),
        ]
        .into_iter()
        .collect();
        let found = ExhaustiveSearch.find_neighbors(Method::Cnn, &encodings, 0.95).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&hash("aaa")][0].0, hash("bbb"));
        assert!(found[&hash("aaa")][0].1 >= 0.95);
    }

    #[test]
    fn test_mismatched_fingerprints_fail() {
        let encodings = hashes(&[("aaa", "f0"), ("bbb", "f0f0")]);
        let err = ExhaustiveSearch.find_neighbors(Method::Percept, &encodings, 4.0).unwrap_err();
        assert!(matches!(err, Error::Fingerprint { .. }));

        let encodings = hashes(&[("aaa", "f0"), ("bbb", "f1")]);
        assert!(ExhaustiveSearch.find_neighbors(Method::Cnn, &encodings, 0.9).is_err());
    }
}
