//! Turning raw neighbor lists into canonical scored pairs for one method.

use std::collections::BTreeSet;
use tracing::{debug, error};

use super::discovery::NeighborMap;
use super::{ContentHash, Method, PairKey, PairScores};
use crate::error::{Error, Result};

/// Turn raw neighbor lists for one method into canonical scored pairs.
///
/// Both directions of a pair must carry the same score. Pairs touching an
/// animated hash must also clear `animated_threshold`, not just the regular
/// one the search ran with.
pub fn extract_pairs(
    method: Method,
    neighbors: &NeighborMap,
    animated: &BTreeSet<ContentHash>,
    animated_threshold: f64,
) -> Result<PairScores> {
    let mut scored = PairScores::new();
    for (hash, found) in neighbors {
        for (neighbor, score) in found {
            if neighbor == hash {
                continue;
            }
            let pair = PairKey::new(hash.clone(), neighbor.clone());
            if let Some(&old) = scored.get(&pair) {
                if old != *score {
                    error!(
                        "Duplicate collision, method {}, pair {}: new score {} versus {}",
                        method, pair, score, old
                    );
                    return Err(Error::ScoreCollision {
                        method,
                        a: pair.lo().clone(),
                        b: pair.hi().clone(),
                        new: *score,
                        old,
                    });
                }
                continue;
            }
            scored.insert(pair, *score);
        }
    }

    let before = scored.len();
    scored.retain(|pair, score| {
        let is_animated = animated.contains(pair.lo()) || animated.contains(pair.hi());
        !is_animated || method.accepts(*score, animated_threshold)
    });
    if scored.len() < before {
        debug!(
            "Method {}: dropped {} animated pair(s) over the animated threshold {}",
            method,
            before - scored.len(),
            animated_threshold
        );
    }
    Ok(scored)
}
