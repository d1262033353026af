//! Mutations of the duplicate registry: pair ingestion, member removal and purges.
//!
//! Every operation validates what it needs before touching the registry, so
//! an error leaves both the registry and the key index as they were.

use std::collections::BTreeSet;
use tracing::{debug, error, info};

use super::{ContentHash, DuplicateGroup, DuplicateKey, Duplicates, Method, PairKey, Verdict};
use crate::error::{Error, Result};

/// Outcome of a bulk purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Groups removed entirely
    pub groups_deleted: usize,
    /// Individual hash entries removed, including those of fully deleted groups
    pub hashes_removed: usize,
}

impl Duplicates {
    /// Fold one scored pair into the registry.
    ///
    /// Creates a group, extends one, or merges two, depending on how many
    /// existing groups the pair touches. A merge resets every verdict in the
    /// combined group to `new`.
    ///
    /// Returns the number of hashes that were not grouped before this call.
    pub fn add_duplicate_pair(
        &mut self,
        h1: &ContentHash,
        h2: &ContentHash,
        score: f64,
        method: Method,
    ) -> Result<usize> {
        if h1 == h2 {
            error!("Refusing to pair {} with itself (method {})", h1, method);
            return Err(Error::SelfPair(h1.clone()));
        }
        let pair = PairKey::new(h1.clone(), h2.clone());
        let mut touched: BTreeSet<DuplicateKey> =
            [h1, h2].into_iter().filter_map(|h| self.index().get(h).cloned()).collect();
        for key in &touched {
            if !self.registry().contains_key(key) {
                error!("Index points {} to missing group {}", pair, key);
                return Err(Error::Inconsistent(format!("index points to missing group {}", key)));
            }
        }

        let (new_key, added) = match touched.len() {
            0 => {
                let new_key = DuplicateKey::from_hashes([h1.clone(), h2.clone()]);
                let mut group = DuplicateGroup::default();
                group.verdicts.insert(h1.clone(), Verdict::New);
                group.verdicts.insert(h2.clone(), Verdict::New);
                group.record_score(method, pair, score);
                debug!("New duplicate group {} from {} score {}", new_key, method, score);
                self.registry_mut().insert(new_key.clone(), group);
                (new_key, 2)
            }
            1 => {
                let old_key = touched.pop_first().ok_or_else(|| {
                    Error::Inconsistent("touched group set emptied unexpectedly".to_string())
                })?;
                let new_key = DuplicateKey::from_hashes(
                    old_key.iter().cloned().chain([h1.clone(), h2.clone()]),
                );
                let diff = new_key.difference(&old_key);
                match diff.as_slice() {
                    [] => {
                        if let Some(group) = self.registry_mut().get_mut(&old_key) {
                            group.record_score(method, pair, score);
                        }
                        (old_key, 0)
                    }
                    [incoming] => {
                        let mut group = self.registry_mut().remove(&old_key).unwrap_or_default();
                        group.verdicts.insert(incoming.clone(), Verdict::New);
                        group.record_score(method, pair, score);
                        debug!("Duplicate group {} grows to {} with {}", old_key, new_key, incoming);
                        self.registry_mut().insert(new_key.clone(), group);
                        (new_key, 1)
                    }
                    extra => {
                        error!(
                            "Hashes {:?} remained where none should be: pair {}, method {}, group {}",
                            extra, pair, method, old_key
                        );
                        return Err(Error::UnexpectedNewMembers {
                            h1: h1.clone(),
                            h2: h2.clone(),
                            key: old_key,
                            extra: extra.to_vec(),
                        });
                    }
                }
            }
            2 => {
                let mut keys = touched.into_iter();
                let (k1, k2) = match (keys.next(), keys.next()) {
                    (Some(k1), Some(k2)) => (k1, k2),
                    _ => {
                        return Err(Error::Inconsistent("touched group set shrank unexpectedly".to_string()))
                    }
                };
                let union = DuplicateKey::from_hashes(k1.iter().chain(k2.iter()).cloned());
                let new_key = DuplicateKey::from_hashes(
                    union.iter().cloned().chain([h1.clone(), h2.clone()]),
                );
                if new_key != union {
                    error!(
                        "Merging {} and {} through {} (method {}) still had inserted hashes {:?}",
                        k1,
                        k2,
                        pair,
                        method,
                        new_key.difference(&union)
                    );
                    return Err(Error::MergeMismatch {
                        h1: h1.clone(),
                        h2: h2.clone(),
                        k1,
                        k2,
                    });
                }

                let mut merged = DuplicateGroup {
                    sources: Default::default(),
                    verdicts: new_key.iter().map(|h| (h.clone(), Verdict::New)).collect(),
                };
                for old_key in [&k1, &k2] {
                    if let Some(old) = self.registry_mut().remove(old_key) {
                        for (old_method, scores) in old.sources {
                            merged.sources.entry(old_method).or_default().extend(scores);
                        }
                    }
                }
                merged.record_score(method, pair, score);
                info!(
                    "Merged duplicate groups {} and {} into {} via {}; verdicts reset to new",
                    k1, k2, new_key, method
                );
                self.registry_mut().insert(new_key.clone(), merged);
                (new_key, 0)
            }
            count => {
                error!("Pair {} (method {}) touched {} groups", pair, method, count);
                return Err(Error::TooManyGroups {
                    h1: h1.clone(),
                    h2: h2.clone(),
                    count,
                });
            }
        };

        for hash in &new_key {
            self.index_mut().insert(hash.clone(), new_key.clone());
        }
        Ok(added)
    }

    /// Remove a hash whose underlying image was deleted from the collection.
    ///
    /// Surviving `keep`/`skip` verdicts are reset to `new`; `false` and `new`
    /// verdicts stay as they are.
    ///
    /// Returns true if the group collapsed and was deleted entirely.
    pub fn trim_deleted_blob(&mut self, hash: &ContentHash) -> Result<bool> {
        let Some(old_key) = self.index().get(hash).cloned() else {
            return Ok(false);
        };
        if !old_key.contains(hash) || !self.registry().contains_key(&old_key) {
            error!("Index entry of {} points to {}, which does not hold it", hash, old_key);
            return Err(Error::Inconsistent(format!("index entry of {} points to {}", hash, old_key)));
        }
        let remaining = old_key.without(hash);
        match remaining.len() {
            0 => {
                error!("Found duplicate group {} with less than 2 members while removing {}", old_key, hash);
                Err(Error::UndersizedGroup {
                    key: old_key,
                    hash: hash.clone(),
                })
            }
            1 => {
                self.registry_mut().remove(&old_key);
                self.index_mut().remove(hash);
                for last in &remaining {
                    self.index_mut().remove(last);
                }
                info!("Deleted duplicate group {}", old_key);
                Ok(true)
            }
            _ => {
                let mut group = self.registry_mut().remove(&old_key).unwrap_or_default();
                group.remove_member(hash);
                for verdict in group.verdicts.values_mut() {
                    if matches!(verdict, Verdict::Keep | Verdict::Skip) {
                        *verdict = Verdict::New;
                    }
                }
                self.index_mut().remove(hash);
                for member in &remaining {
                    self.index_mut().insert(member.clone(), remaining.clone());
                }
                debug!("Duplicate group {} shrinks to {}", old_key, remaining);
                self.registry_mut().insert(remaining, group);
                Ok(false)
            }
        }
    }

    /// Remove every member still marked `new`, keeping reviewed members as they are.
    ///
    /// Groups left with fewer than two members are deleted entirely.
    pub fn delete_pending_duplicates(&mut self) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        let registry = std::mem::take(self.registry_mut());
        for (old_key, mut group) in registry {
            let pending: Vec<ContentHash> = group
                .verdicts
                .iter()
                .filter(|(_, verdict)| **verdict == Verdict::New)
                .map(|(hash, _)| hash.clone())
                .collect();
            if pending.is_empty() {
                self.registry_mut().insert(old_key, group);
                continue;
            }
            for hash in &pending {
                group.remove_member(hash);
                self.index_mut().remove(hash);
            }
            let remaining = DuplicateKey::from_hashes(group.verdicts.keys().cloned());
            if remaining.len() < 2 {
                for hash in &remaining {
                    self.index_mut().remove(hash);
                }
                debug!("Deleted pending duplicate group {}", old_key);
                summary.groups_deleted += 1;
                summary.hashes_removed += old_key.len();
            } else {
                for hash in &remaining {
                    self.index_mut().insert(hash.clone(), remaining.clone());
                }
                debug!("Pending duplicate group {} shrinks to {}", old_key, remaining);
                summary.hashes_removed += pending.len();
                self.registry_mut().insert(remaining, group);
            }
        }
        info!(
            "Deleted {} pending duplicate entries; {} groups removed entirely",
            summary.hashes_removed, summary.groups_deleted
        );
        summary
    }

    /// Drop every group and index entry.
    pub fn delete_all_duplicates(&mut self) -> PurgeSummary {
        let summary = PurgeSummary {
            groups_deleted: self.registry().len(),
            hashes_removed: self.registry().keys().map(DuplicateKey::len).sum(),
        };
        self.registry_mut().clear();
        self.index_mut().clear();
        info!(
            "Deleted all {} duplicate groups ({} entries)",
            summary.groups_deleted, summary.hashes_removed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::tests::{fixture, hash, key};
    use crate::duplicates::Verdict::{False, Keep, New, Skip};

    fn four_groups() -> Duplicates {
        fixture(vec![
            (vec!["aaa", "bbb"], vec![Keep, Skip]),
            (
                vec!["ccc", "ddd", "eee", "fff", "ggg", "hhh"],
                vec![New, New, New, New, New, New],
            ),
            (vec!["iii", "jjj", "kkk"], vec![New, False, Keep]),
            (vec!["xxx", "yyy"], vec![New, New]),
        ])
    }

    #[test]
    fn test_create_then_extend_method() {
        let mut dups = Duplicates::new();
        let added = dups.add_duplicate_pair(&hash("aaa"), &hash("bbb"), 4.0, Method::Wavelet).unwrap();
        assert_eq!(added, 2);
        let k = key(&["aaa", "bbb"]);
        assert_eq!(dups.registry().len(), 1);
        let group = &dups.registry()[&k];
        assert_eq!(group.verdicts[&hash("aaa")], New);
        assert_eq!(group.verdicts[&hash("bbb")], New);

        let added = dups.add_duplicate_pair(&hash("aaa"), &hash("bbb"), 4.0, Method::Percept).unwrap();
        assert_eq!(added, 0);
        let group = &dups.registry()[&k];
        assert_eq!(group.verdicts.len(), 2);
        let pair = PairKey::new(hash("aaa"), hash("bbb"));
        assert_eq!(group.sources[&Method::Wavelet][&pair], 4.0);
        assert_eq!(group.sources[&Method::Percept][&pair], 4.0);
        assert_eq!(dups.index()[&hash("bbb")], k);
        dups.check_consistency().unwrap();
    }

    #[test]
    fn test_extend_keeps_existing_verdicts() {
        let mut dups = fixture(vec![(vec!["aaa", "bbb"], vec![Keep, Skip])]);
        let added = dups.add_duplicate_pair(&hash("ccc"), &hash("bbb"), 2.0, Method::Diff).unwrap();
        assert_eq!(added, 1);
        assert!(!dups.registry().contains_key(&key(&["aaa", "bbb"])));
        let group = &dups.registry()[&key(&["aaa", "bbb", "ccc"])];
        assert_eq!(group.verdicts[&hash("aaa")], Keep);
        assert_eq!(group.verdicts[&hash("bbb")], Skip);
        assert_eq!(group.verdicts[&hash("ccc")], New);
        assert_eq!(group.sources[&Method::Diff][&PairKey::new(hash("bbb"), hash("ccc"))], 2.0);
        assert_eq!(dups.index()[&hash("aaa")], key(&["aaa", "bbb", "ccc"]));
        dups.check_consistency().unwrap();
    }

    #[test]
    fn test_merge_resets_verdicts() {
        let mut dups = fixture(vec![
            (vec!["ccc", "ddd", "eee"], vec![New, False, Keep]),
            (vec!["ggg", "hhh"], vec![Skip, Keep]),
        ]);
        let added = dups.add_duplicate_pair(&hash("ddd"), &hash("ggg"), 0.93, Method::Cnn).unwrap();
        assert_eq!(added, 0);
        assert_eq!(dups.registry().len(), 1);
        let k = key(&["ccc", "ddd", "eee", "ggg", "hhh"]);
        let group = &dups.registry()[&k];
        assert_eq!(group.verdicts.len(), 5);
        assert!(group.verdicts.values().all(|v| *v == New));
        // scores from both sides survive, plus the linking one
        let percept = &group.sources[&Method::Percept];
        assert!(percept.contains_key(&PairKey::new(hash("ccc"), hash("ddd"))));
        assert!(percept.contains_key(&PairKey::new(hash("ggg"), hash("hhh"))));
        assert_eq!(group.sources[&Method::Cnn][&PairKey::new(hash("ddd"), hash("ggg"))], 0.93);
        for h in ["ccc", "ddd", "eee", "ggg", "hhh"] {
            assert_eq!(dups.index()[&hash(h)], k);
        }
        dups.check_consistency().unwrap();
    }

    #[test]
    fn test_self_pair_rejected() {
        let mut dups = Duplicates::new();
        assert!(matches!(
            dups.add_duplicate_pair(&hash("aaa"), &hash("aaa"), 0.0, Method::Diff),
            Err(Error::SelfPair(_))
        ));
        assert!(dups.is_empty());
    }

    #[test]
    fn test_stale_index_fails_without_mutation() {
        let mut dups = fixture(vec![(vec!["bbb", "ccc"], vec![Keep, Skip])]);
        dups.index_mut().insert(hash("aaa"), key(&["bbb", "ccc"]));
        let before = dups.clone();
        let err = dups
            .add_duplicate_pair(&hash("aaa"), &hash("zzz"), 1.0, Method::Average)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedNewMembers { .. }));
        assert_eq!(dups, before);
    }

    #[test]
    fn test_merge_mismatch_fails_without_mutation() {
        let mut dups = fixture(vec![
            (vec!["bbb", "ccc"], vec![New, New]),
            (vec!["xxx", "yyy"], vec![New, New]),
        ]);
        dups.index_mut().insert(hash("aaa"), key(&["bbb", "ccc"]));
        let before = dups.clone();
        let err = dups
            .add_duplicate_pair(&hash("aaa"), &hash("xxx"), 1.0, Method::Average)
            .unwrap_err();
        assert!(matches!(err, Error::MergeMismatch { .. }));
        assert_eq!(dups, before);
    }

    #[test]
    fn test_missing_group_fails_without_mutation() {
        let mut dups = Duplicates::new();
        dups.index_mut().insert(hash("aaa"), key(&["aaa", "bbb"]));
        let before = dups.clone();
        assert!(dups.add_duplicate_pair(&hash("aaa"), &hash("ccc"), 1.0, Method::Diff).is_err());
        assert_eq!(dups, before);
    }

    #[test]
    fn test_trim_unknown_hash_is_noop() {
        let mut dups = four_groups();
        let before = dups.clone();
        assert!(!dups.trim_deleted_blob(&hash("nope")).unwrap());
        assert_eq!(dups, before);
    }

    #[test]
    fn test_trim_collapses_pair() {
        let mut dups = fixture(vec![(vec!["aaa", "bbb"], vec![New, Keep])]);
        assert!(dups.trim_deleted_blob(&hash("bbb")).unwrap());
        assert!(dups.index().is_empty());
        assert!(dups.registry().is_empty());
    }

    #[test]
    fn test_trim_resets_keep_and_skip() {
        let mut dups = fixture(vec![(
            vec!["aaa", "bbb", "ccc", "ddd", "eee", "fff"],
            vec![Keep, Skip, False, New, Keep, Skip],
        )]);
        assert!(!dups.trim_deleted_blob(&hash("fff")).unwrap());
        let k = key(&["aaa", "bbb", "ccc", "ddd", "eee"]);
        assert_eq!(dups.registry().len(), 1);
        let group = &dups.registry()[&k];
        assert_eq!(group.verdicts[&hash("aaa")], New);
        assert_eq!(group.verdicts[&hash("bbb")], New);
        assert_eq!(group.verdicts[&hash("ccc")], False);
        assert_eq!(group.verdicts[&hash("ddd")], New);
        assert_eq!(group.verdicts[&hash("eee")], New);
        assert!(!group.verdicts.contains_key(&hash("fff")));
        assert!(!dups.index().contains_key(&hash("fff")));
        for pairs in group.sources.values() {
            assert!(pairs.keys().all(|p| !p.mentions(&hash("fff"))));
        }
        dups.check_consistency().unwrap();
    }

    #[test]
    fn test_trim_drops_emptied_method() {
        // cnn only scores (ccc, aaa) in the fixture; removing aaa empties it
        let mut dups = fixture(vec![(vec!["aaa", "bbb", "ccc"], vec![New, New, New])]);
        assert!(dups.registry()[&key(&["aaa", "bbb", "ccc"])].sources.contains_key(&Method::Cnn));
        assert!(!dups.trim_deleted_blob(&hash("aaa")).unwrap());
        let group = &dups.registry()[&key(&["bbb", "ccc"])];
        assert!(!group.sources.contains_key(&Method::Cnn));
        assert_eq!(group.sources[&Method::Percept].len(), 1);
        dups.check_consistency().unwrap();
    }

    #[test]
    fn test_trim_undersized_group_fails_without_mutation() {
        let mut dups = Duplicates::new();
        let lonely = key(&["aaa"]);
        dups.registry_mut().insert(lonely.clone(), DuplicateGroup::default());
        dups.index_mut().insert(hash("aaa"), lonely);
        let before = dups.clone();
        assert!(matches!(
            dups.trim_deleted_blob(&hash("aaa")),
            Err(Error::UndersizedGroup { .. })
        ));
        assert_eq!(dups, before);
    }

    #[test]
    fn test_delete_pending() {
        let mut dups = four_groups();
        let summary = dups.delete_pending_duplicates();
        assert_eq!(
            summary,
            PurgeSummary {
                groups_deleted: 2,
                hashes_removed: 9
            }
        );
        assert_eq!(dups.registry().len(), 2);
        let reviewed = &dups.registry()[&key(&["aaa", "bbb"])];
        assert_eq!(reviewed.verdicts[&hash("aaa")], Keep);
        assert_eq!(reviewed.verdicts[&hash("bbb")], Skip);
        // no reset of reviewed members on a deliberate sweep
        let shrunk = &dups.registry()[&key(&["jjj", "kkk"])];
        assert_eq!(shrunk.verdicts[&hash("jjj")], False);
        assert_eq!(shrunk.verdicts[&hash("kkk")], Keep);
        assert_eq!(shrunk.sources[&Method::Percept].len(), 1);
        assert!(!shrunk.sources.contains_key(&Method::Cnn));
        assert_eq!(dups.index().len(), 4);
        dups.check_consistency().unwrap();
    }

    #[test]
    fn test_delete_pending_drops_leftover_single() {
        let mut dups = fixture(vec![(vec!["aaa", "bbb", "ccc"], vec![Keep, New, New])]);
        let summary = dups.delete_pending_duplicates();
        assert_eq!(summary.groups_deleted, 1);
        assert_eq!(summary.hashes_removed, 3);
        assert!(dups.registry().is_empty());
        assert!(dups.index().is_empty());
    }

    #[test]
    fn test_delete_all() {
        let mut dups = four_groups();
        let summary = dups.delete_all_duplicates();
        assert_eq!(
            summary,
            PurgeSummary {
                groups_deleted: 4,
                hashes_removed: 13
            }
        );
        assert!(dups.registry().is_empty());
        assert!(dups.index().is_empty());
        assert_eq!(dups.delete_all_duplicates(), PurgeSummary::default());
    }
}
