//! Perceptual duplicate groups over content hashes.
//!
//! The registry is a partition of content hashes into groups of "likely the
//! same picture". Each group is keyed by its sorted membership and keeps the
//! per-method pair scores that produced it plus a review verdict per member.
//! The key index is the "find" side: it maps every grouped hash to its key.

pub mod candidates;
pub mod discovery;
pub mod engine;
pub mod search;
pub mod sensitivity;
mod serde_entries;

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub use candidates::extract_pairs;
pub use discovery::{EncodingMap, Fingerprint, NeighborMap, NeighborSearch};
pub use engine::PurgeSummary;
pub use search::ExhaustiveSearch;
pub use sensitivity::Sensitivities;

/// Digest identifying one image's bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContentHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

impl From<String> for ContentHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

impl Borrow<str> for ContentHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sorted, duplicate-free membership of one group. This is the group's identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DuplicateKey(Vec<ContentHash>);

impl DuplicateKey {
    /// Build a key from any collection of hashes, sorting and deduplicating.
    pub fn from_hashes<I, H>(hashes: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<ContentHash>,
    {
        let mut members: Vec<ContentHash> = hashes.into_iter().map(Into::into).collect();
        members.sort();
        members.dedup();
        Self(members)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.0.binary_search(hash).is_ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContentHash> {
        self.0.iter()
    }

    pub fn members(&self) -> &[ContentHash] {
        &self.0
    }

    /// Key of the remaining members once `hash` is gone.
    pub fn without(&self, hash: &ContentHash) -> Self {
        Self(self.0.iter().filter(|h| *h != hash).cloned().collect())
    }

    /// Members of `self` that are not in `other`.
    pub fn difference(&self, other: &DuplicateKey) -> Vec<ContentHash> {
        self.0.iter().filter(|h| !other.contains(h)).cloned().collect()
    }

    fn is_canonical(&self) -> bool {
        self.0.windows(2).all(|w| w[0] < w[1])
    }
}

impl<'a> IntoIterator for &'a DuplicateKey {
    type Item = &'a ContentHash;
    type IntoIter = std::slice::Iter<'a, ContentHash>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, hash) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(hash.as_str())?;
        }
        f.write_str(")")
    }
}

/// Unordered pair of hashes, stored with the smaller one first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey(ContentHash, ContentHash);

impl PairKey {
    pub fn new(a: ContentHash, b: ContentHash) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn lo(&self) -> &ContentHash {
        &self.0
    }

    pub fn hi(&self) -> &ContentHash {
        &self.1
    }

    pub fn mentions(&self, hash: &ContentHash) -> bool {
        &self.0 == hash || &self.1 == hash
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// Fingerprinting method that produced a pair score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Percept,
    Average,
    Diff,
    Wavelet,
    Cnn,
}

impl Method {
    /// Fixed order used by discovery runs.
    pub const ALL: [Method; 5] = [
        Method::Percept,
        Method::Average,
        Method::Diff,
        Method::Wavelet,
        Method::Cnn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Percept => "percept",
            Method::Average => "average",
            Method::Diff => "diff",
            Method::Wavelet => "wavelet",
            Method::Cnn => "cnn",
        }
    }

    /// Larger scores mean more similar (cnn); otherwise scores are distances.
    pub fn is_similarity(&self) -> bool {
        matches!(self, Method::Cnn)
    }

    /// Whether `score` clears `threshold` for this method.
    pub fn accepts(&self, score: f64, threshold: f64) -> bool {
        if self.is_similarity() {
            score >= threshold
        } else {
            score <= threshold
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review state of one hash inside one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Detected, not reviewed yet
    New,
    /// Not actually a duplicate, relationship kept on record
    False,
    /// The copy to retain
    Keep,
    /// The copy to discard
    Skip,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::New => "new",
            Verdict::False => "false",
            Verdict::Keep => "keep",
            Verdict::Skip => "skip",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(Verdict::New),
            "false" => Ok(Verdict::False),
            "keep" => Ok(Verdict::Keep),
            "skip" => Ok(Verdict::Skip),
            other => Err(format!("unknown verdict {:?} (expected new, false, keep or skip)", other)),
        }
    }
}

/// Per-pair scores recorded for one method.
pub type PairScores = BTreeMap<PairKey, f64>;

/// One duplicate group: score provenance plus member verdicts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    #[serde(with = "serde_entries::sources")]
    pub sources: BTreeMap<Method, PairScores>,
    pub verdicts: BTreeMap<ContentHash, Verdict>,
}

impl DuplicateGroup {
    pub(crate) fn record_score(&mut self, method: Method, pair: PairKey, score: f64) {
        self.sources.entry(method).or_default().insert(pair, score);
    }

    /// Drop `hash`'s verdict and every pair score mentioning it, pruning empty methods.
    pub(crate) fn remove_member(&mut self, hash: &ContentHash) {
        self.verdicts.remove(hash);
        for pairs in self.sources.values_mut() {
            pairs.retain(|pair, _| !pair.mentions(hash));
        }
        self.sources.retain(|_, pairs| !pairs.is_empty());
    }
}

pub type Registry = BTreeMap<DuplicateKey, DuplicateGroup>;
pub type KeyIndex = BTreeMap<ContentHash, DuplicateKey>;

/// The duplicate-group registry together with its key index.
///
/// Both halves only change through the methods on this type, so no caller
/// can observe them out of step with each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Duplicates {
    #[serde(with = "serde_entries::entries")]
    registry: Registry,
    index: KeyIndex,
}

impl Duplicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    /// Key and group currently holding `hash`, if it is grouped at all.
    pub fn group_of(&self, hash: &str) -> Option<(&DuplicateKey, &DuplicateGroup)> {
        let key = self.index.get(hash)?;
        self.registry.get_key_value(key)
    }

    pub fn group_count(&self) -> usize {
        self.registry.len()
    }

    pub fn hash_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Record a review decision for one member of one group.
    pub fn set_verdict(&mut self, key: &DuplicateKey, hash: &ContentHash, verdict: Verdict) -> Result<()> {
        let group = self
            .registry
            .get_mut(key)
            .ok_or_else(|| Error::UnknownGroup(key.clone()))?;
        let slot = group.verdicts.get_mut(hash).ok_or_else(|| Error::NotAMember {
            key: key.clone(),
            hash: hash.clone(),
        })?;
        *slot = verdict;
        Ok(())
    }

    /// Audit every registry/index invariant, reporting the first violation.
    pub fn check_consistency(&self) -> Result<()> {
        let mut members = 0usize;
        for (key, group) in &self.registry {
            if key.len() < 2 {
                return Err(Error::Inconsistent(format!("group {} has fewer than 2 members", key)));
            }
            if !key.is_canonical() {
                return Err(Error::Inconsistent(format!("group key {} is not sorted and unique", key)));
            }
            if group.verdicts.len() != key.len() || !key.iter().all(|h| group.verdicts.contains_key(h)) {
                return Err(Error::Inconsistent(format!("verdicts of group {} do not match its key", key)));
            }
            for (method, pairs) in &group.sources {
                if pairs.is_empty() {
                    return Err(Error::Inconsistent(format!("group {} has an empty {} entry", key, method)));
                }
                for pair in pairs.keys() {
                    if pair.lo() >= pair.hi() || !key.contains(pair.lo()) || !key.contains(pair.hi()) {
                        return Err(Error::Inconsistent(format!(
                            "group {} has {} pair {} outside its membership",
                            key, method, pair
                        )));
                    }
                }
            }
            for hash in key {
                if self.index.get(hash) != Some(key) {
                    return Err(Error::Inconsistent(format!("index entry of {} does not point to {}", hash, key)));
                }
            }
            members += key.len();
        }
        if members != self.index.len() {
            return Err(Error::Inconsistent(format!(
                "index has {} entries but groups hold {} members",
                self.index.len(),
                members
            )));
        }
        Ok(())
    }

    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub(crate) fn index_mut(&mut self) -> &mut KeyIndex {
        &mut self.index
    }
}
