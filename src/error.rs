//! Error types for the duplicate registry.

use thiserror::Error;

use crate::duplicates::{ContentHash, DuplicateKey, Method};

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the duplicate registry and discovery runs.
///
/// `Sensitivity` is a configuration problem and the caller may retry with a
/// corrected configuration. Everything else means an invariant broke or a
/// collaborator misbehaved; those are fatal for the operation that raised them.
#[derive(Error, Debug)]
pub enum Error {
    /// Animated threshold looser than the regular one
    #[error(
        "animated sensitivity for method {method} must be at least as strict as the regular one \
         (animated {animated} vs regular {regular})"
    )]
    Sensitivity {
        method: Method,
        regular: f64,
        animated: f64,
    },

    /// Neighbor search reported the same pair with two different scores
    #[error("duplicate collision, method {method}, pair ({a}, {b}): new score {new} versus {old}")]
    ScoreCollision {
        method: Method,
        a: ContentHash,
        b: ContentHash,
        new: f64,
        old: f64,
    },

    /// A pair touched one group but would add more than one new member to it
    #[error("pair ({h1}, {h2}) would add {extra:?} to group {key}; at most one new member expected")]
    UnexpectedNewMembers {
        h1: ContentHash,
        h2: ContentHash,
        key: DuplicateKey,
        extra: Vec<ContentHash>,
    },

    /// Merging two groups produced members that belong to neither
    #[error("merging {k1} and {k2} through ({h1}, {h2}) still had inserted hashes")]
    MergeMismatch {
        h1: ContentHash,
        h2: ContentHash,
        k1: DuplicateKey,
        k2: DuplicateKey,
    },

    /// More groups touched than two hashes can reach
    #[error("pair ({h1}, {h2}) touched {count} groups")]
    TooManyGroups {
        h1: ContentHash,
        h2: ContentHash,
        count: usize,
    },

    /// A pair whose two sides are the same hash
    #[error("cannot pair hash {0} with itself")]
    SelfPair(ContentHash),

    /// Group key with fewer than two members
    #[error("found duplicate group {key} with less than 2 members while removing {hash}")]
    UndersizedGroup { key: DuplicateKey, hash: ContentHash },

    /// Registry and key index disagree
    #[error("registry inconsistency: {0}")]
    Inconsistent(String),

    /// No group under this key
    #[error("no duplicate group with key {0}")]
    UnknownGroup(DuplicateKey),

    /// Hash is not a member of the named group
    #[error("hash {hash} is not a member of group {key}")]
    NotAMember { key: DuplicateKey, hash: ContentHash },

    /// Fingerprints the search cannot compare
    #[error("invalid {method} fingerprint for {hash}: {reason}")]
    Fingerprint {
        method: Method,
        hash: ContentHash,
        reason: String,
    },
}

impl Error {
    /// True for errors the caller can fix by supplying a different configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Sensitivity { .. })
    }
}
