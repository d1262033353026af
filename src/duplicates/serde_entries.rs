//! JSON has string-only object keys, so maps keyed by `DuplicateKey` or
//! `PairKey` are written as arrays of `[key, value]` entries.

use serde::de::DeserializeOwned;
use serde::ser::Serializer;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::{Method, PairKey, PairScores};

pub mod entries {
    use super::*;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map)
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: DeserializeOwned + Ord,
        V: DeserializeOwned,
        D: Deserializer<'de>,
    {
        let entries = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

/// `{method: [[pair, score], ...]}`
pub mod sources {
    use super::*;

    struct Entries<'a>(&'a PairScores);

    impl Serialize for Entries<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(self.0)
        }
    }

    pub fn serialize<S>(map: &BTreeMap<Method, PairScores>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(method, pairs)| (method, Entries(pairs))))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<Method, PairScores>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<Method, Vec<(PairKey, f64)>>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(method, pairs)| (method, pairs.into_iter().collect()))
            .collect())
    }
}
