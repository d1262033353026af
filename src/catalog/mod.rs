//! On-disk catalog: blob fingerprints plus the duplicate registry.
//!
//! Stored as a single pretty-printed JSON file. The registry and key index
//! are written in their in-memory shape.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::duplicates::{
    ContentHash, Duplicates, EncodingMap, Fingerprint, Method, NeighborSearch, Sensitivities,
};

/// Fingerprints of one stored image, as produced by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(default)]
    pub animated: bool,
    pub percept: String,
    pub average: String,
    pub diff: String,
    pub wavelet: String,
    pub cnn: Vec<f32>,
}

impl Blob {
    pub fn fingerprint(&self, method: Method) -> Fingerprint {
        match method {
            Method::Percept => Fingerprint::Hash(self.percept.clone()),
            Method::Average => Fingerprint::Hash(self.average.clone()),
            Method::Diff => Fingerprint::Hash(self.diff.clone()),
            Method::Wavelet => Fingerprint::Hash(self.wavelet.clone()),
            Method::Cnn => Fingerprint::Embedding(self.cnn.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub blobs: BTreeMap<ContentHash, Blob>,

    #[serde(default)]
    duplicates: Duplicates,

    /// When the last successful discovery run finished
    #[serde(default)]
    pub last_discovery: Option<DateTime<Utc>>,
}

impl Catalog {
    /// Load the catalog at `path`, or an empty one if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Catalog not found at {:?}, starting empty", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let catalog: Catalog = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
        catalog
            .duplicates
            .check_consistency()
            .with_context(|| format!("Duplicate registry in {} is inconsistent", path.display()))?;
        info!(
            "Loaded catalog with {} blobs and {} duplicate groups",
            catalog.blobs.len(),
            catalog.duplicates.group_count()
        );
        Ok(catalog)
    }

    /// Write the catalog to `path`, replacing any previous file only once fully written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create catalog directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace catalog {}", path.display()))?;
        Ok(())
    }

    pub fn duplicates(&self) -> &Duplicates {
        &self.duplicates
    }

    pub fn duplicates_mut(&mut self) -> &mut Duplicates {
        &mut self.duplicates
    }

    /// Merge `{hash: blob}` records from a JSON file, replacing blobs already present.
    pub fn import_blobs(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read blob records {}", path.display()))?;
        let records: BTreeMap<ContentHash, Blob> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse blob records {}", path.display()))?;
        let count = records.len();
        self.blobs.extend(records);
        info!("Imported {} blob records from {:?}", count, path);
        Ok(count)
    }

    /// Per-method encodings of every blob.
    pub fn encodings(&self) -> EncodingMap {
        Method::ALL
            .into_iter()
            .map(|method| {
                let by_hash = self
                    .blobs
                    .iter()
                    .map(|(hash, blob)| (hash.clone(), blob.fingerprint(method)))
                    .collect();
                (method, by_hash)
            })
            .collect()
    }

    pub fn animated_hashes(&self) -> BTreeSet<ContentHash> {
        self.blobs
            .iter()
            .filter(|(_, blob)| blob.animated)
            .map(|(hash, _)| hash.clone())
            .collect()
    }

    /// Run discovery over every stored blob.
    pub fn find_duplicates<S>(
        &mut self,
        regular: &Sensitivities,
        animated: &Sensitivities,
        search: &S,
    ) -> crate::Result<usize>
    where
        S: NeighborSearch + ?Sized,
    {
        let encodings = self.encodings();
        let animated_hashes = self.animated_hashes();
        let found = self
            .duplicates
            .find_duplicates(&encodings, &animated_hashes, regular, animated, search)?;
        self.last_discovery = Some(Utc::now());
        Ok(found)
    }

    /// Drop a blob, trimming it out of the duplicate registry first.
    ///
    /// Returns `None` if the hash is neither stored nor grouped, otherwise
    /// whether the removal collapsed its duplicate group.
    pub fn delete_blob(&mut self, hash: &ContentHash) -> crate::Result<Option<bool>> {
        if !self.blobs.contains_key(hash) && !self.duplicates.index().contains_key(hash) {
            warn!("Blob {} was not in the catalog", hash);
            return Ok(None);
        }
        let collapsed = self.duplicates.trim_deleted_blob(hash)?;
        self.blobs.remove(hash);
        Ok(Some(collapsed))
    }
}
