//! Disk-backed asset cache.
//!
//! Layout under the cache directory, per asset id:
//!
//! ```text
//! <id>.bin    media bytes
//! <id>.json   metadata (content ref, size, digest, fetched_at)
//! <id>.<n>.part  download in progress; never indexed
//! ```
//!
//! Bytes land in a `.part` file unique to the writer. Metadata is written
//! before the bytes are renamed into place, so every `.bin` on disk has a
//! `.json` next to it unless something deleted it underneath us.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::KioskError;

/// Local materialization of a content reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAsset {
    pub asset_id: String,
    pub content_ref: String,
    pub size_bytes: u64,
    /// Hex blake3 of the bytes, checked on every read.
    pub digest: String,
    pub fetched_at: DateTime<Utc>,
}

/// Stable file-name-safe id for a content reference.
pub fn asset_id(content_ref: &str) -> String {
    let digest = blake3::hash(content_ref.as_bytes());
    hex::encode(&digest.as_bytes()[..16])
}

fn bin_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.bin"))
}

fn meta_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

fn write_failed(content_ref: &str, what: &str, e: impl std::fmt::Display) -> KioskError {
    KioskError::Prefetch {
        content_ref: content_ref.to_string(),
        reason: format!("cache {what}: {e}"),
    }
}

static PART_SEQ: AtomicU64 = AtomicU64::new(0);

fn part_path(dir: &Path, id: &str) -> PathBuf {
    let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{id}.{seq}.part"))
}

#[derive(Debug)]
pub struct AssetCache {
    dir: PathBuf,
    capacity_bytes: u64,
    entries: HashMap<String, CachedAsset>,
    used_bytes: u64,
}

impl AssetCache {
    /// Open `dir`, rebuilding the index from whatever survived the last
    /// run. Orphaned or inconsistent files are removed.
    pub async fn open(dir: impl Into<PathBuf>, capacity_bytes: u64) -> Result<Self, KioskError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut cache = Self {
            dir,
            capacity_bytes,
            entries: HashMap::new(),
            used_bytes: 0,
        };
        cache.recover().await?;
        info!(
            dir = %cache.dir.display(),
            assets = cache.entries.len(),
            used_bytes = cache.used_bytes,
            "asset cache ready"
        );
        Ok(cache)
    }

    async fn recover(&mut self) -> Result<(), KioskError> {
        let mut read_dir = tokio::fs::read_dir(&self.dir).await?;
        let mut metas = Vec::new();
        let mut bins = Vec::new();
        while let Some(item) = read_dir.next_entry().await? {
            let path = item.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => metas.push(path),
                Some("bin") => bins.push(path),
                Some("part") => {
                    debug!(path = %path.display(), "removing interrupted download");
                    let _ = tokio::fs::remove_file(&path).await;
                }
                _ => {}
            }
        }

        for meta in metas {
            match self.recover_one(&meta).await {
                Ok(asset) => {
                    self.used_bytes += asset.size_bytes;
                    self.entries.insert(asset.content_ref.clone(), asset);
                }
                Err(reason) => {
                    warn!(path = %meta.display(), "dropping cache entry: {reason}");
                    let _ = tokio::fs::remove_file(&meta).await;
                    let _ = tokio::fs::remove_file(meta.with_extension("bin")).await;
                }
            }
        }

        let indexed: HashSet<&str> = self.entries.values().map(|a| a.asset_id.as_str()).collect();
        for bin in bins {
            let known = bin
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| indexed.contains(stem));
            if !known {
                debug!(path = %bin.display(), "removing orphaned asset bytes");
                let _ = tokio::fs::remove_file(&bin).await;
            }
        }
        Ok(())
    }

    async fn recover_one(&self, meta: &Path) -> Result<CachedAsset, String> {
        let raw = tokio::fs::read(meta).await.map_err(|e| e.to_string())?;
        let asset: CachedAsset = serde_json::from_slice(&raw).map_err(|e| e.to_string())?;
        if asset.asset_id != asset_id(&asset.content_ref) {
            return Err("asset id does not match content ref".into());
        }
        let len = tokio::fs::metadata(bin_path(&self.dir, &asset.asset_id))
            .await
            .map_err(|e| e.to_string())?
            .len();
        if len != asset.size_bytes {
            return Err(format!("size {len} != recorded {}", asset.size_bytes));
        }
        Ok(asset)
    }

    /// Write `bytes` for `content_ref` into `dir`.
    ///
    /// Runs outside the cache owner (inside a prefetch task); the result
    /// is indexed later through [`admit`](Self::admit). Filesystem failures
    /// come back as [`KioskError::Prefetch`].
    pub async fn materialize(
        dir: &Path,
        content_ref: &str,
        bytes: &[u8],
        fetched_at: DateTime<Utc>,
    ) -> Result<CachedAsset, KioskError> {
        let id = asset_id(content_ref);
        let asset = CachedAsset {
            asset_id: id.clone(),
            content_ref: content_ref.to_string(),
            size_bytes: bytes.len() as u64,
            digest: blake3::hash(bytes).to_hex().to_string(),
            fetched_at,
        };

        let meta = serde_json::to_vec(&asset).map_err(|e| write_failed(content_ref, "metadata", e))?;

        let part = part_path(dir, &id);
        if let Err(e) = tokio::fs::write(&part, bytes).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(write_failed(content_ref, "write", e));
        }
        if let Err(e) = tokio::fs::write(meta_path(dir, &id), meta).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(write_failed(content_ref, "metadata", e));
        }
        tokio::fs::rename(&part, bin_path(dir, &id))
            .await
            .map_err(|e| write_failed(content_ref, "rename", e))?;
        Ok(asset)
    }

    /// Index a materialized asset, evicting least recently fetched assets
    /// (never those in `protected`) until the cache fits its capacity.
    /// Returns the evicted content refs.
    pub async fn admit(&mut self, asset: CachedAsset, protected: &[&str]) -> Vec<String> {
        if let Some(old) = self.entries.remove(&asset.content_ref) {
            self.used_bytes = self.used_bytes.saturating_sub(old.size_bytes);
        }
        self.used_bytes += asset.size_bytes;
        let admitted = asset.content_ref.clone();
        self.entries.insert(admitted.clone(), asset);

        let mut evicted = Vec::new();
        while self.used_bytes > self.capacity_bytes {
            let victim = self
                .entries
                .values()
                .filter(|a| a.content_ref != admitted && !protected.contains(&a.content_ref.as_str()))
                .min_by_key(|a| a.fetched_at)
                .map(|a| a.content_ref.clone());
            let Some(victim) = victim else {
                warn!(
                    used_bytes = self.used_bytes,
                    capacity = self.capacity_bytes,
                    "cache over capacity, nothing evictable"
                );
                break;
            };
            self.remove(&victim).await;
            evicted.push(victim);
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted cached assets");
        }
        evicted
    }

    pub fn get(&self, content_ref: &str) -> Option<&CachedAsset> {
        self.entries.get(content_ref)
    }

    pub fn contains(&self, content_ref: &str) -> bool {
        self.entries.contains_key(content_ref)
    }

    /// Read an asset's bytes, verifying them against the recorded digest.
    pub async fn read(&self, asset: &CachedAsset) -> Result<Vec<u8>, KioskError> {
        let bytes = tokio::fs::read(bin_path(&self.dir, &asset.asset_id))
            .await
            .map_err(|e| KioskError::Load(format!("{}: {e}", asset.content_ref)))?;
        if blake3::hash(&bytes).to_hex().as_str() != asset.digest {
            return Err(KioskError::Load(format!("{}: digest mismatch", asset.content_ref)));
        }
        Ok(bytes)
    }

    pub async fn remove(&mut self, content_ref: &str) -> bool {
        let Some(asset) = self.entries.remove(content_ref) else {
            return false;
        };
        self.used_bytes = self.used_bytes.saturating_sub(asset.size_bytes);
        let _ = tokio::fs::remove_file(meta_path(&self.dir, &asset.asset_id)).await;
        if let Err(e) = tokio::fs::remove_file(bin_path(&self.dir, &asset.asset_id)).await {
            warn!(content_ref, "could not delete cached bytes: {e}");
        }
        true
    }

    /// Drop everything except `protected`. Returns how many were removed.
    pub async fn clear(&mut self, protected: &[&str]) -> usize {
        let victims: Vec<String> = self
            .entries
            .keys()
            .filter(|k| !protected.contains(&k.as_str()))
            .cloned()
            .collect();
        for victim in &victims {
            self.remove(victim).await;
        }
        victims.len()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}
