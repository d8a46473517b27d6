//! Checkpoints — versioned full-state snapshots of a running chain
//!
//! A checkpoint carries every latent variable, the RNG state, the adaptive
//! proposal scales, the diagnostics and the snapshots recorded so far, so a
//! resumed chain continues exactly where the saved one stopped.
//!
//! Files live in one directory next to a `manifest.json` that records a
//! SHA-256 checksum per checkpoint; loads are verified against it.

use super::mcmc::{ChainState, UpdateFlags};
use crate::error::{MotifError, Result};
use crate::model::SamplerConfig;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Everything needed to resume a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub config: SamplerConfig,
    pub flags: UpdateFlags,
    pub chain: ChainState,
}

/// Manifest entry for one checkpoint file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub version: u64,
    pub run_id: String,
    pub iteration: usize,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub size_bytes: u64,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub checkpoints: Vec<CheckpointMeta>,
    pub next_version: u64,
    pub dir: PathBuf,
}

impl CheckpointManifest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoints: Vec::new(),
            next_version: 1,
            dir: dir.into(),
        }
    }

    /// Load an existing manifest or start an empty one
    pub fn load_or_create(dir: &Path) -> Self {
        let path = dir.join("manifest.json");
        if path.exists() {
            if let Ok(json) = std::fs::read_to_string(&path) {
                if let Ok(manifest) = serde_json::from_str::<CheckpointManifest>(&json) {
                    info!("Loaded checkpoint manifest with {} entries", manifest.checkpoints.len());
                    return manifest;
                }
            }
            warn!("Unreadable checkpoint manifest at {}, starting fresh", path.display());
        }
        Self::new(dir)
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(self.dir.join("manifest.json"), json)?;
        Ok(())
    }
}

/// Directory-backed checkpoint store
pub struct CheckpointStore {
    pub manifest: CheckpointManifest,
}

impl CheckpointStore {
    pub fn open(dir: impl AsRef<Path>) -> Self {
        Self {
            manifest: CheckpointManifest::load_or_create(dir.as_ref()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.manifest.dir
    }

    /// Write a checkpoint and register it in the manifest
    pub fn save(&mut self, checkpoint: &Checkpoint) -> Result<CheckpointMeta> {
        std::fs::create_dir_all(&self.manifest.dir)?;
        let data = serde_json::to_string(checkpoint)?;
        let version = self.manifest.next_version;
        let filename = format!("checkpoint_v{:04}.json", version);
        let checksum = hex::encode(Sha256::digest(data.as_bytes()));
        std::fs::write(self.manifest.dir.join(&filename), &data)?;

        let meta = CheckpointMeta {
            version,
            run_id: checkpoint.run_id.clone(),
            iteration: checkpoint.chain.iteration,
            timestamp: checkpoint.created_at,
            checksum,
            size_bytes: data.len() as u64,
            filename,
        };
        self.manifest.checkpoints.push(meta.clone());
        self.manifest.next_version += 1;
        self.manifest.save()?;

        info!(
            "Checkpoint v{} at sweep {} ({} bytes)",
            version, meta.iteration, meta.size_bytes
        );
        Ok(meta)
    }

    /// Load and verify a checkpoint by version
    pub fn load(&self, version: u64) -> Result<Checkpoint> {
        let meta = self
            .manifest
            .checkpoints
            .iter()
            .find(|c| c.version == version)
            .ok_or_else(|| MotifError::Integrity(format!("checkpoint v{} not found", version)))?;
        let data = std::fs::read_to_string(self.manifest.dir.join(&meta.filename))?;
        let checksum = hex::encode(Sha256::digest(data.as_bytes()));
        if checksum != meta.checksum {
            return Err(MotifError::Integrity(format!(
                "checksum mismatch for v{}: expected {}, got {}",
                version, meta.checksum, checksum
            )));
        }
        Ok(serde_json::from_str(&data)?)
    }

    /// Most recent checkpoint, if any
    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        match self.manifest.checkpoints.last() {
            Some(meta) => self.load(meta.version).map(Some),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> &[CheckpointMeta] {
        &self.manifest.checkpoints
    }

    /// Check every file against its recorded checksum
    pub fn verify_all(&self) -> Vec<(u64, bool)> {
        self.manifest
            .checkpoints
            .iter()
            .map(|meta| {
                let ok = std::fs::read_to_string(self.manifest.dir.join(&meta.filename))
                    .map(|data| hex::encode(Sha256::digest(data.as_bytes())) == meta.checksum)
                    .unwrap_or(false);
                (meta.version, ok)
            })
            .collect()
    }

    /// Delete all but the latest `keep` checkpoints
    pub fn retain_latest(&mut self, keep: usize) -> Result<usize> {
        if self.manifest.checkpoints.len() <= keep {
            return Ok(0);
        }
        let remove_count = self.manifest.checkpoints.len() - keep;
        let removed: Vec<CheckpointMeta> = self.manifest.checkpoints.drain(..remove_count).collect();
        for meta in &removed {
            let _ = std::fs::remove_file(self.manifest.dir.join(&meta.filename));
        }
        self.manifest.save()?;
        Ok(remove_count)
    }
}
