//! On-disk storage for compiled script units
//!
//! Each compiled unit lives in its own directory:
//!
//! ```text
//! <script dir>/.kiln/<script file name>/<class name>/
//!     unit.rhai       compiled unit
//!     manifest.json   class name, source mtime, cached-at time, BLAKE3 digest
//! ```
//!
//! The manifest is written last, so a directory without one is an incomplete
//! entry and reads as a miss.
//!
//! Validity only ever compares filesystem timestamps: the script's mtime
//! recorded when the unit was written against the script's current mtime,
//! and the recorded mtime against the stored unit's own mtime.

use std::io::Write;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{KilnError, Result};

const MANIFEST_FILE: &str = "manifest.json";
const UNIT_FILE: &str = "unit.rhai";

/// Cache entry metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Class name the unit was compiled as
    pub class_name: String,
    /// Last-modified time of the script the unit was compiled from
    pub source_modified: DateTime<Utc>,
    /// When the unit was written (informational)
    pub cached_at: DateTime<Utc>,
    /// BLAKE3 digest of the stored unit
    pub digest: String,
    /// Size of the stored unit in bytes
    pub size: usize,
}

/// A stored unit as read back from disk
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub manifest: CacheManifest,
    pub unit: String,
    /// Filesystem mtime of the stored unit
    pub written: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether this entry may stand in for a script last modified at
    /// `timestamp`.
    ///
    /// The recorded script mtime must be at or after `timestamp`, and strictly
    /// before the unit's own mtime. A script modified in the same filesystem
    /// clock tick as the unit was written could have changed again within
    /// that tick without its mtime moving, so such an entry is never trusted.
    pub fn is_valid_for(&self, timestamp: DateTime<Utc>) -> bool {
        self.manifest.source_modified >= timestamp && self.manifest.source_modified < self.written
    }
}

/// Directory holding the unit compiled as `class_name`
pub fn entry_dir(cache_dir: &Path, class_name: &str) -> PathBuf {
    cache_dir.join(class_name)
}

/// Read a stored unit if its manifest exists.
///
/// Returns `Ok(None)` when there is no complete entry. A manifest that does
/// not parse or a unit whose digest does not match is a cache error.
pub fn read_entry(cache_dir: &Path, class_name: &str) -> Result<Option<CacheEntry>> {
    let dir = entry_dir(cache_dir, class_name);
    let manifest_path = dir.join(MANIFEST_FILE);
    let unit_path = dir.join(UNIT_FILE);

    if !manifest_path.is_file() || !unit_path.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&manifest_path)?;
    let manifest: CacheManifest = serde_json::from_str(&content).map_err(|e| KilnError::Cache {
        message: format!("Invalid cache manifest {}: {}", manifest_path.display(), e),
    })?;

    let unit = std::fs::read_to_string(&unit_path)?;
    if digest(&unit) != manifest.digest {
        return Err(KilnError::Cache {
            message: format!("Cached unit {} does not match its manifest", unit_path.display()),
        });
    }
    let written: DateTime<Utc> = std::fs::metadata(&unit_path)?.modified()?.into();

    Ok(Some(CacheEntry {
        manifest,
        unit,
        written,
    }))
}

/// Store a unit compiled from a script last modified at `source_modified`
pub fn write_entry(
    cache_dir: &Path,
    class_name: &str,
    unit: &str,
    source_modified: DateTime<Utc>,
) -> Result<CacheManifest> {
    let dir = entry_dir(cache_dir, class_name);
    std::fs::create_dir_all(&dir)?;

    let manifest = CacheManifest {
        class_name: class_name.to_string(),
        source_modified,
        cached_at: Utc::now(),
        digest: digest(unit),
        size: unit.len(),
    };
    let manifest_content = serde_json::to_string_pretty(&manifest).map_err(|e| KilnError::Cache {
        message: format!("Failed to serialize cache manifest: {}", e),
    })?;

    // Stale manifest goes first so a crash never pairs it with a new unit
    let manifest_path = dir.join(MANIFEST_FILE);
    if manifest_path.exists() {
        std::fs::remove_file(&manifest_path)?;
    }
    write_atomic(&dir.join(UNIT_FILE), unit.as_bytes())?;
    write_atomic(&manifest_path, manifest_content.as_bytes())?;

    Ok(manifest)
}

/// Write through a temporary file in the same directory, then rename
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.persist(path).map_err(|e| KilnError::Io(e.error))?;
    Ok(())
}

fn digest(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub cache_dirs: Vec<PathBuf>,
}

/// Gather statistics over a set of cache roots (missing roots are ignored)
pub fn stats(roots: &[PathBuf]) -> Result<CacheStats> {
    let mut stats = CacheStats::default();

    for root in roots {
        if !root.is_dir() {
            continue;
        }
        stats.cache_dirs.push(root.clone());

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            stats.total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            if entry.file_name() == MANIFEST_FILE {
                stats.entries += 1;
            }
        }
    }

    Ok(stats)
}

/// Remove every cache root, returning how many existed
pub fn clean(roots: &[PathBuf]) -> Result<usize> {
    let mut removed = 0;
    for root in roots {
        if root.is_dir() {
            std::fs::remove_dir_all(root)?;
            tracing::info!(dir = %root.display(), "removed script cache");
            removed += 1;
        }
    }
    Ok(removed)
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size_str = if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if self.total_size < 1024 * 1024 {
            format!("{:.1} KB", self.total_size as f64 / 1024.0)
        } else {
            format!("{:.1} MB", self.total_size as f64 / (1024.0 * 1024.0))
        };

        write!(
            f,
            "{} compiled scripts, {} total in {} cache directories",
            self.entries,
            size_str,
            self.cache_dirs.len()
        )
    }
}
