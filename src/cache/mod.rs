//! Persistent, checksum-keyed frame cache.
//!
//! # Layout
//!
//! ```text
//! {root}/
//! ├── dicom/
//! │   └── {checksum}/
//! │       ├── metadata.json
//! │       ├── frame_0.jpg
//! │       └── frame_1.jpg
//! ├── e2e/
//! └── fda/
//! ```
//!
//! An entry is valid only while its metadata parses, its age is within the
//! TTL and the number of frame files equals `number_of_frames`. Anything else
//! is deleted on sight and reported as a miss.
//!
//! Writers stage a complete entry in a hidden sibling directory and publish it
//! with a rename, so readers never see a half-written entry. Concurrent
//! writers of the same checksum race benignly: the last rename wins.
//!
//! All methods do blocking filesystem I/O; async callers run them under
//! `spawn_blocking`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checksum::Checksum;
use crate::format::SourceFormat;
use crate::store::EyeTree;

/// Default entry lifetime: 7 days.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Schema version written into every entry.
pub const CACHE_VERSION: &str = "1.0";

const METADATA_FILE: &str = "metadata.json";
const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = ".jpg";
const STAGING_PREFIX: &str = ".staging-";

// =============================================================================
// Metadata
// =============================================================================

/// Key layout of a dual-eye entry, so a hit can rebuild the eye groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeLayout {
    /// Image key of each frame index
    pub keys: Vec<String>,

    pub eyes: EyeTree,
}

/// Free-form description of the source a cache entry was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub size: u64,
    pub compression_type: String,
    pub is_compressed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eye_layout: Option<EyeLayout>,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub number_of_frames: usize,
    pub cached_at: DateTime<Utc>,
    pub cache_version: String,
    pub checksum: Checksum,
    pub format: SourceFormat,
    pub file_info: SourceDescriptor,
}

/// A validated cache hit.
#[derive(Debug, Clone)]
pub struct CachedFrames {
    pub frames: BTreeMap<u32, Bytes>,
    pub metadata: CacheMetadata,
}

/// Size of the cache on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,

    /// Entries per format partition
    pub partitions: BTreeMap<String, usize>,
}

// =============================================================================
// FrameCache
// =============================================================================

/// Disk-backed frame cache partitioned by source format.
#[derive(Debug, Clone)]
pub struct FrameCache {
    root: PathBuf,
    ttl: Duration,
}

impl FrameCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_ttl(root, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Directory of the entry for `checksum` in `format`'s partition.
    pub fn entry_path(&self, format: SourceFormat, checksum: Checksum) -> PathBuf {
        self.root.join(format.tag()).join(checksum.to_string())
    }

    /// Store a frame set, replacing any entry with the same checksum.
    ///
    /// Returns `false` when nothing could be published. A frame that fails to
    /// write is logged and skipped; the entry still records the requested
    /// frame count, so it is rejected on the next [`get`](Self::get).
    pub fn put(
        &self,
        checksum: Checksum,
        format: SourceFormat,
        frames: &BTreeMap<u32, Bytes>,
        file_info: SourceDescriptor,
    ) -> bool {
        if frames.is_empty() {
            warn!(checksum = %checksum, "No frames to cache");
            return false;
        }

        match self.publish(checksum, format, frames, file_info) {
            Ok(written) => {
                info!(
                    checksum = %checksum,
                    format = format.tag(),
                    frames = written,
                    "Cached frames"
                );
                written > 0
            }
            Err(e) => {
                warn!(checksum = %checksum, error = %e, "Failed to write cache entry");
                false
            }
        }
    }

    fn publish(
        &self,
        checksum: Checksum,
        format: SourceFormat,
        frames: &BTreeMap<u32, Bytes>,
        file_info: SourceDescriptor,
    ) -> io::Result<usize> {
        let partition = self.root.join(format.tag());
        fs::create_dir_all(&partition)?;

        let staging = partition.join(format!("{}{}-{}", STAGING_PREFIX, checksum, Uuid::new_v4()));
        fs::create_dir(&staging)?;

        let result = (|| {
            let mut written = 0;
            for (index, frame) in frames {
                let path = staging.join(frame_file_name(*index));
                match fs::write(&path, frame) {
                    Ok(()) => written += 1,
                    Err(e) => warn!(checksum = %checksum, frame = index, error = %e, "Failed to write frame"),
                }
            }
            if written == 0 {
                return Ok(0);
            }

            let metadata = CacheMetadata {
                number_of_frames: frames.len(),
                cached_at: Utc::now(),
                cache_version: CACHE_VERSION.to_string(),
                checksum,
                format,
                file_info,
            };
            let json = serde_json::to_vec_pretty(&metadata).map_err(io::Error::other)?;
            fs::write(staging.join(METADATA_FILE), json)?;

            let target = partition.join(checksum.to_string());
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            fs::rename(&staging, &target)?;
            Ok(written)
        })();

        if staging.exists() {
            let _ = fs::remove_dir_all(&staging);
        }
        result
    }

    /// Look up a checksum across the cacheable partitions.
    ///
    /// Invalid entries are deleted and reported as a miss.
    pub fn get(&self, checksum: Checksum) -> Option<CachedFrames> {
        let path = SourceFormat::CACHEABLE
            .iter()
            .map(|format| self.entry_path(*format, checksum))
            .find(|path| path.is_dir())?;

        match self.load(&path) {
            Ok(hit) => {
                debug!(checksum = %checksum, frames = hit.frames.len(), "Cache hit");
                Some(hit)
            }
            Err(rejected) if was_replaced(&path, rejected.cached_at) => {
                debug!(checksum = %checksum, "Cache entry replaced while reading, retrying");
                self.load(&path).ok()
            }
            Err(rejected) => {
                warn!(checksum = %checksum, reason = %rejected.reason, "Discarding cache entry");
                remove_entry(&path);
                None
            }
        }
    }

    fn load(&self, path: &Path) -> Result<CachedFrames, Rejected> {
        let metadata = read_metadata(path).map_err(|reason| Rejected {
            reason,
            cached_at: None,
        })?;
        let reject = |reason: String| Rejected {
            reason,
            cached_at: Some(metadata.cached_at),
        };

        let age = age_of(metadata.cached_at);
        if age > self.ttl {
            return Err(reject(format!("expired ({} hours old)", age.as_secs() / 3600)));
        }

        let mut frames = BTreeMap::new();
        let entries = fs::read_dir(path).map_err(|e| reject(e.to_string()))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(parse_frame_index) else {
                continue;
            };
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    frames.insert(index, Bytes::from(bytes));
                }
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to read cached frame"),
            }
        }

        if frames.len() != metadata.number_of_frames {
            return Err(reject(format!(
                "incomplete: expected {} frames, found {}",
                metadata.number_of_frames,
                frames.len()
            )));
        }

        Ok(CachedFrames { frames, metadata })
    }

    /// Delete every entry older than `max_age`, plus abandoned staging
    /// directories. Returns the number of entries removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut removed = 0;

        for partition in self.partitions() {
            for entry in entry_dirs(&partition) {
                let stale = if is_staging(&entry) {
                    fs::metadata(&entry)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|modified| modified.elapsed().ok())
                        .is_some_and(|elapsed| elapsed > max_age)
                } else {
                    match read_metadata(&entry) {
                        Ok(metadata) => age_of(metadata.cached_at) > max_age,
                        Err(reason) => {
                            debug!(path = %entry.display(), reason = %reason, "Skipping unreadable entry");
                            false
                        }
                    }
                };

                if stale {
                    remove_entry(&entry);
                    if !is_staging(&entry) {
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            info!(removed, max_age_hours = max_age.as_secs() / 3600, "Evicted old cache entries");
        }
        removed
    }

    /// Remove the entry for `checksum` from every partition.
    pub fn remove(&self, checksum: Checksum) -> bool {
        let mut found = false;
        for format in SourceFormat::CACHEABLE {
            let path = self.entry_path(format, checksum);
            if path.is_dir() {
                remove_entry(&path);
                found = true;
            }
        }
        found
    }

    /// Count entries and bytes on disk.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();

        for partition in self.partitions() {
            let tag = partition
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut count = 0;

            for entry in entry_dirs(&partition).filter(|e| !is_staging(e)) {
                count += 1;
                stats.total_bytes += fs::read_dir(&entry)
                    .map(|files| {
                        files
                            .flatten()
                            .filter_map(|f| f.metadata().ok())
                            .filter(|m| m.is_file())
                            .map(|m| m.len())
                            .sum::<u64>()
                    })
                    .unwrap_or(0);
            }

            stats.entries += count;
            stats.partitions.insert(tag, count);
        }

        stats
    }

    fn partitions(&self) -> Vec<PathBuf> {
        SourceFormat::CACHEABLE
            .iter()
            .map(|format| self.root.join(format.tag()))
            .filter(|path| path.is_dir())
            .collect()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// File name of frame `index`.
pub fn frame_file_name(index: u32) -> String {
    format!("{}{}{}", FRAME_PREFIX, index, FRAME_EXTENSION)
}

/// Parse `frame_<n>.jpg`.
pub fn parse_frame_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(FRAME_PREFIX)?
        .strip_suffix(FRAME_EXTENSION)?
        .parse()
        .ok()
}

/// Read and parse an entry's `metadata.json`.
pub fn read_metadata(entry: &Path) -> Result<CacheMetadata, String> {
    let text = fs::read(entry.join(METADATA_FILE)).map_err(|e| format!("metadata unreadable: {}", e))?;
    serde_json::from_slice(&text).map_err(|e| format!("metadata corrupt: {}", e))
}

/// Overwrite an entry's `metadata.json`.
pub fn write_metadata(entry: &Path, metadata: &CacheMetadata) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(metadata).map_err(io::Error::other)?;
    fs::write(entry.join(METADATA_FILE), json)
}

/// An entry that could not be served, with the `cached_at` it was judged on.
struct Rejected {
    reason: String,
    cached_at: Option<DateTime<Utc>>,
}

/// Whether a concurrent `put` published a different entry at `path` since
/// `seen` was read.
fn was_replaced(path: &Path, seen: Option<DateTime<Utc>>) -> bool {
    match read_metadata(path) {
        Ok(current) => Some(current.cached_at) != seen,
        Err(_) => false,
    }
}

fn age_of(cached_at: DateTime<Utc>) -> Duration {
    // Timestamps from the future count as fresh
    (Utc::now() - cached_at).to_std().unwrap_or_default()
}

fn entry_dirs(partition: &Path) -> impl Iterator<Item = PathBuf> {
    fs::read_dir(partition)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
}

fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(STAGING_PREFIX))
}

fn remove_entry(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "Removed cache entry"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache entry"),
    }
}

// =============================================================================
// Tests
// =============================================================================
