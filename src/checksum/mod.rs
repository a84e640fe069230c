//! Content checksums used as persistent-cache keys.
//!
//! Two flavours exist:
//!
//! - **Byte checksums**: CRC-32 over the raw container bytes. This is the key
//!   for everything ingested from memory.
//! - **Descriptor checksums**: CRC-32 over a canonical JSON rendering of a
//!   remote object's `{path, size, last_modified, frame}`. This lets callers
//!   compute a cache key for an object they have not downloaded yet.
//!
//! Both render as 8 lowercase hex digits. The canonical JSON uses sorted keys,
//! `", "` / `": "` separators and ASCII-only escaping, so keys computed here
//! line up with cache directories written by earlier deployments.
//!
//! [`ChecksumService`] adds a bounded memo from logical path to the last
//! checksum seen for it.

use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::str::FromStr;

use lru::LruCache;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

/// Default number of path → checksum entries kept in the memo.
pub const DEFAULT_MEMO_CAPACITY: usize = 10_000;

// =============================================================================
// Checksum
// =============================================================================

/// A CRC-32 content checksum.
///
/// Displays (and serializes) as exactly 8 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum(u32);

impl Checksum {
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Error returned when a string is not an 8-digit hex checksum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid checksum {0:?}: expected 8 hex digits")]
pub struct ChecksumParseError(pub String);

impl FromStr for Checksum {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ChecksumParseError(s.to_string()));
        }
        u32::from_str_radix(s, 16)
            .map(Checksum)
            .map_err(|_| ChecksumParseError(s.to_string()))
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// CRC-32 (IEEE, zlib-compatible) of a byte sequence.
pub fn checksum_of_bytes(bytes: &[u8]) -> Checksum {
    Checksum(crc32fast::hash(bytes))
}

// =============================================================================
// Remote Descriptors
// =============================================================================

/// Identity of a remote object that has not necessarily been downloaded.
///
/// Missing fields default to `0` / `""` when hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub path: String,

    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub last_modified: Option<String>,

    #[serde(default)]
    pub frame: Option<u32>,
}

impl RemoteDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    pub fn with_frame(mut self, frame: u32) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Parse a descriptor from a JSON object. Key order is irrelevant.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    fn canonical_value(&self) -> Value {
        serde_json::json!({
            "path": self.path,
            "size": self.size.unwrap_or(0),
            "last_modified": self.last_modified.clone().unwrap_or_default(),
            "frame": self.frame.unwrap_or(0),
        })
    }
}

/// Checksum of a remote descriptor, stable under field order.
pub fn checksum_of_descriptor(descriptor: &RemoteDescriptor) -> Checksum {
    checksum_of_bytes(canonical_json(&descriptor.canonical_value()).as_bytes())
}

/// Render a JSON value in canonical form.
///
/// Object keys are sorted at every depth regardless of how the map type
/// orders them.
pub fn canonical_json(value: &Value) -> String {
    let sorted = sort_keys(value);
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter);
    // Writing into a Vec cannot fail and Value always serializes.
    if sorted.serialize(&mut serializer).is_err() {
        return String::new();
    }
    String::from_utf8(out).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// JSON formatter with spaced separators and `\uXXXX` escapes for anything
/// outside printable ASCII.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() && ch != '\x7f' {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Checksum Service
// =============================================================================

/// Where a descriptor checksum came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumSource {
    /// Served from the path memo
    Cached,
    /// Computed for this request
    Generated,
}

/// Descriptor checksums with an LRU memo keyed by logical path.
pub struct ChecksumService {
    memo: Mutex<LruCache<String, Checksum>>,
}

impl ChecksumService {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMO_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Checksum for a descriptor, preferring the memo for its path.
    pub async fn checksum_for_descriptor(
        &self,
        descriptor: &RemoteDescriptor,
    ) -> (Checksum, ChecksumSource) {
        let mut memo = self.memo.lock().await;
        if let Some(checksum) = memo.get(&descriptor.path) {
            return (*checksum, ChecksumSource::Cached);
        }

        let checksum = checksum_of_descriptor(descriptor);
        memo.put(descriptor.path.clone(), checksum);
        (checksum, ChecksumSource::Generated)
    }

    /// Record the checksum last seen for a path.
    pub async fn remember(&self, path: impl Into<String>, checksum: Checksum) {
        self.memo.lock().await.put(path.into(), checksum);
    }

    pub async fn lookup(&self, path: &str) -> Option<Checksum> {
        self.memo.lock().await.get(path).copied()
    }

    pub async fn memo_len(&self) -> usize {
        self.memo.lock().await.len()
    }

    pub async fn clear(&self) {
        self.memo.lock().await.clear();
    }
}

impl Default for ChecksumService {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
