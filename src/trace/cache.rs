//! Session-scoped result cache
//!
//! Maps (source identity, normalized code, captured output) to the frame
//! sequence decoded for it. Shared across every open target in the process.
//! Stored sequences are immutable `Arc<[TraceFrame]>`; readers holding one
//! are never affected by later writes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::frame::TraceFrame;

/// Opaque identity of the file or target a trace belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Normalize source text so cosmetic whitespace changes hit the same entry.
///
/// Line endings become `\n`, trailing whitespace is dropped from every line
/// and leading/trailing blank lines are removed.
pub fn normalize_source(text: &str) -> String {
    text.replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

/// Hex SHA-256 of `text`.
pub fn digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content-addressed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_id: SourceId,
    /// Digest of the normalized source text
    pub code_digest: String,
    /// Digest of the captured program output, if any was supplied
    pub output_digest: Option<String>,
}

impl CacheKey {
    pub fn new(source_id: SourceId, code: &str, captured_output: Option<&str>) -> Self {
        Self {
            source_id,
            code_digest: digest(&normalize_source(code)),
            output_digest: captured_output
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(digest),
        }
    }

    fn code_part(&self) -> (SourceId, String) {
        (self.source_id.clone(), self.code_digest.clone())
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, Arc<[TraceFrame]>>,
    /// Latest full key written for each (source, code) pair
    by_code: HashMap<(SourceId, String), CacheKey>,
}

/// Unbounded memoization table for decoded traces.
#[derive(Default)]
pub struct ResultCache {
    inner: RwLock<CacheInner>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact lookup on all three key parts.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<[TraceFrame]>> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Lookup ignoring the captured-output part of the key.
    ///
    /// Unchanged code means the trace is still valid even if output capture
    /// differs. Returns the key actually stored alongside the frames.
    pub fn get_same_code(&self, key: &CacheKey) -> Option<(CacheKey, Arc<[TraceFrame]>)> {
        let inner = self.inner.read();
        let stored = inner.by_code.get(&key.code_part())?;
        let frames = inner.entries.get(stored)?.clone();
        Some((stored.clone(), frames))
    }

    /// Store `frames` under `key`, replacing any previous mapping.
    pub fn insert(&self, key: CacheKey, frames: Vec<TraceFrame>) -> Arc<[TraceFrame]> {
        let frames: Arc<[TraceFrame]> = frames.into();
        let mut inner = self.inner.write();
        inner.by_code.insert(key.code_part(), key.clone());
        inner.entries.insert(key, frames.clone());
        frames
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.len())
            .finish()
    }
}
