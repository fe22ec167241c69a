//! Saved traces
//!
//! A saved trace is an already-decoded frame sequence plus a title and type
//! label. Loading one feeds replay mode directly; nothing is re-decoded.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cache::SourceId;
use super::frame::{is_contiguous, reindex, TraceFrame};
use crate::util::paths::traces_dir;

pub const SAVED_TRACE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid saved trace {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported saved trace schema version {0}")]
    UnsupportedVersion(u32),

    #[error("Saved trace has no frames")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTrace {
    pub schema_version: u32,
    pub id: Uuid,
    pub title: String,
    /// Free-form type label shown alongside the title (e.g. "sorting")
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    pub saved_at: DateTime<Utc>,
    pub frames: Vec<TraceFrame>,
}

impl SavedTrace {
    pub fn new(
        title: impl Into<String>,
        kind: impl Into<String>,
        source_id: Option<SourceId>,
        frames: Vec<TraceFrame>,
    ) -> Self {
        Self {
            schema_version: SAVED_TRACE_SCHEMA_VERSION,
            id: Uuid::now_v7(),
            title: title.into(),
            kind: kind.into(),
            source_id,
            saved_at: Utc::now(),
            frames,
        }
    }

    /// Default file location under the traces directory.
    pub fn default_path(&self) -> PathBuf {
        traces_dir().join(format!("{}.json", self.id))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)?;
        tracing::info!(path = %path.display(), frames = self.frames.len(), "Saved trace");
        Ok(())
    }

    /// Save to [`default_path`](Self::default_path) and return where it went.
    pub fn save(&self) -> Result<PathBuf, StoreError> {
        let path = self.default_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = fs::read_to_string(path)?;
        let mut saved: SavedTrace =
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if saved.schema_version > SAVED_TRACE_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion(saved.schema_version));
        }
        if saved.frames.is_empty() {
            return Err(StoreError::Empty);
        }
        if !is_contiguous(&saved.frames) {
            tracing::debug!(path = %path.display(), "Re-indexing saved trace frames");
            reindex(&mut saved.frames);
        }
        Ok(saved)
    }
}

/// All saved traces, newest first. Unreadable files are skipped.
pub fn list_saved(dir: &Path) -> Result<Vec<(PathBuf, SavedTrace)>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut saved = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match SavedTrace::load(&path) {
            Ok(trace) => saved.push((path, trace)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping saved trace"),
        }
    }
    saved.sort_by(|a, b| b.1.saved_at.cmp(&a.1.saved_at));
    Ok(saved)
}
