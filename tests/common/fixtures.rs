//! Canned oracle responses and builders

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use stepwise::narration::Narrator;
use stepwise::oracle::mock::MockOracle;
use stepwise::pipeline::{SessionSettings, TraceSession};
use stepwise::{ResultCache, SourceId};

/// Six-frame bubble sort, long enough to be protected from live guesses
pub const BUBBLE_SORT: &str = r#"Here is the trace:
```json
[
  {"id": 0, "action": "INIT", "description": "Start with [3, 1, 2]", "memory": {"arr": [3, 1, 2]}},
  {"id": 1, "action": "COMPARE", "description": "Compare 3 and 1", "memory": {"arr": [3, 1, 2]}, "highlight": [0, 1]},
  {"id": 2, "action": "SWAP", "description": "Swap them", "memory": {"arr": [1, 3, 2]}, "highlight": [0, 1]},
  {"id": 3, "action": "COMPARE", "description": "Compare 3 and 2", "memory": {"arr": [1, 3, 2]}, "highlight": [1, 2]},
  {"id": 4, "action": "SWAP", "description": "Swap them", "memory": {"arr": [1, 2, 3]}, "highlight": [1, 2]},
  {"id": 5, "action": "END", "description": "Sorted", "memory": {"arr": [1, 2, 3]}}
]
```"#;

/// Oracle response cut off in the middle of the second frame
pub const TRUNCATED: &str =
    r#"[{"id":0,"action":"INIT","description":"start","memory":{"x":1}}, {"id":1,"acti"#;

pub const ALL_CLEAR: &str = "Looks good, no issues found.";

pub const BUBBLE_SORT_CODE: &str = "arr = [3, 1, 2]\narr.sort()\nprint(arr)\n";

/// JSON array of `count` simple frames
pub fn frames_json(count: usize) -> String {
    let frames: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "id": i,
                "action": if i == 0 { "INIT" } else { "WRITE" },
                "description": format!("step {i}"),
                "memory": { "i": i }
            })
        })
        .collect();
    Value::Array(frames).to_string()
}

pub fn session_with(
    oracle: Arc<MockOracle>,
    narrator: Arc<dyn Narrator>,
    cache: Arc<ResultCache>,
    source: &str,
) -> TraceSession {
    TraceSession::new(
        SourceId::new(source),
        cache,
        oracle,
        narrator,
        SessionSettings::default(),
    )
}

/// Temporary data directory for CLI runs, with a fast playback config
pub struct DataDir {
    pub dir: TempDir,
}

impl DataDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::write(
            dir.path().join("config.toml"),
            "[playback]\nframe_duration_ms = 10\nnarration = false\n",
        )
        .expect("Failed to write config");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to a file inside the data directory
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write fixture file");
        path
    }
}

impl Default for DataDir {
    fn default() -> Self {
        Self::new()
    }
}
