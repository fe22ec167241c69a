//! Where stepwise keeps its config, logs and saved traces
//!
//! Everything lives under one data directory, `~/.stepwise` unless the CLI
//! passes `--data-dir`. The choice is fixed for the life of the process.

use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Pin the data directory. Only the first call wins; later calls are logged
/// and ignored so paths never move under a running session.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let requested = custom_path.unwrap_or_else(default_data_dir);
    if let Err(requested) = DATA_DIR.set(requested) {
        tracing::debug!(
            requested = %requested.display(),
            active = %data_dir().display(),
            "Data directory already pinned"
        );
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".stepwise"))
        .unwrap_or_else(|| PathBuf::from(".stepwise"))
}

pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn log_file_path() -> PathBuf {
    logs_dir().join("stepwise.log")
}

/// Saved traces, one JSON file each
pub fn traces_dir() -> PathBuf {
    data_dir().join("traces")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_data_dir() {
        let base = data_dir();
        assert_eq!(traces_dir(), base.join("traces"));
        assert_eq!(config_path(), base.join("config.toml"));
        assert!(log_file_path().starts_with(logs_dir()));
        assert!(logs_dir().starts_with(&base));
    }
}
