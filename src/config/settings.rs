use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::trace::decoder::DEFAULT_MAX_BACKTRACK;
use crate::trace::guesser::DEFAULT_ASSUMED_ITEMS;
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which oracle transport to use
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OracleBackend {
    /// Assistant CLI spawned per invocation
    #[default]
    Command,
    /// OpenAI-compatible streaming chat endpoint
    Http,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    /// Binary for the command backend, resolved through PATH
    pub binary: String,
    pub model: Option<String>,
    pub api_base_url: String,
    /// Environment variable holding the API key for the http backend
    pub api_key_env: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Idle pause before the live guesser runs
    pub debounce: Duration,
    /// Items a list is assumed to hold when an append is seen in isolation
    pub assumed_items: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeepConfig {
    /// Idle pause before an automatic deep request
    pub debounce: Duration,
    /// Fire deep requests automatically after edits settle
    pub auto: bool,
    /// Deep sequences longer than this are protected from live updates
    pub protect_threshold: usize,
    pub rate_limit_cooldown: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackConfig {
    /// How long each frame stays up when not narrated
    pub frame_duration: Duration,
    pub narration: bool,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub oracle: OracleConfig,
    pub live: LiveConfig,
    pub deep: DeepConfig,
    /// Truncation repair attempts before the decoder gives up
    pub max_backtrack: usize,
    pub playback: PlaybackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oracle: OracleConfig {
                backend: OracleBackend::Command,
                binary: "claude".into(),
                model: None,
                api_base_url: "https://api.openai.com/v1".into(),
                api_key_env: "OPENAI_API_KEY".into(),
                max_tokens: 4096,
            },
            live: LiveConfig {
                debounce: Duration::from_millis(400),
                assumed_items: DEFAULT_ASSUMED_ITEMS.iter().map(|s| s.to_string()).collect(),
            },
            deep: DeepConfig {
                debounce: Duration::from_millis(1500),
                auto: false,
                protect_threshold: 5,
                rate_limit_cooldown: Duration::from_secs(60),
            },
            max_backtrack: DEFAULT_MAX_BACKTRACK,
            playback: PlaybackConfig {
                frame_duration: Duration::from_secs(3),
                narration: true,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlOracleConfig {
    pub backend: Option<OracleBackend>,
    pub binary: Option<String>,
    pub model: Option<String>,
    pub api_base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlLiveConfig {
    pub debounce_ms: Option<u64>,
    pub assumed_items: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlDeepConfig {
    pub debounce_ms: Option<u64>,
    pub auto: Option<bool>,
    pub protect_threshold: Option<usize>,
    pub rate_limit_cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlDecoderConfig {
    pub max_backtrack: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlPlaybackConfig {
    pub frame_duration_ms: Option<u64>,
    pub narration: Option<bool>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub oracle: Option<TomlOracleConfig>,
    pub live: Option<TomlLiveConfig>,
    pub deep: Option<TomlDeepConfig>,
    pub decoder: Option<TomlDecoderConfig>,
    pub playback: Option<TomlPlaybackConfig>,
}

impl Config {
    /// Load configuration from the data directory, merging with defaults.
    ///
    /// A missing file is created from the bundled example. An unreadable or
    /// invalid file is logged and ignored.
    pub fn load() -> Self {
        let config_file = config_path();

        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %config_file.display(),
                    error = %e,
                    "Ignoring config file"
                );
                Config::default()
            }
        }
    }

    /// Load configuration from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig = toml::from_str(contents)?;
        let mut config = Config::default();
        config.merge(toml_config);
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(oracle) = toml_config.oracle {
            if let Some(backend) = oracle.backend {
                self.oracle.backend = backend;
            }
            if let Some(binary) = oracle.binary {
                self.oracle.binary = binary;
            }
            if oracle.model.is_some() {
                self.oracle.model = oracle.model;
            }
            if let Some(url) = oracle.api_base_url {
                self.oracle.api_base_url = url;
            }
            if let Some(env) = oracle.api_key_env {
                self.oracle.api_key_env = env;
            }
            if let Some(max_tokens) = oracle.max_tokens {
                self.oracle.max_tokens = max_tokens;
            }
        }

        if let Some(live) = toml_config.live {
            if let Some(ms) = live.debounce_ms {
                self.live.debounce = Duration::from_millis(ms);
            }
            if let Some(items) = live.assumed_items {
                self.live.assumed_items = items;
            }
        }

        if let Some(deep) = toml_config.deep {
            if let Some(ms) = deep.debounce_ms {
                self.deep.debounce = Duration::from_millis(ms);
            }
            if let Some(auto) = deep.auto {
                self.deep.auto = auto;
            }
            if let Some(threshold) = deep.protect_threshold {
                self.deep.protect_threshold = threshold;
            }
            if let Some(secs) = deep.rate_limit_cooldown_secs {
                self.deep.rate_limit_cooldown = Duration::from_secs(secs);
            }
        }

        if let Some(decoder) = toml_config.decoder {
            if let Some(max_backtrack) = decoder.max_backtrack {
                self.max_backtrack = max_backtrack;
            }
        }

        if let Some(playback) = toml_config.playback {
            if let Some(ms) = playback.frame_duration_ms {
                self.playback.frame_duration = Duration::from_millis(ms);
            }
            if let Some(narration) = playback.narration {
                self.playback.narration = narration;
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }
}
