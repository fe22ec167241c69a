mod settings;

pub use settings::{
    Config, ConfigError, DeepConfig, LiveConfig, OracleBackend, OracleConfig, PlaybackConfig,
    EXAMPLE_CONFIG,
};
