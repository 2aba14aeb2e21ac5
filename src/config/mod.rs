mod settings;

pub use settings::{
    read_instructions, Config, ConfigError, TomlConfig, TranscriptConfig, ENV_RECORD,
    ENV_TIMEOUT_MS, EXAMPLE_CONFIG,
};
