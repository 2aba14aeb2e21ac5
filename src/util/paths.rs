//! Path utilities for Puppeteer data directories

use std::path::PathBuf;
use std::sync::OnceLock;

/// Overrides the data directory (`~/.puppeteer`)
pub const ENV_HOME: &str = "PUPPETEER_HOME";

/// Global storage for custom data directory path
static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the data directory with an optional custom path.
/// Must be called early in main() before any other path functions are used.
/// If custom_path is None, uses `$PUPPETEER_HOME` or the default ~/.puppeteer.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let path = custom_path.unwrap_or_else(default_data_dir);
    if DATA_DIR.set(path.clone()).is_err() {
        let existing = DATA_DIR
            .get()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        tracing::debug!(
            path = %path.display(),
            existing = %existing,
            "Data directory already initialized"
        );
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(ENV_HOME).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|h| h.join(".puppeteer"))
        .unwrap_or_else(|| PathBuf::from(".puppeteer"))
}

/// Get the base data directory.
/// Returns the custom path if set via init_data_dir(), otherwise the default
pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

/// Get the logs directory (~/.puppeteer/logs)
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Get the default log file path (~/.puppeteer/logs/puppeteer.log)
pub fn log_file_path() -> PathBuf {
    logs_dir().join("puppeteer.log")
}

/// Get the recorded transcripts directory (~/.puppeteer/transcripts)
pub fn transcripts_dir() -> PathBuf {
    data_dir().join("transcripts")
}

/// Get the config file path (~/.puppeteer/config.toml)
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
