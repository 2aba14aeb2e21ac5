//! Deterministic test environment setup
//!
//! Clears the environment overrides the engine reads so that tests see the
//! built-in defaults.

/// Setup environment variables for deterministic test execution
pub fn setup_deterministic_env() {
    std::env::set_var("TZ", "UTC");
    std::env::set_var("NO_COLOR", "1");
    std::env::remove_var("PUPPETEER_TIMEOUT_MS");
    std::env::remove_var("PUPPETEER_RECORD");
}
