//! Engine configuration loaded from the environment.
//!
//! Recognized variables:
//!
//! - `WORKFLOW_AGENT_MAX_PARALLEL_TOOL_CALLS` (integer >= 0, default 5)
//! - `MAX_AGENT_CYCLES` (integer, default 10)
//! - `IMAP_MAX_CONCURRENCY_PER_USER` (integer, default 2)
//! - `MAILLOOM_ALLOWED_MODELS` (comma-separated model ids; empty = no
//!   restriction)
//! - `OPENROUTER_API_KEY` (provider credential)

use mailloom_types::config::EngineConfig;
use secrecy::SecretString;

/// Build an [`EngineConfig`] from the process environment, falling back to
/// defaults for missing or malformed values.
pub fn engine_config_from_env() -> EngineConfig {
    let mut config = EngineConfig::default();

    if let Some(value) = read_usize("WORKFLOW_AGENT_MAX_PARALLEL_TOOL_CALLS") {
        config.max_parallel_tool_calls = value;
    }
    if let Some(value) = read_usize("MAX_AGENT_CYCLES") {
        config.max_agent_cycles = value;
    }
    if let Some(value) = read_usize("IMAP_MAX_CONCURRENCY_PER_USER") {
        config.imap_max_concurrency_per_user = value.max(1);
    }
    if let Ok(models) = std::env::var("MAILLOOM_ALLOWED_MODELS") {
        config.allowed_models = parse_model_list(&models);
    }

    config
}

/// The OpenRouter API key, if configured.
pub fn openrouter_api_key_from_env() -> Option<SecretString> {
    std::env::var("OPENROUTER_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
}

fn read_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, raw = raw.as_str(), "ignoring malformed integer env var");
            None
        }
    }
}

/// Split a comma-separated model list, dropping blanks.
fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .map(str::to_string)
        .collect()
}
