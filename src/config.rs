//! Runtime configuration loaded from `rudder.toml` plus `RUDDER_*`
//! environment overrides.
//!
//! Environment variables use `__` as the key separator after the prefix,
//! e.g. `RUDDER_AGENT__MAX_SESSION_TURNS=20`. Everything has a usable
//! default; the file is optional.

use crate::llm::retry::RetryOptions;
use crate::types::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Turn loop behavior.
    #[serde(default)]
    pub agent: AgentSettings,

    /// History size and compression.
    #[serde(default)]
    pub history: HistorySettings,

    /// Transport retry policy.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Workspace paths.
    #[serde(default)]
    pub workspace: WorkspaceSettings,
}

/// Turn loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Hard ceiling on model turns per request (default: 100).
    #[serde(default = "default_max_session_turns")]
    pub max_session_turns: u32,

    /// Whether to run the next-speaker follow-up call (default: true).
    #[serde(default = "default_next_speaker_check")]
    pub next_speaker_check: bool,

    /// Preferred response language, appended to the system prompt.
    #[serde(default)]
    pub language: Option<String>,
}

fn default_max_session_turns() -> u32 {
    100
}

fn default_next_speaker_check() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_session_turns: default_max_session_turns(),
            next_speaker_check: default_next_speaker_check(),
            language: None,
        }
    }
}

/// History size and compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Estimated-token threshold that triggers compression (default: 32768).
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_tokens: usize,

    /// History entries kept verbatim when compressing (default: 6).
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
}

fn default_compression_threshold() -> usize {
    32768
}

fn default_keep_recent_turns() -> usize {
    6
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            compression_threshold_tokens: default_compression_threshold(),
            keep_recent_turns: default_keep_recent_turns(),
        }
    }
}

/// Transport retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts including the first (default: 5).
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds (default: 5000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff delay cap in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_max_delay_ms() -> u64 {
    30000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    /// Convert to the retry helper's options.
    pub fn options(&self) -> RetryOptions {
        RetryOptions {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Workspace path settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// Working directory; defaults to the process working directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl WorkspaceSettings {
    /// The effective working directory.
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

impl AgentConfig {
    /// Load configuration: `.env`, then the TOML file (explicit path or
    /// `rudder.toml` when present), then `RUDDER_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("rudder").required(false)),
        };

        builder
            .add_source(config::Environment::with_prefix("RUDDER").separator("__"))
            .build()
            .map_err(|error| AgentError::Configuration(error.to_string()))?
            .try_deserialize()
            .map_err(|error| AgentError::Configuration(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.max_session_turns, 100);
        assert!(config.agent.next_speaker_check);
        assert_eq!(config.history.compression_threshold_tokens, 32768);
        assert_eq!(config.history.keep_recent_turns, 6);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_retry_options_conversion() {
        let settings = RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 400,
        };
        let options = settings.options();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.initial_delay, Duration::from_millis(100));
        assert_eq!(options.max_delay, Duration::from_millis(400));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rudder.toml");
        std::fs::write(
            &path,
            r#"
            [agent]
            max_session_turns = 12
            next_speaker_check = false

            [history]
            keep_recent_turns = 3
            "#,
        )
        .unwrap();

        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.agent.max_session_turns, 12);
        assert!(!config.agent.next_speaker_check);
        assert_eq!(config.history.keep_recent_turns, 3);
        // Unspecified sections keep defaults.
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_working_dir_fallback() {
        let settings = WorkspaceSettings::default();
        assert_eq!(
            settings.working_dir(),
            std::env::current_dir().unwrap()
        );
    }

    #[test]
    fn test_malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rudder.toml");
        std::fs::write(&path, "not [valid toml").unwrap();

        let result = AgentConfig::load(Some(&path));
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }
}
