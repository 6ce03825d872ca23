//! Daemon configuration stored in `.autocommit.toml` at the repository root.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// File name of the config, relative to the repository root.
pub const CONFIG_FILE_NAME: &str = ".autocommit.toml";

/// Shortest interval the daemon accepts between cycles.
pub const MIN_COMMIT_INTERVAL_SECS: u64 = 180;

/// Invalid or unusable settings. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigurationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config: {} {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigurationError {}

/// Daemon configuration (TOML).
///
/// Missing fields default to the values in [`AutocommitConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutocommitConfig {
    /// Seconds between commit cycles. Must be at least [`MIN_COMMIT_INTERVAL_SECS`].
    pub commit_interval_seconds: u64,

    /// Text prepended to every drafted message.
    pub commit_prefix: String,

    /// Push the backup branch after each commit.
    pub auto_push: bool,

    /// Remote the backup branch is pushed to.
    pub remote: String,

    /// Untrack files that now match `.gitignore` before staging.
    pub untrack_ignored: bool,

    /// Paths per `git rm --cached` invocation.
    pub untrack_batch_size: usize,

    pub llm: LlmConfig,
}

/// Settings for the message drafting command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,

    /// Command run with the prompt on stdin; its stdout is the message.
    /// Each argument is a template over `provider`, `model` and `options`.
    pub command: Vec<String>,

    /// Environment variable the command needs for credentials. When the
    /// variable is unset, drafting falls back without running the command.
    /// Empty disables the check.
    pub api_key_env: String,

    pub timeout_secs: u64,

    /// Diffs longer than this are truncated before prompting.
    pub max_diff_bytes: usize,

    /// Free-form provider options (`temperature = 0.2`, `max_tokens = 100`),
    /// exposed to command templates.
    pub options: BTreeMap<String, toml::Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            command: vec!["llm".to_string(), "-m".to_string(), "{{ model }}".to_string()],
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            max_diff_bytes: 20_000,
            options: BTreeMap::new(),
        }
    }
}

impl Default for AutocommitConfig {
    fn default() -> Self {
        Self {
            commit_interval_seconds: 300,
            commit_prefix: "[Auto commit]".to_string(),
            auto_push: false,
            remote: "origin".to_string(),
            untrack_ignored: true,
            untrack_batch_size: 50,
            llm: LlmConfig::default(),
        }
    }
}

impl AutocommitConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.commit_interval_seconds < MIN_COMMIT_INTERVAL_SECS {
            return Err(ConfigurationError::new(
                "commit_interval_seconds",
                format!(
                    "must be >= {MIN_COMMIT_INTERVAL_SECS} (got {})",
                    self.commit_interval_seconds
                ),
            ));
        }
        if self.commit_prefix.trim().is_empty() {
            return Err(ConfigurationError::new("commit_prefix", "must not be empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(ConfigurationError::new("remote", "must not be empty"));
        }
        if self.untrack_batch_size == 0 {
            return Err(ConfigurationError::new("untrack_batch_size", "must be > 0"));
        }
        self.llm.validate()
    }
}

impl LlmConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(ConfigurationError::new(
                "llm.command",
                "must be a non-empty array",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigurationError::new("llm.timeout_secs", "must be > 0"));
        }
        if self.max_diff_bytes == 0 {
            return Err(ConfigurationError::new("llm.max_diff_bytes", "must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutocommitConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutocommitConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = AutocommitConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutocommitConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutocommitConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
