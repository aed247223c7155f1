use crate::copilot_dir::CopilotDir;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "llm-efficiency.toml";

/// Top-level configuration loaded from llm-efficiency.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the Copilot CLI state (`session-state/`, `logs/`).
    pub copilot_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Tool completions slower than this are reported as long-running.
    pub long_running_tool_ms: i64,
    /// Process-log sniff inspects lines `0..=log_scan_lines`.
    pub log_scan_lines: usize,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub pretty: bool,
}

// --- Default implementations ---

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            copilot_dir: CopilotDir::default_root(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            long_running_tool_ms: 60_000,
            log_scan_lines: 30,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load configuration.
///
/// An explicit path must exist and parse. Without one, `fallback` is used
/// when present and defaults apply otherwise.
pub fn load_config(explicit: Option<&Path>, fallback: &Path) -> Result<Config, ConfigError> {
    let path = match explicit {
        Some(p) => p,
        None if fallback.is_file() => fallback,
        None => {
            tracing::debug!(path = %fallback.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
    };

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}
