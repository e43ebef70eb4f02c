//! Configuration layer: CLI flags (parsed in `main.rs` via `structopt`)
//! merged over an optional TOML config file, merged over built-in
//! defaults. CLI always wins; file always beats built-in defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ProfilerError, Result};
use crate::unwind::Method;

pub const DEFAULT_FRAME_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub method: Method,
    pub freq: u32,
    pub max: u32,
    pub frame_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            method: Method::Library,
            freq: 1,
            max: 1,
            frame_limit: DEFAULT_FRAME_LIMIT,
        }
    }
}

/// Mirrors `Config`, but every field optional: this is what's actually
/// legal in a TOML file, where only overridden defaults are present.
/// `deny_unknown_fields` so a typo'd key is a hard `ConfigError` rather
/// than a silently ignored one.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub method: Option<String>,
    pub freq: Option<u32>,
    pub max: Option<u32>,
    pub frame_limit: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Ok(FileConfig::default()), // missing file: not an error
        };
        toml::from_str(&text).map_err(|source| ProfilerError::ConfigError {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn merge_into(self, base: Config) -> Config {
        Config {
            method: self
                .method
                .and_then(|m| m.parse().ok())
                .unwrap_or(base.method),
            freq: self.freq.unwrap_or(base.freq),
            max: self.max.unwrap_or(base.max),
            frame_limit: self.frame_limit.unwrap_or(base.frame_limit),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs_config_path()
}

/// Small standalone equivalent of `dirs::config_dir()` for `$HOME/.config`,
/// kept dependency-free since it's one line and this is the only caller.
fn dirs_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("pmprof")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_override_file_values() {
        let file = FileConfig {
            method: Some("frame_pointer".to_string()),
            freq: Some(5),
            max: Some(0),
            frame_limit: None,
        };
        let base = Config {
            method: Method::Library,
            freq: 10,
            max: 1,
            frame_limit: 20,
        };
        // merge_into treats `self` as file values and `base` as already
        // CLI-resolved defaults layered on; callers apply CLI after file.
        let merged = file.merge_into(base);
        assert_eq!(merged.freq, 5);
        assert_eq!(merged.max, 0);
        assert_eq!(merged.frame_limit, 20); // falls through to base default
    }

    #[test]
    fn missing_config_file_yields_defaults_not_an_error() {
        let path = PathBuf::from("/nonexistent/pmprof/config.toml");
        let file = FileConfig::load(&path).expect("missing file is not an error");
        let merged = file.merge_into(Config::default());
        assert_eq!(merged.freq, Config::default().freq);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid = = toml").unwrap();
        let result = FileConfig::load(&path);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bogus_key = 1").unwrap();
        let result = FileConfig::load(&path);
        assert!(result.is_err());
    }
}
