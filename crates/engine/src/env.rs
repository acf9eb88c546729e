// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("could not determine a state directory (set STORAGE_PATH)")]
    NoStateDir,
}

/// Runtime configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct EngineEnv {
    /// Bound on parallel agent subprocesses per job (`MAX_WORKERS`).
    pub max_workers: u32,
    /// Default retry budget per unit (`MAX_RETRIES`).
    pub max_retries: u32,
    /// Store directory (`STORAGE_PATH`).
    pub storage_path: PathBuf,
    /// Read-only dashboard port (`DASHBOARD_PORT`).
    pub dashboard_port: u16,
    /// Skip the pre-batch test phase by default (`SKIP_TEST`).
    pub skip_test: bool,
    /// Per-unit agent timeout (`UNIT_TIMEOUT_SECS`).
    pub unit_timeout: Duration,
    /// Agent CLI binary (`AGENT_BINARY`).
    pub agent_binary: PathBuf,
}

impl EngineEnv {
    pub fn load() -> Result<Self, EnvError> {
        Ok(Self {
            max_workers: parse_var("MAX_WORKERS", 4)?,
            max_retries: parse_var("MAX_RETRIES", 3)?,
            storage_path: match std::env::var_os("STORAGE_PATH") {
                Some(path) if !path.is_empty() => PathBuf::from(path),
                _ => default_storage_path()?,
            },
            dashboard_port: parse_var("DASHBOARD_PORT", 3847)?,
            skip_test: parse_bool("SKIP_TEST", false)?,
            unit_timeout: Duration::from_secs(parse_var("UNIT_TIMEOUT_SECS", 600)?),
            agent_binary: std::env::var_os("AGENT_BINARY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("claude")),
        })
    }

    /// Replace the store directory (CLI `--db` override).
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }
}

/// `~/.local/state/drover/batch` (or the XDG equivalent).
fn default_storage_path() -> Result<PathBuf, EnvError> {
    dirs::state_dir()
        .or_else(dirs::home_dir)
        .map(|base| base.join("drover").join("batch"))
        .ok_or(EnvError::NoStateDir)
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, EnvError> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| EnvError::InvalidValue { key, value: raw }),
        _ => Ok(default),
    }
}

fn parse_bool(key: &'static str, default: bool) -> Result<bool, EnvError> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(EnvError::InvalidValue { key, value: raw }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "MAX_WORKERS",
            "MAX_RETRIES",
            "STORAGE_PATH",
            "DASHBOARD_PORT",
            "SKIP_TEST",
            "UNIT_TIMEOUT_SECS",
            "AGENT_BINARY",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        clear_env();
        let env = EngineEnv::load().unwrap();
        assert_eq!(env.max_workers, 4);
        assert_eq!(env.max_retries, 3);
        assert_eq!(env.dashboard_port, 3847);
        assert!(!env.skip_test);
        assert_eq!(env.unit_timeout, Duration::from_secs(600));
        assert_eq!(env.agent_binary, PathBuf::from("claude"));
    }

    #[test]
    #[serial]
    fn overrides_parse() {
        clear_env();
        std::env::set_var("MAX_WORKERS", "9");
        std::env::set_var("SKIP_TEST", "true");
        std::env::set_var("STORAGE_PATH", "/tmp/drover-test");
        let env = EngineEnv::load().unwrap();
        assert_eq!(env.max_workers, 9);
        assert!(env.skip_test);
        assert_eq!(env.storage_path, PathBuf::from("/tmp/drover-test"));
        clear_env();
    }

    #[test]
    #[serial]
    fn bad_values_are_config_errors() {
        clear_env();
        std::env::set_var("MAX_WORKERS", "many");
        assert!(matches!(
            EngineEnv::load(),
            Err(EnvError::InvalidValue { key: "MAX_WORKERS", .. })
        ));
        clear_env();
    }
}
