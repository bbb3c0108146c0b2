//! Agent configuration.
//!
//! Values start from built-in defaults, may be replaced by a JSON document
//! (a file passed on the command line, or the `REMOTE_AGENT_CONFIG`
//! environment variable), and are finally overridden by CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Environment variable that may carry the configuration as JSON.
pub const CONFIG_ENV_VAR: &str = "REMOTE_AGENT_CONFIG";

/// Accepted range for the listener port and the read buffer size.
const PORT_RANGE: std::ops::RangeInclusive<u16> = 1025..=65534;
const BUFFER_RANGE: std::ops::RangeInclusive<usize> = 1025..=65534;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Address the listener binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port the listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Read buffer size, which is also the largest accepted frame.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Agent name reported by `TA:getname` until a client changes it.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Pause between sending a closing reply and closing the socket.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    /// Kill OS commands that run longer than this. Unlimited when absent.
    #[serde(default)]
    pub command_timeout_seconds: Option<u64>,

    /// Interpreter used for OS directives.
    #[serde(default)]
    pub shell: ShellConfig,

    /// Append-only log file settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Interpreter invocation: `<program> <args...> <command>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShellConfig {
    /// Interpreter executable.
    pub program: String,

    /// Arguments placed before the command string.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                program: "cmd".into(),
                args: vec!["/C".into()],
            }
        } else {
            Self {
                program: "/bin/sh".into(),
                args: vec!["-c".into()],
            }
        }
    }
}

/// Append-only log file configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Whether the log file is written at all.
    #[serde(default)]
    pub enabled: bool,

    /// Log file path. Missing parent directories are created.
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: default_log_file(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            buffer_size: default_buffer_size(),
            backlog: default_backlog(),
            agent_name: default_agent_name(),
            shutdown_grace_seconds: default_shutdown_grace(),
            command_timeout_seconds: None,
            shell: ShellConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `REMOTE_AGENT_CONFIG` when no
    /// path is given, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        Ok(Self::from_env()?.unwrap_or_default())
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parse the `REMOTE_AGENT_CONFIG` environment variable, if set.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(json) => {
                let config = Self::from_json(&json)
                    .with_context(|| format!("Failed to parse {CONFIG_ENV_VAR}"))?;
                Ok(Some(config))
            }
            Err(_) => Ok(None),
        }
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Reject values the listener cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.host.trim().is_empty(), "Bind address must not be empty");
        anyhow::ensure!(
            PORT_RANGE.contains(&self.port),
            "Invalid port {}, must be between {} and {}",
            self.port,
            PORT_RANGE.start(),
            PORT_RANGE.end()
        );
        anyhow::ensure!(
            BUFFER_RANGE.contains(&self.buffer_size),
            "Invalid buffer size {}, must be between {} and {}",
            self.buffer_size,
            BUFFER_RANGE.start(),
            BUFFER_RANGE.end()
        );
        anyhow::ensure!(self.backlog > 0, "Listen backlog must be at least 1");
        anyhow::ensure!(
            !self.shell.program.trim().is_empty(),
            "Shell program must not be empty"
        );
        Ok(())
    }

    /// Grace interval as a `Duration`.
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Command timeout as a `Duration`, if one is configured.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_seconds.map(Duration::from_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

const fn default_port() -> u16 {
    1100
}

const fn default_buffer_size() -> usize {
    14336
}

const fn default_backlog() -> u32 {
    5
}

fn default_agent_name() -> String {
    "NO_NAME".into()
}

const fn default_shutdown_grace() -> u64 {
    3
}

fn default_log_file() -> PathBuf {
    "remote-agent.log".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 1100);
        assert_eq!(config.buffer_size, 14336);
        assert_eq!(config.backlog, 5);
        assert_eq!(config.agent_name, "NO_NAME");
        assert_eq!(config.shutdown_grace(), Duration::from_secs(3));
        assert!(config.command_timeout().is_none());
        assert!(!config.logging.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn empty_json_matches_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn parse_partial_json() {
        let json = r#"{
            "host": "127.0.0.1",
            "port": 4100,
            "command_timeout_seconds": 30,
            "shell": { "program": "/bin/bash", "args": ["-lc"] },
            "logging": { "enabled": true }
        }"#;

        let config = Config::from_json(json).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4100);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.shell.program, "/bin/bash");
        assert_eq!(config.shell.args, vec!["-lc"]);
        assert!(config.logging.enabled);
        // Unspecified fields keep their defaults
        assert_eq!(config.buffer_size, 14336);
        assert_eq!(config.logging.file, PathBuf::from("remote-agent.log"));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, r#"{"agent_name": "lab-7", "port": 2200}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.agent_name, "lab-7");
        assert_eq!(config.port, 2200);
    }

    #[test]
    fn from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/agent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn from_file_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn validate_rejects_privileged_port() {
        let config = Config {
            port: 80,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid port 80"));
    }

    #[test]
    fn validate_rejects_small_buffer() {
        let config = Config {
            buffer_size: 512,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_shell() {
        let config = Config {
            shell: ShellConfig {
                program: " ".into(),
                args: vec![],
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
