use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::instance::InstanceInfo;
use crate::paths::Paths;
use crate::transport::{ChannelOptions, DEFAULT_READ_ONLY_ACTIONS, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    /// File this config was loaded from (not serialized)
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Statically configured instances, in addition to discovered ones
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Time to wait for a reply to one attempt
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Largest accepted request or reply frame
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Session pins unused for this long are forgotten
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; doubles after each failed attempt
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Actions that may be repeated after a timeout or a drop mid-request
    #[serde(default = "default_read_only_actions")]
    pub read_only_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory where running editors write their status files
    #[serde(default = "default_status_dir")]
    pub status_dir: String,

    /// Status files with an older heartbeat register as down
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// How often `serve` rescans the status directory and re-probes down instances
    #[serde(default = "default_rescan")]
    pub rescan_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_request_timeout() -> u64 {
    30_000
}
fn default_connect_timeout() -> u64 {
    3_000
}
fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_session_idle() -> u64 {
    3_600
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff() -> u64 {
    250
}
fn default_max_backoff() -> u64 {
    2_000
}
fn default_read_only_actions() -> Vec<String> {
    DEFAULT_READ_ONLY_ACTIONS.iter().map(|s| s.to_string()).collect()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_true() -> bool {
    true
}
fn default_status_dir() -> String {
    "~/.editor-bridge/status".to_string()
}
fn default_stale_after() -> u64 {
    120
}
fn default_rescan() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
            session_idle_secs: default_session_idle(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
            max_backoff_ms: default_max_backoff(),
            read_only_actions: default_read_only_actions(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            status_dir: default_status_dir(),
            stale_after_secs: default_stale_after(),
            rescan_secs: default_rescan(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl InstanceConfig {
    pub fn to_info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            project_path: None,
            host: self.host.clone(),
            port: self.port,
        }
    }
}

impl Config {
    /// Load from `path`, or from `config_dir/config.toml` when `None`.
    /// The default file is created from a commented template on first run.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let paths = Paths::resolve()?;

        let path = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                path
            }
            None => {
                let path = paths.config_file();
                if !path.exists() {
                    paths.ensure_dirs()?;
                    let config = Config {
                        paths,
                        source: Some(path),
                        ..Config::default()
                    };
                    config.save_with_template()?;
                    return Ok(config);
                }
                path
            }
        };

        let mut config = Self::read(&path)?;
        config.paths = paths;
        Ok(config)
    }

    /// Logging settings from the config file at `path` (or the default
    /// location), falling back to defaults. Never creates or writes files.
    pub fn logging_settings(path: Option<&Path>) -> LoggingConfig {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Paths::resolve() {
                Ok(paths) => paths.config_file(),
                Err(_) => return LoggingConfig::default(),
            },
        };
        if !path.exists() {
            return LoggingConfig::default();
        }
        Self::read(&path).map(|c| c.logging).unwrap_or_default()
    }

    /// Parse a config file without touching anything else on disk.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn file_path(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| self.paths.config_file())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.file_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.file_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            backoff: Duration::from_millis(self.retry.backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            read_only_actions: self
                .retry
                .read_only_actions
                .iter()
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.bridge.session_idle_secs)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.rescan_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.discovery.stale_after_secs)
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            connect_timeout: Duration::from_millis(self.bridge.connect_timeout_ms),
            max_frame_bytes: self.bridge.max_frame_bytes,
        }
    }

    /// Status directory with `~` and `$VARS` expanded.
    pub fn status_dir(&self) -> PathBuf {
        let raw = &self.discovery.status_dir;
        let expanded = shellexpand::full(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.clone());
        PathBuf::from(expanded)
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["bridge", "request_timeout_ms"] => Ok(self.bridge.request_timeout_ms.to_string()),
            ["bridge", "connect_timeout_ms"] => Ok(self.bridge.connect_timeout_ms.to_string()),
            ["bridge", "max_frame_bytes"] => Ok(self.bridge.max_frame_bytes.to_string()),
            ["bridge", "session_idle_secs"] => Ok(self.bridge.session_idle_secs.to_string()),
            ["retry", "max_attempts"] => Ok(self.retry.max_attempts.to_string()),
            ["retry", "backoff_ms"] => Ok(self.retry.backoff_ms.to_string()),
            ["retry", "max_backoff_ms"] => Ok(self.retry.max_backoff_ms.to_string()),
            ["retry", "read_only_actions"] => Ok(self.retry.read_only_actions.join(",")),
            ["discovery", "enabled"] => Ok(self.discovery.enabled.to_string()),
            ["discovery", "status_dir"] => Ok(self.discovery.status_dir.clone()),
            ["discovery", "stale_after_secs"] => Ok(self.discovery.stale_after_secs.to_string()),
            ["discovery", "rescan_secs"] => Ok(self.discovery.rescan_secs.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["bridge", "request_timeout_ms"] => self.bridge.request_timeout_ms = value.parse()?,
            ["bridge", "connect_timeout_ms"] => self.bridge.connect_timeout_ms = value.parse()?,
            ["bridge", "max_frame_bytes"] => self.bridge.max_frame_bytes = value.parse()?,
            ["bridge", "session_idle_secs"] => self.bridge.session_idle_secs = value.parse()?,
            ["retry", "max_attempts"] => self.retry.max_attempts = value.parse()?,
            ["retry", "backoff_ms"] => self.retry.backoff_ms = value.parse()?,
            ["retry", "max_backoff_ms"] => self.retry.max_backoff_ms = value.parse()?,
            ["retry", "read_only_actions"] => {
                self.retry.read_only_actions = value
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            }
            ["discovery", "enabled"] => self.discovery.enabled = value.parse()?,
            ["discovery", "status_dir"] => self.discovery.status_dir = value.to_string(),
            ["discovery", "stale_after_secs"] => self.discovery.stale_after_secs = value.parse()?,
            ["discovery", "rescan_secs"] => self.discovery.rescan_secs = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => match value {
                "text" | "json" => self.logging.format = value.to_string(),
                _ => anyhow::bail!("logging.format must be \"text\" or \"json\""),
            },
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# editor-bridge configuration
# Auto-created on first run. Edit as needed.

[bridge]
request_timeout_ms = 30000
connect_timeout_ms = 3000
# max_frame_bytes = 16777216
# Forget a session's instance choice after this long without calls.
session_idle_secs = 3600

[retry]
max_attempts = 3
backoff_ms = 250
max_backoff_ms = 2000
# Actions that are safe to repeat after a timeout. Anything else is sent at
# most once once it may have reached the editor.
read_only_actions = ["search", "get_info", "get_components", "get_hierarchy", "find", "get_active", "get_build_settings"]

# Editors that do not write status files can be listed here.
# [[instances]]
# id = "MyGame@6400"
# name = "MyGame"
# host = "127.0.0.1"
# port = 6400

[discovery]
enabled = true
status_dir = "~/.editor-bridge/status"
stale_after_secs = 120
# serve only: rescan the status directory and retry down instances this often
rescan_secs = 5

[logging]
level = "info"
# "text" or "json"; logs always go to stderr
format = "text"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.bridge.request_timeout_ms, 30_000);
        assert_eq!(config.bridge.max_frame_bytes, 16 * 1024 * 1024);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.discovery.enabled);
        assert_eq!(config.logging.format, "text");
        assert!(config.instances.is_empty());
    }

    #[test]
    fn template_matches_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        let defaults = Config::default();
        assert_eq!(config.bridge.request_timeout_ms, defaults.bridge.request_timeout_ms);
        assert_eq!(config.retry.read_only_actions, defaults.retry.read_only_actions);
        assert_eq!(config.discovery.status_dir, defaults.discovery.status_dir);
        assert_eq!(config.discovery.rescan_secs, defaults.discovery.rescan_secs);
        assert_eq!(config.bridge.session_idle_secs, defaults.bridge.session_idle_secs);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn instances_table_parses() {
        let config: Config = toml::from_str(
            r#"
            [[instances]]
            id = "Game@6400"
            name = "Game"
            port = 6400

            [[instances]]
            id = "Tools@6401"
            host = "10.0.0.5"
            port = 6401
            "#,
        )
        .unwrap();
        assert_eq!(config.instances.len(), 2);
        assert_eq!(config.instances[0].host, "127.0.0.1");
        assert_eq!(config.instances[1].to_info().address(), "10.0.0.5:6401");
    }

    #[test]
    fn get_and_set_dotted_keys() {
        let mut config = Config::default();
        config.set_value("retry.max_attempts", "5").unwrap();
        config.set_value("retry.read_only_actions", "search, find").unwrap();
        config.set_value("logging.format", "json").unwrap();

        assert_eq!(config.get_value("retry.max_attempts").unwrap(), "5");
        assert_eq!(config.get_value("retry.read_only_actions").unwrap(), "search,find");
        assert_eq!(config.get_value("logging.format").unwrap(), "json");

        assert!(config.set_value("logging.format", "xml").is_err());
        assert!(config.set_value("retry.max_attempts", "many").is_err());
        assert!(config.get_value("nope.key").is_err());
    }

    #[test]
    fn save_and_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let mut config = Config {
            source: Some(path.clone()),
            ..Config::default()
        };
        config.set_value("bridge.request_timeout_ms", "1500").unwrap();
        config.save().unwrap();

        let loaded = Config::read(&path).unwrap();
        assert_eq!(loaded.bridge.request_timeout_ms, 1500);
        assert_eq!(loaded.request_timeout(), Duration::from_millis(1500));
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn status_dir_expands_tilde() {
        let config = Config::default();
        let dir = config.status_dir();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with(".editor-bridge/status"));
    }

    #[test]
    fn logging_settings_have_no_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        let logging = Config::logging_settings(Some(&path));
        assert_eq!(logging.level, "info");
        assert!(!path.exists());

        fs::write(&path, "[logging]\nlevel = \"debug\"\nformat = \"json\"\n").unwrap();
        let logging = Config::logging_settings(Some(&path));
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, "json");

        fs::write(&path, "[logging\n").unwrap();
        assert_eq!(Config::logging_settings(Some(&path)).level, "info");
    }

    #[test]
    fn invalid_file_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.toml");
        fs::write(&path, "[bridge\nrequest_timeout_ms = ").unwrap();
        let err = Config::read(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }
}
