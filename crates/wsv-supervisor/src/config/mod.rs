// Configuration types for the worker launcher

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wsv_common::{DEFAULT_HEALTH_PATH, DEFAULT_HOST, DEFAULT_PORT};
use wsv_log_collection::DEFAULT_OUTPUT_LOG_CAPACITY;

pub use crate::shutdown::ShutdownConfig;

pub mod validation;

/// Top-level launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// What to launch and how it listens.
///
/// This is the configuration object handed to `ProcessSupervisor::start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerConfig {
    pub root_directory: PathBuf,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub launch: LaunchConfig,
}

impl WorkerConfig {
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            network: NetworkConfig::default(),
            extra_args: Vec::new(),
            environment: BTreeMap::new(),
            launch: LaunchConfig::default(),
        }
    }
}

/// Listen address and port of the worker's HTTP service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

/// Where the interpreter and entry point live under the worker root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Directory holding the interpreter, tried before any search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter_root: Option<PathBuf>,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// `<root>/<nested>/<entry_point>` is preferred over `<root>/<entry_point>`
    #[serde(default = "default_nested_directory")]
    pub nested_directory: Option<String>,
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    #[serde(default)]
    pub entry_point_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            interpreter_root: None,
            interpreter: default_interpreter(),
            entry_point: default_entry_point(),
            nested_directory: default_nested_directory(),
            interpreter_args: default_interpreter_args(),
            entry_point_args: Vec::new(),
        }
    }
}

/// Supervisor tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorSettings {
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_health_interval", with = "duration_serde")]
    pub health_interval: Duration,
    #[serde(default = "default_health_timeout", with = "duration_serde")]
    pub health_timeout: Duration,
    /// Wait between an OS exit and the reconciliation probe
    #[serde(default = "default_reconcile_grace", with = "duration_serde")]
    pub reconcile_grace: Duration,
    #[serde(default = "default_heartbeat_debounce")]
    pub heartbeat_debounce: u32,
    #[serde(default = "default_output_log_capacity")]
    pub output_log_capacity: usize,
    /// Mirror captured output to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            health_path: default_health_path(),
            health_interval: default_health_interval(),
            health_timeout: default_health_timeout(),
            reconcile_grace: default_reconcile_grace(),
            heartbeat_debounce: default_heartbeat_debounce(),
            output_log_capacity: default_output_log_capacity(),
            output_file: None,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: LauncherConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_interpreter() -> String {
    if cfg!(windows) {
        "python.exe".to_string()
    } else {
        "python".to_string()
    }
}

fn default_entry_point() -> String {
    "main.py".to_string()
}

fn default_nested_directory() -> Option<String> {
    Some("ComfyUI".to_string())
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-s".to_string()]
}

fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}

fn default_health_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_reconcile_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_heartbeat_debounce() -> u32 {
    1
}

fn default_output_log_capacity() -> usize {
    DEFAULT_OUTPUT_LOG_CAPACITY
}

/// Human-readable durations: `250ms`, `2s`, `1m`.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = || format!("Invalid duration: {}", s);

        // Check for "ms" BEFORE "s" since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num.trim().parse().map_err(|_| invalid())?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num.trim().parse().map_err(|_| invalid())?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num.trim().parse().map_err(|_| invalid())?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
worker:
  root_directory: /opt/worker
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = LauncherConfig::load_from_string(MINIMAL).unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.worker.network.listen, "127.0.0.1");
        assert_eq!(config.worker.network.port, 8188);
        assert_eq!(config.worker.launch.entry_point, "main.py");
        assert_eq!(config.worker.launch.interpreter_args, vec!["-s"]);
        assert_eq!(config.supervisor.health_interval, Duration::from_secs(3));
        assert_eq!(config.supervisor.health_timeout, Duration::from_secs(2));
        assert_eq!(config.supervisor.output_log_capacity, 1000);
        assert_eq!(config.shutdown.graceful_window, Duration::from_secs(20));
        assert_eq!(config.shutdown.forceful_window, Duration::from_secs(10));
        assert_eq!(config.shutdown.manual_window, Duration::from_secs(30));
        assert_eq!(config.shutdown.tick, Duration::from_secs(1));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
log_level: debug
worker:
  root_directory: /srv/app
  network:
    listen: 0.0.0.0
    port: 9000
  extra_args: ["--lowvram"]
  environment:
    CUDA_VISIBLE_DEVICES: "1"
  launch:
    interpreter_root: /srv/app/python_embeded
    nested_directory: null
    entry_point_args: ["--windows-standalone-build"]
supervisor:
  health_interval: 500ms
  health_timeout: 250ms
  reconcile_grace: 1s
  heartbeat_debounce: 2
  output_file: /var/log/worker.log
shutdown:
  graceful_window: 1m
  fallback_on_signal_failure: true
"#;
        let config = LauncherConfig::load_from_string(yaml).unwrap();

        assert_eq!(config.worker.network.port, 9000);
        assert_eq!(config.worker.extra_args, vec!["--lowvram"]);
        assert_eq!(config.worker.environment["CUDA_VISIBLE_DEVICES"], "1");
        assert_eq!(config.worker.launch.nested_directory, None);
        assert_eq!(
            config.worker.launch.interpreter_root,
            Some(PathBuf::from("/srv/app/python_embeded"))
        );
        assert_eq!(config.supervisor.health_interval, Duration::from_millis(500));
        assert_eq!(config.supervisor.heartbeat_debounce, 2);
        assert_eq!(config.shutdown.graceful_window, Duration::from_secs(60));
        assert!(config.shutdown.fallback_on_signal_failure);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = LauncherConfig::load_from_file(&path).unwrap();
        assert_eq!(config.worker.root_directory, PathBuf::from("/opt/worker"));

        let missing = LauncherConfig::load_from_file(dir.path().join("nope.yaml"));
        assert!(missing.unwrap_err().to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_duration() {
        use duration_serde::parse_duration;

        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("xs").is_err());
    }

    #[test]
    fn test_durations_round_trip_through_yaml() {
        let settings = SupervisorSettings {
            reconcile_grace: Duration::from_millis(1500),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(yaml.contains("1500ms"));
        assert!(yaml.contains("health_interval: 3s"));

        let parsed: SupervisorSettings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, settings);
    }
}
