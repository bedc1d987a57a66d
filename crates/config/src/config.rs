//! Core settings structures and loading logic.
//!
//! Settings are resolved in priority order: environment variables override
//! the config file, which overrides built-in defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Error type for settings operations
#[derive(Debug)]
pub enum SettingsError {
    /// IO error reading the settings file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A required value is missing or malformed
    Invalid(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "Failed to read settings file: {}", e),
            SettingsError::Parse(e) => write!(f, "Failed to parse settings: {}", e),
            SettingsError::Invalid(msg) => write!(f, "Invalid settings: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<toml::de::Error> for SettingsError {
    fn from(e: toml::de::Error) -> Self {
        SettingsError::Parse(e)
    }
}

fn default_temp_dir() -> String {
    "/tmp/transcode".to_string()
}

fn default_sync_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Static configuration consumed by the worker agent.
///
/// `orchestrator_url` and `nas_mount_path` are required; everything else
/// has a default. An empty `worker_id` falls back to the OS hostname
/// during validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Base URL for all orchestrator API calls
    #[serde(default)]
    pub orchestrator_url: String,
    /// Stable worker identity (hostname if unset)
    #[serde(default)]
    pub worker_id: String,
    /// Root under which relative job paths resolve
    #[serde(default)]
    pub nas_mount_path: String,
    /// Staging root for in-flight transcodes
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    /// Sync loop period in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,
    /// Log level: debug|info|warn|error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            orchestrator_url: String::new(),
            worker_id: String::new(),
            nas_mount_path: String::new(),
            temp_dir: default_temp_dir(),
            sync_interval: default_sync_interval(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Parse settings from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    ///
    /// A missing file is not an error: the agent can be configured
    /// entirely through environment variables.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        if !path.as_ref().exists() {
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Apply `WORKER_`-prefixed environment variable overrides.
    ///
    /// Recognized variables:
    /// - WORKER_ORCHESTRATOR_URL
    /// - WORKER_WORKER_ID
    /// - WORKER_NAS_MOUNT_PATH
    /// - WORKER_TEMP_DIR
    /// - WORKER_SYNC_INTERVAL (seconds)
    /// - WORKER_LOG_LEVEL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("WORKER_ORCHESTRATOR_URL") {
            self.orchestrator_url = val;
        }

        if let Ok(val) = env::var("WORKER_WORKER_ID") {
            self.worker_id = val;
        }

        if let Ok(val) = env::var("WORKER_NAS_MOUNT_PATH") {
            self.nas_mount_path = val;
        }

        if let Ok(val) = env::var("WORKER_TEMP_DIR") {
            self.temp_dir = val;
        }

        if let Ok(val) = env::var("WORKER_SYNC_INTERVAL") {
            if let Ok(secs) = val.parse::<u64>() {
                self.sync_interval = secs;
            }
        }

        if let Ok(val) = env::var("WORKER_LOG_LEVEL") {
            self.log_level = val;
        }
    }

    /// Validate required values and fill derived defaults.
    ///
    /// The worker identity falls back to the OS hostname when neither the
    /// file nor the environment provided one.
    pub fn validate(&mut self) -> Result<(), SettingsError> {
        if self.orchestrator_url.is_empty() {
            return Err(SettingsError::Invalid(
                "'orchestrator_url' is required".to_string(),
            ));
        }

        if self.nas_mount_path.is_empty() {
            return Err(SettingsError::Invalid(
                "'nas_mount_path' is required".to_string(),
            ));
        }

        if self.sync_interval == 0 {
            return Err(SettingsError::Invalid(
                "'sync_interval' must be at least 1 second".to_string(),
            ));
        }

        if self.worker_id.is_empty() {
            match sysinfo::System::host_name() {
                Some(hostname) => self.worker_id = hostname,
                None => {
                    return Err(SettingsError::Invalid(
                        "'worker_id' not set and unable to retrieve hostname".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }

    /// Load settings from file, apply environment overrides, and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let mut settings = Self::load_from_file(path)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Sync loop period as a Duration
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }
}
