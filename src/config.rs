use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "instance-guard.toml";

/// Names that end up as file names under the runtime directory.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").unwrap());

/// Top-level configuration loaded from instance-guard.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct GuardConfig {
    pub instance: InstanceConfig,
    pub watcher: WatcherConfig,
    pub host: HostConfig,
}

/// Visibility of the named objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One primary per login session (`$XDG_RUNTIME_DIR`).
    Session,
    /// One primary per machine, shared by every user.
    Machine,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Vendor/application identifier used to namespace both names.
    pub app_id: String,
    pub scope: Scope,
    pub runtime_dir: Option<PathBuf>,
    pub lock_name: Option<String>,
    pub wake_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct HostConfig {
    /// Command run by the CLI host each time the foreground action fires.
    pub on_wake: Vec<String>,
}

// --- Default implementations ---

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_id: "instance-guard".to_string(),
            scope: Scope::Session,
            runtime_dir: None,
            lock_name: None,
            wake_name: None,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl InstanceConfig {
    /// File name of the instance lock (`<app_id>.lock` unless overridden).
    pub fn lock_name(&self) -> String {
        self.lock_name
            .clone()
            .unwrap_or_else(|| format!("{}.lock", self.app_id))
    }

    /// File name of the wake event (`<app_id>.wake` unless overridden).
    pub fn wake_name(&self) -> String {
        self.wake_name
            .clone()
            .unwrap_or_else(|| format!("{}.wake", self.app_id))
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl GuardConfig {
    /// Config for `app_id` with every other field defaulted.
    pub fn for_app(app_id: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.instance.app_id = app_id.into();
        config
    }

    /// Check names and intervals before anything touches the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("instance.app_id", self.instance.app_id.clone()),
            ("instance.lock_name", self.instance.lock_name()),
            ("instance.wake_name", self.instance.wake_name()),
        ] {
            if !NAME_PATTERN.is_match(&value) {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "{field} {value:?} must be 1-128 characters of [A-Za-z0-9._-] starting with an alphanumeric"
                    ),
                });
            }
        }

        if self.instance.lock_name() == self.instance.wake_name() {
            return Err(ConfigError::Invalid {
                reason: "instance.lock_name and instance.wake_name must differ".to_string(),
            });
        }

        if self.watcher.poll_interval_ms == 0 || self.watcher.poll_interval_ms > u16::MAX as u64 {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "watcher.poll_interval_ms must be between 1 and {}, got {}",
                    u16::MAX,
                    self.watcher.poll_interval_ms
                ),
            });
        }

        Ok(())
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(GuardConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let config: GuardConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Errors that can occur while loading configuration.
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
    Invalid {
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid { reason } => write!(f, "invalid config: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}
