use crate::config::ConfigError;
use std::path::PathBuf;

/// Errors returned by [`crate::InstanceGuard::force_single_instance`].
#[derive(Debug)]
pub enum GuardError {
    /// Another process already holds the instance lock. The wake event has
    /// been raised; the caller must terminate without starting up.
    AlreadyRunning { wake_path: PathBuf },
    /// An OS synchronization call failed. Not retried.
    Primitive {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config failed validation before any object was touched.
    Config(ConfigError),
}

impl GuardError {
    /// True for the expected "another instance owns the lock" outcome.
    pub fn is_already_running(&self) -> bool {
        matches!(self, GuardError::AlreadyRunning { .. })
    }

    pub(crate) fn primitive(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GuardError::Primitive {
            op,
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::AlreadyRunning { wake_path } => {
                write!(
                    f,
                    "another instance is already running (woken via {})",
                    wake_path.display()
                )
            }
            GuardError::Primitive { op, path, source } => {
                write!(f, "failed to {op} {}: {source}", path.display())
            }
            GuardError::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GuardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GuardError::AlreadyRunning { .. } => None,
            GuardError::Primitive { source, .. } => Some(source),
            GuardError::Config(e) => Some(e),
        }
    }
}

impl From<ConfigError> for GuardError {
    fn from(e: ConfigError) -> Self {
        GuardError::Config(e)
    }
}
