use crate::config::{GuardConfig, Scope};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Resolved locations of the two named objects shared by every instance.
///
/// All instances of an application must resolve the same `InstanceNames`,
/// otherwise they will not see each other. The names are namespaced with the
/// application id so unrelated applications never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceNames {
    app_id: String,
    scope: Scope,
    root: PathBuf,
    lock_name: String,
    wake_name: String,
}

impl InstanceNames {
    /// Resolve names from config, reading `$XDG_RUNTIME_DIR` from the environment.
    pub fn from_config(config: &GuardConfig) -> Self {
        Self::resolve(config, std::env::var_os("XDG_RUNTIME_DIR"))
    }

    pub(crate) fn resolve(config: &GuardConfig, xdg_runtime_dir: Option<OsString>) -> Self {
        let instance = &config.instance;
        let root = match &instance.runtime_dir {
            Some(dir) => dir.clone(),
            None => default_runtime_dir(instance.scope, xdg_runtime_dir),
        };
        Self {
            app_id: instance.app_id.clone(),
            scope: instance.scope,
            root,
            lock_name: instance.lock_name(),
            wake_name: instance.wake_name(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Directory holding both objects.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the instance lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join(&self.lock_name)
    }

    /// Path to the wake event FIFO.
    pub fn wake(&self) -> PathBuf {
        self.root.join(&self.wake_name)
    }

    /// Permission bits for objects created under this scope.
    pub(crate) fn mode(&self) -> u32 {
        match self.scope {
            Scope::Session => 0o600,
            Scope::Machine => 0o666,
        }
    }

    /// Create the runtime directory if it is missing.
    pub fn ensure_root(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

/// Session scope prefers the per-user runtime dir; machine scope always uses
/// the shared temp dir.
fn default_runtime_dir(scope: Scope, xdg_runtime_dir: Option<OsString>) -> PathBuf {
    match scope {
        Scope::Session => xdg_runtime_dir
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .unwrap_or_else(std::env::temp_dir),
        Scope::Machine => std::env::temp_dir(),
    }
}
