//! Cross-process single-instance guard.
//!
//! The first process to start becomes the primary: it holds a named instance
//! lock and runs a watcher thread. Any later launch finds the lock held,
//! raises a named wake event so the primary can bring its window forward,
//! and is told to exit via [`GuardError::AlreadyRunning`].
//!
//! ```no_run
//! use instance_guard::{ChannelDispatcher, GuardConfig, GuardError, InstanceGuard};
//!
//! let config = GuardConfig::for_app("com.example.viewer");
//! let (dispatcher, _ui_actions) = ChannelDispatcher::new();
//! let _guard = match InstanceGuard::force_single_instance(&config, dispatcher, || {
//!     // raise the main window
//! }) {
//!     Ok(guard) => guard,
//!     Err(GuardError::AlreadyRunning { .. }) => std::process::exit(0),
//!     Err(e) => panic!("{e}"),
//! };
//! ```

#[cfg(not(unix))]
compile_error!("instance-guard relies on flock and named FIFOs and only supports Unix targets");

pub mod config;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod lock;
pub mod names;
pub mod wake;
mod watcher;

pub use config::{load_config, ConfigError, GuardConfig, Scope};
pub use dispatch::{ChannelDispatcher, Dispatcher, ForegroundAction, InlineDispatcher};
pub use error::GuardError;
pub use guard::{GuardState, InstanceGuard};
pub use lock::{read_status, InstanceStatus, LockRecord};
pub use names::InstanceNames;
