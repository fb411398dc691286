/// The single-instance guard.
///
/// A process calls [`InstanceGuard::force_single_instance`] once during
/// startup. The primary gets a guard back and keeps it for the life of the
/// process; every later launch gets [`GuardError::AlreadyRunning`] after
/// raising the wake event, and must exit without starting up.
use crate::config::GuardConfig;
use crate::dispatch::{Dispatcher, OnWake};
use crate::error::GuardError;
use crate::lock::{Acquire, InstanceLock, LockRecord};
use crate::names::InstanceNames;
use crate::wake::WakeEvent;
use crate::watcher::{self, Shutdown};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle of a guard held by the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Owns the instance lock; the watcher is running.
    Active,
    /// Lock released and the watcher told to stop.
    Disposed,
}

/// Ownership of the instance lock plus the watcher forwarding wake signals.
#[derive(Debug)]
pub struct InstanceGuard {
    names: InstanceNames,
    lock: Option<InstanceLock>,
    shutdown: Arc<Shutdown>,
    watcher: Option<JoinHandle<()>>,
}

impl InstanceGuard {
    /// Become the primary instance or wake the existing one.
    ///
    /// On success the watcher is running and `on_wake` will be scheduled
    /// through `dispatcher` every time a later launch raises the wake event.
    /// Acquisition is attempted exactly once.
    pub fn force_single_instance<D, F>(
        config: &GuardConfig,
        dispatcher: D,
        on_wake: F,
    ) -> Result<Self, GuardError>
    where
        D: Dispatcher,
        F: Fn() + Send + Sync + 'static,
    {
        config.validate()?;
        Self::force_with_names(
            InstanceNames::from_config(config),
            config.watcher.poll_interval(),
            Arc::new(dispatcher),
            Arc::new(on_wake),
        )
    }

    fn force_with_names(
        names: InstanceNames,
        poll_interval: Duration,
        dispatcher: Arc<dyn Dispatcher>,
        on_wake: OnWake,
    ) -> Result<Self, GuardError> {
        names
            .ensure_root()
            .map_err(|e| GuardError::primitive("create runtime dir", names.root(), e))?;

        // Opened before the lock attempt so a secondary that sees the lock
        // held always writes into a FIFO the primary already has open.
        let wake_path = names.wake();
        let wake = WakeEvent::open_or_create(&wake_path, names.mode())
            .map_err(|e| GuardError::primitive("open wake event", &wake_path, e))?;

        let lock_path = names.lock();
        let acquired = InstanceLock::try_acquire(&lock_path, names.mode())
            .map_err(|e| GuardError::primitive("acquire instance lock", &lock_path, e))?;

        let mut lock = match acquired {
            Acquire::Acquired(lock) => lock,
            Acquire::Contended => {
                wake.set()
                    .map_err(|e| GuardError::primitive("raise wake event", &wake_path, e))?;
                info!(
                    app_id = names.app_id(),
                    lock = %lock_path.display(),
                    "another instance is running, raised wake event"
                );
                return Err(GuardError::AlreadyRunning { wake_path });
            }
        };

        if let Err(e) = lock.write_record(&LockRecord::for_current_process(names.app_id())) {
            warn!(error = %e, lock = %lock.path().display(), "failed to write lock record");
        }

        let shutdown = Arc::new(
            Shutdown::new()
                .map_err(|e| GuardError::primitive("create shutdown pipe for", &wake_path, e))?,
        );
        let watcher = watcher::spawn(
            wake,
            Arc::clone(&shutdown),
            poll_interval,
            dispatcher,
            on_wake,
        )
        .map_err(|e| GuardError::primitive("spawn watcher for", &wake_path, e))?;

        info!(
            app_id = names.app_id(),
            lock = %lock.path().display(),
            "acquired instance lock, running as primary"
        );

        Ok(Self {
            names,
            lock: Some(lock),
            shutdown,
            watcher: Some(watcher),
        })
    }

    /// Release the instance lock and tell the watcher to stop.
    ///
    /// Safe to call more than once. Does not join the watcher; it exits on
    /// its own as soon as it sees the flag.
    pub fn dispose(&mut self) {
        if let Some(lock) = self.lock.take() {
            let path = lock.path().to_path_buf();
            if let Err(e) = lock.release() {
                // Closing the handle still drops the flock.
                warn!(error = %e, lock = %path.display(), "failed to release instance lock cleanly");
            }
            info!(
                app_id = self.names.app_id(),
                lock = %path.display(),
                "released instance lock"
            );
        }
        self.shutdown.trigger();
    }

    pub fn state(&self) -> GuardState {
        if self.lock.is_some() {
            GuardState::Active
        } else {
            GuardState::Disposed
        }
    }

    pub fn names(&self) -> &InstanceNames {
        &self.names
    }

    /// Whether the watcher thread is still running.
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.dispose();
    }
}
