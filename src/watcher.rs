/// Background watcher: waits on the wake event and forwards each raise to
/// the host's foreground callback through a [`Dispatcher`].
///
/// Runs only in the primary. Stops once the shared disposal flag is set;
/// the flag is checked every poll interval, and setting it also writes to a
/// socket the wait is polling, so shutdown normally takes effect immediately.
use crate::dispatch::{Dispatcher, OnWake};
use crate::wake::{WaitOutcome, WakeEvent};
use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

pub(crate) const THREAD_NAME: &str = "instance-guard-watcher";

/// Disposal flag plus a socket pair that makes the watcher's wait return early.
#[derive(Debug)]
pub(crate) struct Shutdown {
    disposed: AtomicBool,
    listen: UnixStream,
    notify: UnixStream,
}

impl Shutdown {
    pub(crate) fn new() -> std::io::Result<Self> {
        let (listen, notify) = UnixStream::pair()?;
        Ok(Self {
            disposed: AtomicBool::new(false),
            listen,
            notify,
        })
    }

    /// Set the flag. Returns true only for the call that flipped it.
    pub(crate) fn trigger(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = (&self.notify).write_all(&[1]) {
            // The flag alone still stops the loop within one poll interval.
            debug!(error = %e, "failed to notify watcher of shutdown");
        }
        true
    }

    pub(crate) fn is_set(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn listener(&self) -> BorrowedFd<'_> {
        self.listen.as_fd()
    }
}

/// Start the watcher thread. Takes ownership of the primary's wake handle.
pub(crate) fn spawn(
    wake: WakeEvent,
    shutdown: Arc<Shutdown>,
    poll_interval: Duration,
    dispatcher: Arc<dyn Dispatcher>,
    on_wake: OnWake,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || run(wake, &shutdown, poll_interval, dispatcher.as_ref(), &on_wake))
}

fn run(
    wake: WakeEvent,
    shutdown: &Shutdown,
    poll_interval: Duration,
    dispatcher: &dyn Dispatcher,
    on_wake: &OnWake,
) {
    debug!(
        path = %wake.path().display(),
        poll_interval_ms = poll_interval.as_millis() as u64,
        "watcher started"
    );

    let mut wakes: u64 = 0;
    while !shutdown.is_set() {
        match wake.wait(poll_interval, Some(shutdown.listener())) {
            Ok(WaitOutcome::Signaled) => {
                if shutdown.is_set() {
                    break;
                }
                wakes += 1;
                info!(wakes, "wake signal received, requesting foreground");
                let on_wake = Arc::clone(on_wake);
                dispatcher.dispatch(Box::new(move || on_wake()));
            }
            Ok(WaitOutcome::TimedOut) => {}
            Ok(WaitOutcome::Cancelled) => break,
            Err(e) => {
                error!(
                    error = %e,
                    path = %wake.path().display(),
                    "wake event wait failed, watcher exiting"
                );
                return;
            }
        }
    }

    // Raises that lost the race with shutdown must not reach the next primary,
    // which may already have this FIFO open.
    match wake.discard_pending() {
        Ok(0) => {}
        Ok(n) => debug!(discarded = n, "dropped raises pending at shutdown"),
        Err(e) => debug!(error = %e, "failed to drain wake event at shutdown"),
    }
    debug!(wakes, "watcher stopped");
}
