/// Hand-off from the watcher thread to whatever context owns the host UI.
use std::sync::Arc;
use tokio::sync::mpsc;

/// A unit of work scheduled onto the UI context.
pub type ForegroundAction = Box<dyn FnOnce() + Send + 'static>;

/// The host's "bring the window to the front" callback.
pub type OnWake = Arc<dyn Fn() + Send + Sync + 'static>;

/// Schedules actions onto the host's UI context, fire-and-forget.
///
/// Implementations must not block waiting for the action to run.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, action: ForegroundAction);
}

/// Runs the action immediately on the calling (watcher) thread.
///
/// For headless hosts whose foreground action is thread-safe.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, action: ForegroundAction) {
        action();
    }
}

/// Queues actions on a tokio channel; the UI loop drains the receiver and
/// runs each action in its own context.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<ForegroundAction>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ForegroundAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, action: ForegroundAction) {
        if self.tx.send(action).is_err() {
            tracing::warn!("UI loop is gone, dropping foreground request");
        }
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn dispatch(&self, action: ForegroundAction) {
        (**self).dispatch(action);
    }
}
