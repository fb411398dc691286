/// Signal handling for graceful shutdown of the host loop.
///
/// Handles SIGINT (Ctrl-C) and SIGTERM. Either one ends the UI loop so the
/// guard is disposed and the instance lock released before exit.
use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct SignalHandler {
    interrupt: Signal,
    terminate: Signal,
}

impl SignalHandler {
    /// Must be called from within a tokio runtime.
    pub fn install() -> std::io::Result<SignalHandler> {
        Ok(SignalHandler {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolve on the next SIGINT or SIGTERM, returning its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal as NixSignal};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_is_observed() {
        let mut handler = SignalHandler::install().unwrap();
        raise(NixSignal::SIGTERM).unwrap();
        let name = tokio::time::timeout(Duration::from_secs(2), handler.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGTERM");
    }
}
