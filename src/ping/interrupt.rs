use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Turns SIGINT / SIGTERM into a one-shot cancellation of the session token
///
/// The listener task is aborted when the bridge is dropped.
#[derive(Debug)]
pub struct InterruptBridge {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl InterruptBridge {
    /// Spawn the signal listener. Must be called from within a tokio runtime.
    pub fn install(cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                signal = wait_for_signal() => {
                    debug!(signal, "termination requested");
                    token.cancel();
                }
            }
        });
        Self { cancel, handle }
    }

    /// Token to hand to the session
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for InterruptBridge {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Resolve with the name of the first termination signal received
async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                None
            }
        };

        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => "SIGINT",
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGINT");
                    std::future::pending().await
                }
            },
            _ = async {
                match term.as_mut() {
                    Some(s) => { s.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!(error = %e, "cannot listen for interrupts");
                std::future::pending().await
            }
        }
    }
}
