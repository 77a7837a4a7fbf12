use futures::future;
use tokio::select;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Watches for SIGINT/SIGTERM so an evicted or interrupted taskmaster can
/// tear down what it created before exiting.
pub(crate) struct Shutdown {
    rx: watch::Receiver<Option<&'static str>>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            rx: spawn_shutdown_listener(),
        }
    }

    /// Resolves with the signal name once one arrives; pends forever
    /// otherwise.
    pub(crate) async fn wait(&mut self) -> &'static str {
        loop {
            let received = *self.rx.borrow_and_update();
            if let Some(signal) = received {
                return signal;
            }
            if self.rx.changed().await.is_err() {
                // Listener gone without ever signalling.
                future::pending::<()>().await;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_shutdown_listener() -> watch::Receiver<Option<&'static str>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(None);

    tokio::spawn(async move {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).ok();

        let term_future = async {
            if let Some(ref mut sigterm) = sigterm {
                sigterm.recv().await;
                Some("SIGTERM")
            } else {
                future::pending::<Option<&'static str>>().await
            }
        };

        select! {
            res = signal::ctrl_c() => {
                if res.is_ok() {
                    info!("Received SIGINT.");
                    let _ = shutdown_tx.send(Some("SIGINT"));
                } else {
                    warn!("Failed to listen for SIGINT: {:?}", res.err());
                }
            }
            _ = term_future => {
                info!("Received SIGTERM.");
                let _ = shutdown_tx.send(Some("SIGTERM"));
            }
        }
    });

    shutdown_rx
}
