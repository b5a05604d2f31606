use log::info;
use tokio::sync::broadcast;

/// Fans the process-wide termination signal out to every listener and every
/// in-flight relay connection. Each of them holds a receiver and consumes it
/// inside its own select loop.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Trigger shutdown when the process receives Ctrl-C (or SIGTERM on Unix).
    pub fn listen_for_signals(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("termination signal received, stopping listeners");
            let _ = tx.send(());
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
