//! Signal handling for configuration reload and shutdown.
//!
//! SIGHUP requests a reload, SIGTERM and SIGINT request a graceful shutdown.
//! Signals arrive on an async channel so the CLI can `select!` on them next
//! to its input stream.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a received signal asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Reload configuration (SIGHUP)
    Reload,
    /// Graceful shutdown (SIGTERM/SIGINT)
    Shutdown,
}

/// Receives OS signals as [`SignalType`] values.
#[derive(Debug)]
pub struct SignalManager {
    tx: mpsc::Sender<SignalType>,
    rx: mpsc::Receiver<SignalType>,
}

impl SignalManager {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(8);
        Self { tx, rx }
    }

    /// Sender for injecting signals, used by tests and by the listener task.
    pub fn sender(&self) -> mpsc::Sender<SignalType> {
        self.tx.clone()
    }

    /// Spawn the task that listens for OS signals.
    #[cfg(unix)]
    pub fn listen(&self) -> std::io::Result<tokio::task::JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let tx = self.sender();

        Ok(tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = hangup.recv() => {
                        info!("Received SIGHUP, triggering configuration reload");
                        SignalType::Reload
                    }
                    _ = terminate.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                        SignalType::Shutdown
                    }
                    _ = interrupt.recv() => {
                        info!("Received SIGINT, initiating graceful shutdown");
                        SignalType::Shutdown
                    }
                };
                if tx.send(signal).await.is_err() {
                    debug!("Signal receiver dropped, stopping listener");
                    break;
                }
            }
        }))
    }

    #[cfg(not(unix))]
    pub fn listen(&self) -> std::io::Result<tokio::task::JoinHandle<()>> {
        let tx = self.sender();
        Ok(tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Received Ctrl-C, initiating graceful shutdown");
            let _ = tx.send(SignalType::Shutdown).await;
        }))
    }

    /// Next signal, or `None` when every sender is gone.
    pub async fn recv(&mut self) -> Option<SignalType> {
        let signal = self.rx.recv().await;
        if let Some(s) = signal {
            debug!(signal = ?s, "Received signal");
        }
        signal
    }

    pub fn try_recv(&mut self) -> Option<SignalType> {
        match self.rx.try_recv() {
            Ok(signal) => Some(signal),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                warn!("Signal channel disconnected");
                None
            }
        }
    }
}

impl Default for SignalManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_signals_arrive_in_order() {
        let mut manager = SignalManager::new();
        let tx = manager.sender();
        tx.send(SignalType::Reload).await.unwrap();
        tx.send(SignalType::Shutdown).await.unwrap();

        assert_eq!(manager.recv().await, Some(SignalType::Reload));
        assert_eq!(manager.try_recv(), Some(SignalType::Shutdown));
        assert_eq!(manager.try_recv(), None);
    }
}
