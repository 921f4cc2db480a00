// Unix signal wait loop for daemon shutdown

use crate::error::{PresageError, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signals the daemon reacts to. Each of them stops the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    Terminate,
    Interrupt,
    Hangup,
}

/// One awaitable source for all shutdown-relevant Unix signals
pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    /// Resolve when any handled signal arrives
    pub async fn wait(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigterm.recv() => DaemonSignal::Terminate,
            _ = self.sigint.recv() => DaemonSignal::Interrupt,
            _ = self.sighup.recv() => DaemonSignal::Hangup,
        }
    }
}

fn install(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind).map_err(|e| PresageError::Io {
        source: e,
        context: format!("Failed to install {} handler", name),
    })
}
