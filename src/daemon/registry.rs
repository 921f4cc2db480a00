// Registry of live suggestion connections, one per session

use crate::daemon::ipc::IpcResponse;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// Per-session registry of live connections.
///
/// Each subscribed connection owns a writer task fed through a bounded
/// channel. Sending to a session whose connection has failed removes the
/// registration; there are no retries.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, mpsc::Sender<IpcResponse>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session's event channel, replacing any previous one
    pub async fn register(&self, session_id: &str, sender: mpsc::Sender<IpcResponse>) {
        self.connections
            .write()
            .await
            .insert(session_id.to_string(), sender);
        tracing::info!("Live connection registered for session {}", session_id);
    }

    /// Remove a session's registration
    pub async fn unregister(&self, session_id: &str) {
        if self.connections.write().await.remove(session_id).is_some() {
            tracing::info!("Live connection removed for session {}", session_id);
        }
    }

    /// Push an event to a session's connection.
    ///
    /// Returns false (and unregisters) when the connection is gone.
    pub async fn send(&self, session_id: &str, event: IpcResponse) -> bool {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(session_id).cloned()
        };

        let Some(sender) = sender else {
            return false;
        };

        if sender.send(event).await.is_err() {
            tracing::warn!(
                "Live connection for session {} failed, dropping registration",
                session_id
            );
            self.unregister(session_id).await;
            return false;
        }

        true
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_send_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);

        registry.register("s1", tx).await;
        assert_eq!(registry.len().await, 1);

        assert!(registry.send("s1", IpcResponse::success("hello")).await);
        let event = rx.recv().await.unwrap();
        assert!(event.success);

        registry.unregister("s1").await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_send_to_unknown_session() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send("nope", IpcResponse::success("hello")).await);
    }

    #[tokio::test]
    async fn test_failed_send_removes_registration() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        registry.register("s1", tx).await;

        // Receiver gone: the next send must fail and drop the registration
        drop(rx);
        assert!(!registry.send("s1", IpcResponse::success("hello")).await);
        assert!(registry.is_empty().await);
    }
}
