// Client/daemon protocol: length-prefixed JSON frames over a Unix socket

use crate::error::{PresageError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Frames larger than this are refused in both directions (10 MB)
const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Requests sent from the CLI (or any local client) to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Handle one chat message for a session
    Chat { session_id: String, message: String },
    /// Run the speculation pipeline over a session's stored history
    Predict { session_id: String },
    /// Upgrade this connection into a live suggestion stream
    Subscribe { session_id: String },
    /// Conversation snapshot from a live-subscribed client
    Suggest {
        session_id: String,
        current_input: String,
    },
    /// Fetch a precomputed answer by its identifier
    Answer { answer_id: String },
    /// Search the document index
    Query { query: String, limit: usize },
    /// Ingest a document file into the index
    Ingest { path: PathBuf },
    /// List indexed source documents
    Documents,
    /// Fetch a session's message log
    History { session_id: String },
    /// List sessions, most recently active first
    Sessions { limit: usize },
    /// Delete a session and its predictions
    DeleteSession { session_id: String },
    /// Summarize recent activity across sessions
    Context,
    /// Daemon status and storage statistics
    Status,
    /// Ask the daemon to shut down
    Stop,
}

/// Response (or pushed event) sent from the daemon to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Listening side of the protocol, bound to a Unix socket path
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind the socket, replacing any stale file a previous daemon left behind
    pub async fn bind(&mut self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PresageError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => tracing::debug!("Removed stale socket {:?}", self.socket_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PresageError::Io {
                    source: e,
                    context: format!("Failed to remove existing socket: {:?}", self.socket_path),
                });
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| PresageError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;
        self.listener = Some(listener);

        tracing::info!("IPC server listening on {:?}", self.socket_path);
        Ok(())
    }

    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| PresageError::Daemon("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| PresageError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;
        Ok(stream)
    }

    /// Remove the socket file on the way down
    pub fn shutdown(&self) -> Result<()> {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PresageError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            }),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

fn check_frame_size(length: usize) -> Result<()> {
    if length > MAX_FRAME_SIZE as usize {
        return Err(PresageError::Daemon(format!(
            "Frame too large: {} bytes (max: {})",
            length, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

fn io_context(context: &str) -> impl FnOnce(std::io::Error) -> PresageError + '_ {
    move |e| PresageError::Io {
        source: e,
        context: context.to_string(),
    }
}

/// Read one length-prefixed JSON frame
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let length = reader
        .read_u32()
        .await
        .map_err(io_context("Failed to read frame length"))?;
    check_frame_size(length as usize)?;

    let mut buffer = vec![0u8; length as usize];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(io_context("Failed to read frame payload"))?;

    serde_json::from_slice(&buffer).map_err(|e| PresageError::Json {
        source: e,
        context: "Failed to deserialize frame".to_string(),
    })
}

/// Write one length-prefixed JSON frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|e| PresageError::Json {
        source: e,
        context: "Failed to serialize frame".to_string(),
    })?;
    check_frame_size(payload.len())?;

    writer
        .write_u32(payload.len() as u32)
        .await
        .map_err(io_context("Failed to write frame length"))?;
    writer
        .write_all(&payload)
        .await
        .map_err(io_context("Failed to write frame payload"))?;
    writer
        .flush()
        .await
        .map_err(io_context("Failed to flush frame"))?;

    Ok(())
}

/// One-shot request client used by the CLI
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Connect, send one request, and return the response
    pub async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| PresageError::Io {
                    source: e,
                    context: format!("Failed to connect to daemon at {:?}", self.socket_path),
                })?;

        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_roundtrip() {
        let request = IpcRequest::Chat {
            session_id: "s1".to_string(),
            message: "what is caching?".to_string(),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"chat\""));

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            IpcRequest::Chat { message, .. } => assert_eq!(message, "what is caching?"),
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_response_constructors() {
        let ok = IpcResponse::success("done");
        assert!(ok.success);
        assert_eq!(ok.message.as_deref(), Some("done"));

        let err = IpcResponse::error("broken");
        assert!(!err.success);

        let with_data = IpcResponse::success_with_data(serde_json::json!({"n": 1}));
        assert!(with_data.data.is_some());
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_socket_pair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();

        let request = IpcRequest::Query {
            query: "eviction".to_string(),
            limit: 5,
        };

        write_frame(&mut a, &request).await.unwrap();
        let received: IpcRequest = read_frame(&mut b).await.unwrap();

        match received {
            IpcRequest::Query { query, limit } => {
                assert_eq!(query, "eviction");
                assert_eq!(limit, 5);
            }
            _ => panic!("Wrong request type"),
        }
    }
}
