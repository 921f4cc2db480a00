// Daemon module: background service hosting the chat, prediction, and
// speculation components behind a Unix socket

mod ipc;
mod process;
mod registry;
mod signals;

pub use ipc::{read_frame, write_frame, IpcClient, IpcRequest, IpcResponse, IpcServer};
pub use process::ProcessManager;
pub use registry::ConnectionRegistry;
pub use signals::{DaemonSignal, SignalHandler};

use crate::cache::{CacheKind, CacheStore};
use crate::chat::ChatService;
use crate::config::Config;
use crate::embedding::{EmbeddingProvider, FastEmbedProvider};
use crate::error::{PresageError, Result};
use crate::index::VectorIndex;
use crate::ingest::DocumentIngestor;
use crate::llm::{ChatMessage, LanguageModel, OpenAiClient, Role};
use crate::predictor::{ContextAnalyzer, IntentPredictor};
use crate::speculation::{AnswerGenerator, AnswerMatcher, SpeculationPipeline, TopicExpander};
use crate::storage::{StorageManager, StoredMessage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task;

/// Suggestions below this confidence are not worth pushing to a live client
const SUGGESTION_MIN_CONFIDENCE: f32 = 0.5;

/// Live inputs shorter than this (trimmed) are ignored
const SUGGESTION_MIN_INPUT_CHARS: usize = 3;

/// Process-wide component graph shared by every connection
pub struct AppState {
    config: Config,
    storage: Arc<StorageManager>,
    cache: Arc<CacheStore>,
    llm: Arc<OpenAiClient>,
    index: Arc<RwLock<VectorIndex>>,
    predictor: IntentPredictor,
    expander: TopicExpander,
    pipeline: SpeculationPipeline,
    chat: ChatService,
    ingestor: DocumentIngestor,
    analyzer: ContextAnalyzer,
    registry: ConnectionRegistry,
}

impl AppState {
    /// Construct and wire every component once, at startup
    pub fn build(config: Config) -> Result<Self> {
        let data_dir = expand_tilde(&config.storage.data_dir);
        let storage = Arc::new(StorageManager::new(data_dir)?);
        let database = storage.database.clone();

        let cache = Arc::new(CacheStore::from_config(&config.cache));

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            FastEmbedProvider::new(&config.embedding.model)
                .map_err(|e| PresageError::Config(format!("Embedder init failed: {}", e)))?,
        );

        let index = Arc::new(RwLock::new(VectorIndex::open(
            embedder,
            config.index.similarity_threshold,
            Some(storage.index_dir()),
        )));

        let llm = Arc::new(OpenAiClient::from_config(&config.llm).map_err(|e| {
            PresageError::Config(format!("Language model client init failed: {}", e))
        })?);
        let model: Arc<dyn LanguageModel> = llm.clone();

        let predictor = IntentPredictor::new(model.clone(), config.prediction.clone());
        let expander = TopicExpander::new(model.clone(), index.clone(), config.index.clone());
        let generator = AnswerGenerator::new(
            model.clone(),
            index.clone(),
            config.llm.clone(),
            config.prediction.clone(),
        );

        let pipeline = SpeculationPipeline::new(
            IntentPredictor::new(model.clone(), config.prediction.clone()),
            TopicExpander::new(model.clone(), index.clone(), config.index.clone()),
            generator,
            cache.clone(),
            database.clone(),
            config.prediction.clone(),
            config.cache.clone(),
        );

        let matcher = AnswerMatcher::new(cache.clone(), database.clone(), config.prediction.clone());
        let chat = ChatService::new(
            model.clone(),
            index.clone(),
            matcher,
            cache.clone(),
            database,
            config.llm.clone(),
            config.index.clone(),
            config.cache.clone(),
        );

        let ingestor = DocumentIngestor::new(index.clone());
        let analyzer = ContextAnalyzer::new(model);

        Ok(Self {
            config,
            storage,
            cache,
            llm,
            index,
            predictor,
            expander,
            pipeline,
            chat,
            ingestor,
            analyzer,
            registry: ConnectionRegistry::new(),
        })
    }
}

/// Main daemon struct that manages the lifecycle and components
pub struct Daemon {
    config: Config,
    process_manager: ProcessManager,
    state: Arc<AppState>,
    ipc_server: Option<IpcServer>,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: Config) -> Result<Self> {
        let pid_file = expand_tilde(&config.daemon.pid_file);
        let process_manager = ProcessManager::new(pid_file);

        let state = Arc::new(AppState::build(config.clone())?);

        Ok(Self {
            config,
            process_manager,
            state,
            ipc_server: None,
        })
    }

    /// Run the daemon in the foreground
    pub async fn run_foreground(&mut self) -> Result<()> {
        self.process_manager.acquire()?;

        tracing::info!("Daemon starting in foreground mode");

        let pm = self.process_manager.clone();
        let cleanup = move || {
            if let Err(e) = pm.release() {
                tracing::error!("Failed to cleanup on exit: {}", e);
            }
        };

        let mut signal_handler = SignalHandler::new()?;

        let socket_path = expand_tilde(&self.config.daemon.socket_path);
        let mut ipc_server = IpcServer::new(socket_path);
        ipc_server.bind().await?;
        self.ipc_server = Some(ipc_server);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tracing::info!("Daemon started successfully");

        loop {
            tokio::select! {
                Ok(stream) = self.ipc_server.as_mut().unwrap().accept() => {
                    let state = self.state.clone();
                    let shutdown = shutdown_tx.clone();
                    task::spawn(async move {
                        if let Err(e) = handle_connection(stream, state, shutdown).await {
                            tracing::error!("Client handler error: {}", e);
                        }
                    });
                }

                sig = signal_handler.wait() => {
                    tracing::info!("Received {:?}, shutting down", sig);
                    break;
                }

                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown requested over IPC");
                    break;
                }
            }
        }

        self.shutdown()?;
        cleanup();

        Ok(())
    }

    /// Start the daemon as a background process
    pub fn start_daemon(&mut self) -> Result<()> {
        if self.process_manager.is_running() {
            return Err(PresageError::Daemon(
                "Daemon is already running".to_string(),
            ));
        }

        let log_file = expand_tilde(&self.config.daemon.log_file);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PresageError::Io {
                source: e,
                context: format!("Failed to create log directory: {:?}", parent),
            })?;
        }

        let stdout_log =
            std::fs::File::create(log_file.with_extension("stdout")).map_err(|e| {
                PresageError::Io {
                    source: e,
                    context: "Failed to create stdout log file".to_string(),
                }
            })?;
        let stderr_log =
            std::fs::File::create(log_file.with_extension("stderr")).map_err(|e| {
                PresageError::Io {
                    source: e,
                    context: "Failed to create stderr log file".to_string(),
                }
            })?;

        // PID and lock files are the ProcessManager's job, inside the child
        let daemon = daemonize::Daemonize::new()
            .working_directory(std::env::current_dir().map_err(|e| PresageError::Io {
                source: e,
                context: "Failed to get current directory".to_string(),
            })?)
            .stdout(stdout_log)
            .stderr(stderr_log);

        daemon
            .start()
            .map_err(|e| PresageError::Daemon(format!("Failed to daemonize: {}", e)))?;

        // In the daemon process now, start the runtime
        let runtime = tokio::runtime::Runtime::new().map_err(|e| PresageError::Io {
            source: e,
            context: "Failed to create tokio runtime".to_string(),
        })?;
        runtime.block_on(async {
            if let Err(e) = self.run_foreground().await {
                tracing::error!("Daemon error: {}", e);
            }
        });

        Ok(())
    }

    /// Shutdown the daemon gracefully
    fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down daemon");

        if let Some(ipc_server) = self.ipc_server.take() {
            ipc_server.shutdown()?;
        }

        tracing::info!("Daemon shutdown complete");

        Ok(())
    }
}

/// Handle a client connection: either a one-shot request/response exchange
/// or a long-lived live suggestion session
async fn handle_connection(
    mut stream: UnixStream,
    state: Arc<AppState>,
    shutdown: mpsc::Sender<()>,
) -> Result<()> {
    let request: IpcRequest = read_frame(&mut stream).await?;

    if let IpcRequest::Subscribe { session_id } = request {
        return live_session(stream, state, session_id).await;
    }

    let response = dispatch(&state, request, &shutdown).await;
    write_frame(&mut stream, &response).await?;

    Ok(())
}

/// Process one request against the component graph
async fn dispatch(
    state: &AppState,
    request: IpcRequest,
    shutdown: &mpsc::Sender<()>,
) -> IpcResponse {
    match request {
        IpcRequest::Chat {
            session_id,
            message,
        } => match state.chat.respond(&session_id, &message).await {
            Ok(reply) => IpcResponse::success_with_data(
                serde_json::to_value(reply).unwrap_or_default(),
            ),
            Err(e) => IpcResponse::error(format!("Chat failed: {}", e)),
        },

        IpcRequest::Predict { session_id } => {
            let history = match state.storage.database.get_messages(&session_id) {
                Ok(messages) => to_chat_messages(&messages),
                Err(e) => return IpcResponse::error(format!("{}", e)),
            };

            match state.pipeline.run(&session_id, &history).await {
                Ok(outcome) => IpcResponse::success_with_data(
                    serde_json::to_value(outcome).unwrap_or_default(),
                ),
                Err(e) => IpcResponse::error(format!("Prediction failed: {}", e)),
            }
        }

        IpcRequest::Answer { answer_id } => {
            match state
                .cache
                .get::<crate::speculation::SpeculativeAnswer>(CacheKind::Answer, &answer_id)
            {
                Some(answer) => IpcResponse::success_with_data(
                    serde_json::to_value(answer).unwrap_or_default(),
                ),
                None => IpcResponse::error(format!(
                    "{}",
                    PresageError::AnswerNotFound { id: answer_id }
                )),
            }
        }

        IpcRequest::Query { query, limit } => {
            let k = if limit == 0 {
                state.config.index.top_k
            } else {
                limit
            };
            match state.chat.query(&query, k).await {
                Ok(hits) => IpcResponse::success_with_data(serde_json::json!({
                    "query": query,
                    "results": hits,
                })),
                Err(e) => IpcResponse::error(format!("Query failed: {}", e)),
            }
        }

        IpcRequest::Ingest { path } => match state.ingestor.ingest_file(&path).await {
            Ok(report) => IpcResponse::success_with_data(
                serde_json::to_value(report).unwrap_or_default(),
            ),
            Err(e) => IpcResponse::error(format!("Ingestion failed: {}", e)),
        },

        IpcRequest::Documents => {
            let index = state.index.read().await;
            IpcResponse::success_with_data(serde_json::json!({
                "documents": index.document_names(),
                "chunks": index.len(),
            }))
        }

        IpcRequest::History { session_id } => {
            match state.storage.database.get_messages(&session_id) {
                Ok(messages) => IpcResponse::success_with_data(serde_json::json!({
                    "session_id": session_id,
                    "messages": messages,
                })),
                Err(e) => IpcResponse::error(format!("{}", e)),
            }
        }

        IpcRequest::Sessions { limit } => match state.storage.database.list_sessions(limit) {
            Ok(sessions) => IpcResponse::success_with_data(serde_json::json!({
                "sessions": sessions,
            })),
            Err(e) => IpcResponse::error(format!("Listing sessions failed: {}", e)),
        },

        IpcRequest::DeleteSession { session_id } => {
            match state.storage.database.delete_session(&session_id) {
                Ok(()) => IpcResponse::success(format!("Session {} deleted", session_id)),
                Err(e) => IpcResponse::error(format!("{}", e)),
            }
        }

        IpcRequest::Context => {
            let messages = state
                .storage
                .database
                .recent_user_messages(5)
                .unwrap_or_default();
            let digest = state.analyzer.analyze(&messages).await;
            IpcResponse::success_with_data(serde_json::to_value(digest).unwrap_or_default())
        }

        IpcRequest::Status => {
            let stats = state.storage.database.stats().ok();
            let index_len = state.index.read().await.len();
            IpcResponse::success_with_data(serde_json::json!({
                "daemon": "running",
                "llm_configured": state.llm.is_configured(),
                "cache_enabled": state.cache.is_enabled(),
                "indexed_chunks": index_len,
                "live_connections": state.registry.len().await,
                "storage": stats,
            }))
        }

        IpcRequest::Stop => {
            let _ = shutdown.send(()).await;
            IpcResponse::success("Shutdown initiated")
        }

        IpcRequest::Subscribe { .. } | IpcRequest::Suggest { .. } => {
            IpcResponse::error("Subscribe/Suggest are only valid on live connections")
        }
    }
}

/// Drive one live suggestion session over its long-lived connection
async fn live_session(stream: UnixStream, state: Arc<AppState>, session_id: String) -> Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();

    let (event_tx, mut event_rx) = mpsc::channel::<IpcResponse>(32);
    state.registry.register(&session_id, event_tx).await;

    // Writer task: one owner for the write half. A failed write ends the
    // task, which closes the channel and unregisters on the next send.
    let writer = task::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if write_frame(&mut write_half, &event).await.is_err() {
                break;
            }
        }
    });

    state
        .registry
        .send(&session_id, IpcResponse::success("subscribed"))
        .await;

    loop {
        match read_frame::<_, IpcRequest>(&mut read_half).await {
            Ok(IpcRequest::Suggest {
                session_id: suggest_session,
                current_input,
            }) => {
                handle_suggest(&state, &suggest_session, &current_input).await;
            }
            Ok(other) => {
                tracing::debug!("Ignoring non-suggest request on live connection: {:?}", other);
            }
            Err(_) => break,
        }
    }

    state.registry.unregister(&session_id).await;
    writer.abort();

    Ok(())
}

/// React to a conversation snapshot from a live client: push a suggestion
/// when the predictor is reasonably confident, and run full speculation
/// when it clears the gate
async fn handle_suggest(state: &AppState, session_id: &str, current_input: &str) {
    if current_input.trim().chars().count() < SUGGESTION_MIN_INPUT_CHARS {
        return;
    }

    let history = match state.storage.database.get_messages(session_id) {
        Ok(messages) => to_chat_messages(&messages),
        Err(e) => {
            tracing::debug!("No history for live session {}: {}", session_id, e);
            return;
        }
    };
    if history.is_empty() {
        return;
    }

    let prediction = state.predictor.predict(&history).await;
    if prediction.confidence < SUGGESTION_MIN_CONFIDENCE {
        return;
    }

    let topics = state
        .expander
        .expand_topics(&prediction.predicted_question)
        .await;

    state
        .registry
        .send(
            session_id,
            IpcResponse::success_with_data(serde_json::json!({
                "type": "suggestion",
                "predicted_question": prediction.predicted_question,
                "confidence": prediction.confidence,
                "topics": topics,
            })),
        )
        .await;

    if prediction.confidence >= state.config.prediction.confidence_threshold {
        let (_planned, answer_id) = state
            .pipeline
            .speculate(session_id, &prediction, &topics)
            .await;

        if let Some(answer_id) = answer_id {
            state
                .registry
                .send(
                    session_id,
                    IpcResponse::success_with_data(serde_json::json!({
                        "type": "answer_ready",
                        "answer_id": answer_id,
                        "predicted_question": prediction.predicted_question,
                    })),
                )
                .await;
        }
    }
}

fn to_chat_messages(stored: &[StoredMessage]) -> Vec<ChatMessage> {
    stored
        .iter()
        .filter_map(|message| {
            let role = match message.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => return None,
            };
            Some(ChatMessage {
                role,
                content: message.content.clone(),
            })
        })
        .collect()
}

/// Expand tilde in path
fn expand_tilde(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap());
        }
    }
    path.to_path_buf()
}
