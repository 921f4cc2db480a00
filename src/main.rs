use presage::cli::{Cli, Commands, ConfigAction};
use presage::config::Config;
use presage::daemon::{Daemon, IpcClient, IpcRequest, IpcResponse, ProcessManager};
use presage::error::{PresageError, Result};
use uuid::Uuid;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Start {
            foreground,
            profile,
        } => cmd_start(cli.config, foreground, profile)?,
        Commands::Stop => cmd_stop(cli.config)?,
        Commands::Status => cmd_status(cli.config)?,
        Commands::Ask { message, session } => cmd_ask(cli.config, &message, session)?,
        Commands::Predict { session } => cmd_predict(cli.config, &session)?,
        Commands::Answer { id } => cmd_answer(cli.config, &id)?,
        Commands::Query {
            query,
            limit,
            json,
        } => cmd_query(cli.config, &query, limit, json)?,
        Commands::Ingest { file } => cmd_ingest(cli.config, file)?,
        Commands::Documents => cmd_documents(cli.config)?,
        Commands::History { session } => cmd_history(cli.config, &session)?,
        Commands::Sessions { limit } => cmd_sessions(cli.config, limit)?,
        Commands::DeleteSession { session } => cmd_delete_session(cli.config, &session)?,
        Commands::Context => cmd_context(cli.config)?,
        Commands::Config { action } => cmd_config(cli.config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "presage=debug" } else { "presage=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_start(
    config_path: Option<std::path::PathBuf>,
    foreground: bool,
    profile: Option<String>,
) -> Result<()> {
    let config = load_config(config_path, profile)?;

    tracing::info!("Starting presage daemon...");

    let mut daemon = Daemon::new(config)?;

    if foreground {
        let rt = runtime()?;
        rt.block_on(daemon.run_foreground())
    } else {
        println!("✓ Starting presage daemon in the background");
        daemon.start_daemon()
    }
}

fn cmd_stop(config_path: Option<std::path::PathBuf>) -> Result<()> {
    use std::thread::sleep;
    use std::time::Duration;

    let config = load_config(config_path, None)?;
    let pid_file = expand_path(&config.daemon.pid_file)?;

    let pm = ProcessManager::new(pid_file);
    if !pm.is_running() {
        println!("Daemon is not running");
        return Ok(());
    }

    println!("Sending SIGTERM to daemon...");
    pm.signal(nix::sys::signal::Signal::SIGTERM)?;

    for _ in 0..5 {
        sleep(Duration::from_millis(500));
        if !pm.is_running() {
            println!("✓ Daemon stopped gracefully");
            return Ok(());
        }
    }

    println!("Daemon not responding, sending SIGKILL...");
    pm.signal(nix::sys::signal::Signal::SIGKILL)?;
    sleep(Duration::from_millis(500));

    if pm.is_running() {
        println!("⚠ Warning: Daemon may still be running (PID file stale)");
    } else {
        println!("✓ Daemon force killed");
    }

    Ok(())
}

fn cmd_status(config_path: Option<std::path::PathBuf>) -> Result<()> {
    let config = load_config(config_path, None)?;
    let pid_file = expand_path(&config.daemon.pid_file)?;
    let pm = ProcessManager::new(pid_file);

    if !pm.is_running() {
        println!("Daemon: Stopped");
        return Ok(());
    }

    match pm.read_pid() {
        Ok(pid) => println!("Daemon: Running (PID: {})", pid),
        Err(_) => println!("Daemon: Running"),
    }

    let response = send_request(&config, &IpcRequest::Status)?;
    if let Some(data) = response.data {
        println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
    }

    Ok(())
}

fn cmd_ask(
    config_path: Option<std::path::PathBuf>,
    message: &str,
    session: Option<String>,
) -> Result<()> {
    let config = load_config(config_path, None)?;
    let session_id =
        session.unwrap_or_else(|| format!("cli_{}", &Uuid::new_v4().simple().to_string()[..8]));

    let response = send_request(
        &config,
        &IpcRequest::Chat {
            session_id: session_id.clone(),
            message: message.to_string(),
        },
    )?;

    let data = expect_data(response)?;
    let reply = data["reply"].as_str().unwrap_or_default();
    let precomputed = data["precomputed"].as_bool().unwrap_or(false);

    println!("{}", reply);
    if precomputed {
        println!("\n(served from a precomputed answer)");
    }
    println!("\nSession: {}", session_id);

    Ok(())
}

fn cmd_predict(config_path: Option<std::path::PathBuf>, session: &str) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(
        &config,
        &IpcRequest::Predict {
            session_id: session.to_string(),
        },
    )?;

    let data = expect_data(response)?;
    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());

    Ok(())
}

fn cmd_answer(config_path: Option<std::path::PathBuf>, id: &str) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(
        &config,
        &IpcRequest::Answer {
            answer_id: id.to_string(),
        },
    )?;

    let data = expect_data(response)?;
    println!(
        "Q: {}",
        data["source_question"].as_str().unwrap_or_default()
    );
    println!("\n{}", data["answer"].as_str().unwrap_or_default());

    Ok(())
}

fn cmd_query(
    config_path: Option<std::path::PathBuf>,
    query: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(
        &config,
        &IpcRequest::Query {
            query: query.to_string(),
            limit,
        },
    )?;

    let data = expect_data(response)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
        return Ok(());
    }

    let results = data["results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() {
        println!("No results");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{}] (similarity {:.2})",
            i + 1,
            result["metadata"]["name"].as_str().unwrap_or("?"),
            result["similarity"].as_f64().unwrap_or(0.0),
        );
        let text = result["text"].as_str().unwrap_or_default();
        let preview: String = text.chars().take(200).collect();
        println!("   {}\n", preview);
    }

    Ok(())
}

fn cmd_ingest(config_path: Option<std::path::PathBuf>, file: std::path::PathBuf) -> Result<()> {
    let config = load_config(config_path, None)?;

    let file = file.canonicalize().map_err(|e| PresageError::Io {
        source: e,
        context: format!("Cannot resolve document path: {:?}", file),
    })?;

    let response = send_request(&config, &IpcRequest::Ingest { path: file })?;
    let data = expect_data(response)?;

    println!(
        "✓ Indexed {} as {} chunks",
        data["name"].as_str().unwrap_or("?"),
        data["chunks"].as_u64().unwrap_or(0)
    );

    Ok(())
}

fn cmd_documents(config_path: Option<std::path::PathBuf>) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(&config, &IpcRequest::Documents)?;
    let data = expect_data(response)?;

    let documents = data["documents"].as_array().cloned().unwrap_or_default();
    if documents.is_empty() {
        println!("No documents indexed");
        return Ok(());
    }

    for document in &documents {
        println!("{}", document.as_str().unwrap_or("?"));
    }
    println!(
        "\n{} documents, {} chunks",
        documents.len(),
        data["chunks"].as_u64().unwrap_or(0)
    );

    Ok(())
}

fn cmd_history(config_path: Option<std::path::PathBuf>, session: &str) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(
        &config,
        &IpcRequest::History {
            session_id: session.to_string(),
        },
    )?;

    let data = expect_data(response)?;
    for message in data["messages"].as_array().cloned().unwrap_or_default() {
        println!(
            "[{}] {}",
            message["role"].as_str().unwrap_or("?"),
            message["content"].as_str().unwrap_or_default()
        );
    }

    Ok(())
}

fn cmd_sessions(config_path: Option<std::path::PathBuf>, limit: usize) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(&config, &IpcRequest::Sessions { limit })?;
    let data = expect_data(response)?;

    let sessions = data["sessions"].as_array().cloned().unwrap_or_default();
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    for session in sessions {
        println!(
            "{}  {} messages  \"{}\"",
            session["session_id"].as_str().unwrap_or("?"),
            session["message_count"].as_u64().unwrap_or(0),
            session["title"].as_str().unwrap_or(""),
        );
    }

    Ok(())
}

fn cmd_delete_session(config_path: Option<std::path::PathBuf>, session: &str) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(
        &config,
        &IpcRequest::DeleteSession {
            session_id: session.to_string(),
        },
    )?;

    if response.success {
        println!("✓ {}", response.message.unwrap_or_default());
        Ok(())
    } else {
        Err(PresageError::Daemon(response.message.unwrap_or_default()))
    }
}

fn cmd_context(config_path: Option<std::path::PathBuf>) -> Result<()> {
    let config = load_config(config_path, None)?;

    let response = send_request(&config, &IpcRequest::Context)?;
    let data = expect_data(response)?;
    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());

    Ok(())
}

fn cmd_config(config_path: Option<std::path::PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| PresageError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(file) => file,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PresageError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn send_request(config: &Config, request: &IpcRequest) -> Result<IpcResponse> {
    let socket_path = expand_path(&config.daemon.socket_path)?;

    let pm = ProcessManager::new(expand_path(&config.daemon.pid_file)?);
    if !pm.is_running() {
        return Err(PresageError::DaemonNotRunning);
    }

    let client = IpcClient::new(socket_path);
    let rt = runtime()?;
    rt.block_on(client.request(request))
}

fn expect_data(response: IpcResponse) -> Result<serde_json::Value> {
    if !response.success {
        return Err(PresageError::Daemon(
            response.message.unwrap_or_else(|| "Request failed".to_string()),
        ));
    }
    response
        .data
        .ok_or_else(|| PresageError::Daemon("Response carried no data".to_string()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| PresageError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn load_config(config_path: Option<std::path::PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'presage config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn expand_path(path: &std::path::Path) -> Result<std::path::PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PresageError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| PresageError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
