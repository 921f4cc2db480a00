//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "presage",
    version,
    about = "Conversational assistant daemon that predicts your next question",
    long_about = "Presage is a background daemon that answers questions over your indexed \
                  documents, predicts the next question in a conversation, and precomputes \
                  the answer ahead of time so a correct guess is served instantly."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/presage/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the Presage daemon
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(long)]
        foreground: bool,

        /// Profile to apply (e.g., "offline")
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Stop the Presage daemon
    Stop,

    /// Show daemon status and storage statistics
    Status,

    /// Send a chat message and print the reply
    Ask {
        /// The message to send
        message: String,

        /// Session to attach the message to (defaults to a fresh session)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Run the speculation pipeline over a session's history
    Predict {
        /// Session whose history to predict from
        session: String,
    },

    /// Fetch a precomputed answer by its identifier
    Answer {
        /// Answer identifier (as returned by predict)
        id: String,
    },

    /// Search the document index
    Query {
        /// Search query text
        query: String,

        /// Maximum number of results to return (0 = configured default)
        #[arg(short, long, default_value = "0")]
        limit: usize,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ingest a document (txt, md, pdf) into the index
    Ingest {
        /// Path to the document
        file: PathBuf,
    },

    /// List indexed documents
    Documents,

    /// Print a session's message log
    History {
        /// Session identifier
        session: String,
    },

    /// List sessions, most recently active first
    Sessions {
        /// Maximum number of sessions to list
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete a session and its predictions
    DeleteSession {
        /// Session identifier
        session: String,
    },

    /// Summarize recent activity across sessions
    Context,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
