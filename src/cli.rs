//! Command-line interface definition for Notestream
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for one-shot questions, interactive chat and
//! conversation history.

use clap::{Parser, Subcommand};

/// Notestream - streaming Q&A over your notes
///
/// Ask questions against a notebook backend and watch the answer stream in.
#[derive(Parser, Debug, Clone)]
#[command(name = "notestream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the backend streaming endpoint
    #[arg(long, env = "NOTESTREAM_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Override the identity sent with each question
    #[arg(long)]
    pub identity: Option<String>,

    /// Override the conversation database path
    #[arg(long, env = "NOTESTREAM_HISTORY_DB")]
    pub storage_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Notestream
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Ask a single question and print the streamed answer
    Ask {
        /// The question
        query: String,

        /// Continue an existing conversation (full ID or prefix)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Start an interactive chat session
    Chat {
        /// Resume a stored conversation (full ID or prefix)
        #[arg(short, long)]
        resume: Option<String>,
    },

    /// Manage stored conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

/// Conversation history subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List stored conversations
    List,

    /// Print the messages of one conversation
    Show {
        /// Conversation ID (full or prefix)
        id: String,
    },

    /// Delete a conversation
    Delete {
        /// Conversation ID (full or prefix)
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            endpoint: None,
            identity: None,
            storage_path: None,
            command: Commands::History {
                command: HistoryCommand::List,
            },
        }
    }
}
