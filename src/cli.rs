//! Command-line interface definition for Parley
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat, one-shot turns, history
//! management and the provider catalog.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Parley - multi-provider chat with resumable history
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the history database (overrides config and PARLEY_HISTORY_DB)
    #[arg(long, global = true)]
    pub history_db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Provider selection shared by the turn-sending commands
#[derive(Args, Debug, Clone, Default)]
pub struct ProviderArgs {
    /// Provider to use (google, openai, anthropic, groq, openrouter)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model to use; defaults to the configured or catalog default
    #[arg(short, long)]
    pub model: Option<String>,

    /// API key; defaults to the provider's environment variable
    #[arg(long)]
    pub api_key: Option<String>,

    /// Override the configured system prompt
    #[arg(long)]
    pub system_prompt: Option<String>,
}

/// Available commands for Parley
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        #[command(flatten)]
        provider: ProviderArgs,

        /// Resume an existing session by id or id prefix
        #[arg(short, long)]
        resume: Option<String>,

        /// Wait for whole replies instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Send a single message and print the reply
    Send {
        #[command(flatten)]
        provider: ProviderArgs,

        /// Continue an existing session by id or id prefix
        #[arg(short, long)]
        thread: Option<String>,

        /// Wait for the whole reply instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Message to send
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Manage conversation history
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// List supported providers and their models
    Providers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// History management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List stored sessions, most recent first
    List,

    /// Print a session's transcript
    Show {
        /// Session id or id prefix
        id: String,
    },

    /// Delete a session and its messages
    Delete {
        /// Session id or id prefix
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
