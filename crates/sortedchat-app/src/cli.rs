//! CLI argument definitions for the sortedchat binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "sortedchat.toml";

/// sortedchat: drive chat sessions against a generation service from the terminal.
#[derive(Parser, Debug)]
#[command(name = "sortedchat", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Model used for generation requests.
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Message to send in a new chat. Repeat for several exchanges.
    #[arg(short = 's', long = "send")]
    pub send: Vec<String>,

    /// Search chats once the messages were sent.
    #[arg(long = "search")]
    pub search: Option<String>,

    /// Create a project with this name and run an embedding job for it.
    #[arg(short = 'p', long = "project")]
    pub project: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SORTEDCHAT_CONFIG env var > ./sortedchat.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SORTEDCHAT_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value > "info".
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if !config_level.trim().is_empty() {
            return config_level.to_string();
        }
        "info".to_string()
    }

    /// Messages to send, with a greeting when none were given.
    pub fn messages(&self) -> Vec<String> {
        if self.send.is_empty() {
            vec!["Hello".to_string()]
        } else {
            self.send.clone()
        }
    }
}
