//! CLI argument definitions for the Concierge server.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Concierge - conversational shopping assistant server.
#[derive(Parser, Debug)]
#[command(name = "concierge", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long = "host")]
    pub host: Option<String>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Conversation store backend ("memory" or "sqlite").
    #[arg(long = "store")]
    pub store: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CONCIERGE_CONFIG env var > ~/.concierge/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CONCIERGE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > CONCIERGE_PORT env var > config file value > 8000.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("CONCIERGE_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        8000
    }

    /// Resolve the completion API key.
    ///
    /// Priority: GROQ_API_KEY env var > config file value. Kept off the
    /// command line so it does not show up in process listings.
    pub fn resolve_api_key(&self, config_key: Option<String>) -> Option<String> {
        std::env::var("GROQ_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or(config_key)
    }

    pub fn resolve_host(&self) -> Option<String> {
        self.host.clone()
    }

    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    pub fn resolve_store(&self) -> Option<String> {
        self.store.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    PathBuf::from("config.toml")
}
