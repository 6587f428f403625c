use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::toolchain::{
    CompileConfig, DEFAULT_COMPILE_TIMEOUT, DEFAULT_RUN_PATH, DEFAULT_RUN_TIMEOUT, FileExtension,
    RunConfig, Toolchain,
};
use crate::sandbox::DEFAULT_MAX_OUTPUT;

mod loader;
pub mod toolchain;

/// Example configuration embedded at compile time.
///
/// Also serves as the default configuration and as the output of `coderun init`.
pub const EXAMPLE_CONFIG: &str = include_str!("../../coderun.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid bind address '{0}'")]
    InvalidBind(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for coderun
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bytes of combined output captured per process
    #[serde(default = "default_max_output")]
    pub max_output: usize,

    /// Parent directory for per-request workspaces.
    ///
    /// Falls back to the system temporary directory.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Listener and request handling settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Compiler and runner
    pub toolchain: Toolchain,
}

/// Settings for the HTTP front end
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address; must be loopback
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Ceiling for the header block and for a declared body length
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Seconds a client has to deliver a complete request
    #[serde(default = "default_read_timeout")]
    pub read_timeout: f64,

    /// Directory containing index.html
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Directory for saved snippets
    #[serde(default = "default_snippets_dir")]
    pub snippets_dir: PathBuf,

    /// Submissions compiled and run at the same time
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Kill a running submission once its client disconnects
    #[serde(default = "default_cancel_on_disconnect")]
    pub cancel_on_disconnect: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_request_bytes: default_max_request_bytes(),
            read_timeout: default_read_timeout(),
            static_dir: default_static_dir(),
            snippets_dir: default_snippets_dir(),
            max_concurrent_runs: default_max_concurrent_runs(),
            cancel_on_disconnect: default_cancel_on_disconnect(),
        }
    }
}

impl ServerConfig {
    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.read_timeout)
            .unwrap_or(Duration::from_secs_f64(default_read_timeout()))
    }
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory under which request workspaces are created
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_output() -> usize {
    DEFAULT_MAX_OUTPUT
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_owned()
}

fn default_max_request_bytes() -> usize {
    512 * 1024
}

fn default_read_timeout() -> f64 {
    10.0
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_snippets_dir() -> PathBuf {
    PathBuf::from("user_codes")
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_cancel_on_disconnect() -> bool {
    false
}
