use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Default PATH for the run phase
pub const DEFAULT_RUN_PATH: &str = "/usr/bin:/bin";

/// Default compile deadline in seconds
pub const DEFAULT_COMPILE_TIMEOUT: f64 = 5.0;

/// Default run deadline in seconds
pub const DEFAULT_RUN_TIMEOUT: f64 = 2.0;

/// The compiler and runner used for submissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    /// Human-readable name (e.g., "C++ 17 (GCC)")
    pub name: String,

    /// Source file extension, also required of saved snippet names
    pub extension: FileExtension,

    /// Source file name inside the request workspace (e.g., "main.cpp")
    pub source_name: String,

    /// Binary name inside the request workspace (e.g., "main")
    pub output_name: String,

    /// Compilation step
    pub compile: CompileConfig,

    /// Execution step
    pub run: RunConfig,
}

impl Toolchain {
    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], source: &str, binary: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{output}", binary)
                    .replace("{binary}", binary)
            })
            .collect()
    }

    /// Resource limits for the run phase: defaults, then configured overrides
    pub fn run_limits(&self) -> ResourceLimits {
        match self.run.limits {
            Some(ref limits) => ResourceLimits::default().with_overrides(limits),
            None => ResourceLimits::default(),
        }
    }
}

/// File extension without dot (e.g., "cpp")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}
    pub command: Vec<String>,

    /// Deadline in seconds
    #[serde(default = "default_compile_timeout")]
    pub timeout: f64,

    /// Extra environment variables (the server environment is inherited)
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CompileConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_COMPILE_TIMEOUT))
    }
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {binary}
    pub command: Vec<String>,

    /// Deadline in seconds
    #[serde(default = "default_run_timeout")]
    pub timeout: f64,

    /// PATH for the program; nothing else is inherited from the server
    #[serde(default = "default_run_path")]
    pub path: String,

    /// Environment variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits (override the built-in defaults field by field)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_RUN_TIMEOUT))
    }
}

fn default_compile_timeout() -> f64 {
    DEFAULT_COMPILE_TIMEOUT
}

fn default_run_timeout() -> f64 {
    DEFAULT_RUN_TIMEOUT
}

fn default_run_path() -> String {
    DEFAULT_RUN_PATH.to_owned()
}
