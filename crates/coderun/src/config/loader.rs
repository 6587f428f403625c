//! Configuration file loading for coderun
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        let addr = server.bind_addr()?;
        if !addr.ip().is_loopback() {
            return Err(ConfigError::Invalid(format!(
                "bind address '{}' is not a loopback address",
                server.bind
            )));
        }
        if server.max_request_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_request_bytes must be greater than zero".to_string(),
            ));
        }
        if server.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "server.max_concurrent_runs must be greater than zero".to_string(),
            ));
        }
        check_timeout("server.read_timeout", server.read_timeout)?;

        let toolchain = &self.toolchain;
        if toolchain.name.is_empty() {
            return Err(ConfigError::Invalid("toolchain has empty name".to_string()));
        }
        if toolchain.extension.is_empty() {
            return Err(ConfigError::Invalid(
                "toolchain has empty extension".to_string(),
            ));
        }
        check_file_name("toolchain.source_name", &toolchain.source_name)?;
        check_file_name("toolchain.output_name", &toolchain.output_name)?;
        if toolchain.source_name == toolchain.output_name {
            return Err(ConfigError::Invalid(
                "toolchain.source_name and toolchain.output_name must differ".to_string(),
            ));
        }
        if toolchain.compile.command.is_empty() {
            return Err(ConfigError::Invalid(
                "toolchain has empty compile command".to_string(),
            ));
        }
        if toolchain.run.command.is_empty() {
            return Err(ConfigError::Invalid(
                "toolchain has empty run command".to_string(),
            ));
        }
        check_timeout("toolchain.compile.timeout", toolchain.compile.timeout)?;
        check_timeout("toolchain.run.timeout", toolchain.run.timeout)?;

        Ok(())
    }
}

/// Timeouts must be positive and finite
fn check_timeout(field: &str, seconds: f64) -> Result<(), ConfigError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a positive number of seconds"
        )));
    }
    Ok(())
}

/// Workspace file names must stay inside the workspace
fn check_file_name(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a plain file name, got '{name}'"
        )));
    }
    Ok(())
}
