//! Named source snippets kept on disk
//!
//! A flat directory of files addressed by name. Names are checked before
//! any filesystem access so a request can never reach outside the
//! directory.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::FileExtension;

/// Longest accepted snippet name
pub const MAX_NAME_LEN: usize = 80;

/// Stem of the name used when a request does not give one
pub const DEFAULT_SNIPPET_STEM: &str = "star_code";

#[derive(Debug, Error)]
pub enum SnippetError {
    #[error("invalid snippet name '{0}'")]
    InvalidName(String),

    #[error("snippet '{0}' not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snippet directory with name validation
#[derive(Debug, Clone)]
pub struct SnippetStore {
    dir: PathBuf,
    extension: FileExtension,
}

impl SnippetStore {
    pub fn new(dir: impl Into<PathBuf>, extension: FileExtension) -> Self {
        Self {
            dir: dir.into(),
            extension,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name used when a request does not give one (e.g., `star_code.cpp`)
    pub fn default_name(&self) -> String {
        format!("{DEFAULT_SNIPPET_STEM}.{}", self.extension)
    }

    /// Check a name against the allowed pattern.
    ///
    /// At most [`MAX_NAME_LEN`] characters from `[A-Za-z0-9_.-]`, no `..`,
    /// and a non-empty stem followed by `.<extension>`.
    pub fn validate_name(&self, name: &str) -> Result<(), SnippetError> {
        let invalid = || SnippetError::InvalidName(name.to_owned());

        if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains("..") {
            return Err(invalid());
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-');
        if !name.chars().all(allowed) {
            return Err(invalid());
        }

        let stem = name
            .strip_suffix(self.extension.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(invalid)?;
        if stem.is_empty() {
            return Err(invalid());
        }
        Ok(())
    }

    /// Read a snippet
    pub async fn load(&self, name: &str) -> Result<Vec<u8>, SnippetError> {
        self.validate_name(name)?;
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(content) => {
                debug!(name, bytes = content.len(), "loaded snippet");
                Ok(content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SnippetError::NotFound(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a snippet verbatim, replacing any previous content.
    ///
    /// Returns the number of bytes written.
    pub async fn save(&self, name: &str, content: &[u8]) -> Result<usize, SnippetError> {
        self.validate_name(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(name), content).await?;
        debug!(name, bytes = content.len(), "saved snippet");
        Ok(content.len())
    }
}
