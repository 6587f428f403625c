//! Request-scoped working directories
//!
//! Every submission gets its own directory under the scratch root, so
//! concurrent requests never share source or binary paths. The directory
//! and everything in it is removed when the [`Workspace`] is dropped.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::config::Toolchain;
use crate::pipeline::PipelineError;

const WORKSPACE_PREFIX: &str = "coderun-";

/// A fresh directory holding one submission's source and binary
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source: PathBuf,
    binary: PathBuf,

    /// Run slot held for as long as the workspace lives
    _permit: Option<OwnedSemaphorePermit>,
}

impl Workspace {
    /// Create a workspace under `scratch` and write `source` into it
    pub async fn create(
        scratch: &Path,
        toolchain: &Toolchain,
        source: &[u8],
    ) -> Result<Self, PipelineError> {
        tokio::fs::create_dir_all(scratch)
            .await
            .map_err(PipelineError::Workspace)?;
        let scratch = std::path::absolute(scratch).map_err(PipelineError::Workspace)?;

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&scratch)
            .map_err(PipelineError::Workspace)?;

        let source_path = dir.path().join(&toolchain.source_name);
        let binary = dir.path().join(&toolchain.output_name);

        tokio::fs::write(&source_path, source)
            .await
            .map_err(PipelineError::Workspace)?;

        debug!(path = %dir.path().display(), bytes = source.len(), "created workspace");

        Ok(Self {
            dir,
            source: source_path,
            binary,
            _permit: None,
        })
    }

    /// Attach a run slot that is released together with the workspace
    pub(crate) fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of the written source file
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Absolute path the compiler is expected to produce
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Whether the compiler left a binary behind
    pub async fn has_binary(&self) -> bool {
        tokio::fs::metadata(&self.binary)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Expand a toolchain command against this workspace's paths
    pub fn expand(&self, command: &[String]) -> Vec<String> {
        Toolchain::expand_command(
            command,
            &self.source.to_string_lossy(),
            &self.binary.to_string_lossy(),
        )
    }
}
