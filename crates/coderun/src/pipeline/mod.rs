//! Compile-and-run pipeline
//!
//! Takes a submission through a fresh workspace, the toolchain's compile
//! command and, when that succeeds, the run command under resource limits.
//! A failed compile short-circuits; nothing is retried.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

pub use crate::pipeline::workspace::Workspace;

mod workspace;

use crate::config::Config;
use crate::sandbox::{Invocation, ProcessSandbox, Sandbox, SandboxFailure};
use crate::types::{PipelineResult, ProcessOutcome};

/// The two stages of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Run,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Compile => write!(f, "compile"),
            Phase::Run => write!(f, "run"),
        }
    }
}

/// Infrastructure failures while processing a submission
///
/// None of these are the submitter's fault; compile errors and runtime
/// failures of the program are results, not errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("compiler reported success but produced no binary at {}", .0.display())]
    MissingBinary(PathBuf),

    #[error("{phase} phase failed: {failure}")]
    Sandbox {
        phase: Phase,
        failure: SandboxFailure,
    },

    #[error("run slots are closed")]
    Closed,
}

/// Compiles and runs submissions with a bounded number in flight
#[derive(Debug)]
pub struct Pipeline<S = ProcessSandbox> {
    config: Arc<Config>,
    sandbox: Arc<S>,
    slots: Arc<Semaphore>,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            sandbox: Arc::clone(&self.sandbox),
            slots: Arc::clone(&self.slots),
        }
    }
}

impl Pipeline<ProcessSandbox> {
    /// Create a pipeline that runs real processes
    pub fn new(config: Config) -> Self {
        Self::with_sandbox(config, ProcessSandbox::new())
    }
}

impl<S: Sandbox> Pipeline<S> {
    /// Create a pipeline on top of the given sandbox
    pub fn with_sandbox(config: Config, sandbox: S) -> Self {
        let slots = Arc::new(Semaphore::new(config.server.max_concurrent_runs));
        Self {
            config: Arc::new(config),
            sandbox: Arc::new(sandbox),
            slots,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Compile `source` and, if that succeeds, run it with `input` on stdin.
    ///
    /// Waits for a free run slot first. The workspace is removed before
    /// this returns, whatever the outcome.
    #[instrument(skip_all, fields(source_len = source.len(), input_len = input.len()))]
    pub async fn run(&self, source: &[u8], input: &[u8]) -> Result<PipelineResult, PipelineError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Closed)?;

        let workspace = Workspace::create(&self.config.scratch_dir(), &self.config.toolchain, source)
            .await?
            .with_permit(permit);

        let compiled = self.compile(&workspace).await;
        if let Some(failure) = compiled.failure {
            warn!(%failure, "compile step could not run");
            return Err(PipelineError::Sandbox {
                phase: Phase::Compile,
                failure,
            });
        }
        if !compiled.is_success() {
            info!(
                exit_status = compiled.exit_status,
                timed_out = compiled.timed_out,
                "compilation failed"
            );
            return Ok(PipelineResult::CompileFailed {
                output: self.compile_diagnostics(compiled),
            });
        }

        if !workspace.has_binary().await {
            return Err(PipelineError::MissingBinary(workspace.binary().to_path_buf()));
        }

        let outcome = self.execute(&workspace, input).await;
        if let Some(failure) = outcome.failure {
            warn!(%failure, "run step could not run");
            return Err(PipelineError::Sandbox {
                phase: Phase::Run,
                failure,
            });
        }

        info!(
            exit_status = outcome.exit_status,
            timed_out = outcome.timed_out,
            output_len = outcome.output.len(),
            "submission finished"
        );

        Ok(PipelineResult::Completed {
            exit_status: outcome.exit_status,
            timed_out: outcome.timed_out,
            output: outcome.output,
        })
    }

    async fn compile(&self, workspace: &Workspace) -> ProcessOutcome {
        let compile = &self.config.toolchain.compile;

        let mut invocation = Invocation::from_command(workspace.expand(&compile.command))
            .working_dir(workspace.path())
            .timeout(compile.timeout())
            .max_output(self.config.max_output);
        for (key, value) in &compile.env {
            invocation = invocation.env(key, value);
        }

        debug!(program = invocation.program(), "compiling");
        self.sandbox.run(invocation).await
    }

    async fn execute(&self, workspace: &Workspace, input: &[u8]) -> ProcessOutcome {
        let toolchain = &self.config.toolchain;
        let run = &toolchain.run;

        let mut invocation = Invocation::from_command(workspace.expand(&run.command))
            .working_dir(workspace.path())
            .env_clear()
            .env("PATH", &run.path)
            .limits(toolchain.run_limits())
            .timeout(run.timeout())
            .max_output(self.config.max_output)
            .stdin(input);
        for (key, value) in &run.env {
            invocation = invocation.env(key, value);
        }

        debug!(program = invocation.program(), "running");
        self.sandbox.run(invocation).await
    }

    /// Compiler output, with a note when a timeout left nothing to show
    fn compile_diagnostics(&self, outcome: ProcessOutcome) -> Vec<u8> {
        let mut output = outcome.output;
        if outcome.timed_out && output.is_empty() {
            output = format!(
                "compilation timed out after {:.1}s\n",
                self.config.toolchain.compile.timeout().as_secs_f64()
            )
            .into_bytes();
        }
        output
    }
}
