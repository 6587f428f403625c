//! Process sandbox
//!
//! Runs one external program per call: a fresh process group, resource
//! ceilings applied inside the child before exec, stdin fed from memory,
//! stdout and stderr merged into one capped capture, and a wall-clock
//! deadline that kills the whole group.
//!
//! Nothing here returns an error. Every failure mode ends up as a
//! [`ProcessOutcome`] with diagnostic text in its output.

use std::future::Future;

use thiserror::Error;

pub use crate::sandbox::invocation::{DEFAULT_MAX_OUTPUT, DEFAULT_TIMEOUT, Invocation};
use crate::types::ProcessOutcome;

mod invocation;
mod limits;
mod process;

/// Infrastructure failures that prevented a process from running normally
#[derive(Debug, Clone, Error)]
pub enum SandboxFailure {
    #[error("failed to start process: empty command")]
    EmptyCommand,

    #[error("failed to start process '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("failed to set up output pipe: {0}")]
    Pipe(String),

    #[error("failed to wait for process: {0}")]
    Wait(String),
}

/// Capability to run one program to completion under a deadline
pub trait Sandbox: Send + Sync + 'static {
    /// Run the invocation and report how it ended
    fn run(&self, invocation: Invocation) -> impl Future<Output = ProcessOutcome> + Send;
}

/// Sandbox backed by real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Sandbox for ProcessSandbox {
    async fn run(&self, invocation: Invocation) -> ProcessOutcome {
        process::run(invocation).await
    }
}
