//! A small local service for compiling and running code snippets.
//!
//! Coderun accepts source code over a minimal HTTP interface, compiles it
//! with a configured toolchain, runs the result under resource limits and a
//! wall-clock deadline, and reports the outcome as JSON.
//!
//! # Features
//!
//! - **Process sandbox** — Process-group isolation, `setrlimit` ceilings, merged and capped output.
//! - **Compile-and-run pipeline** — Request-scoped workspaces with bounded concurrency.
//! - **TOML configuration** — Toolchain commands, timeouts, limits and server settings.
//! - **Snippet store** — Save and load named sources from a flat directory.
//! - **Cancellation** — Optionally kill the work of a client that disconnects.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Toolchain};
pub use pipeline::{Phase, Pipeline, PipelineError, Workspace};
pub use protocol::{FramingError, Request, Response, Status, read_request};
pub use sandbox::{Invocation, ProcessSandbox, Sandbox, SandboxFailure};
pub use server::{Server, ServerError};
pub use snippets::{SnippetError, SnippetStore};
pub use types::{PipelineResult, ProcessOutcome, ResourceLimits};

pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod sandbox;
pub mod server;
pub mod snippets;
pub mod types;
