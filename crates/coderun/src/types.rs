use serde::{Deserialize, Serialize};

use crate::sandbox::SandboxFailure;

/// Exit status reported when a process was killed for exceeding its deadline
pub const TIMEOUT_STATUS: i32 = 124;

/// Exit status reported when the process could not be started at all
pub const LAUNCH_FAILURE_STATUS: i32 = -1;

/// Offset added to a signal number when a process was killed by a signal
pub const SIGNAL_STATUS_BASE: i32 = 128;

/// Resource ceilings applied to a child process before it executes.
///
/// Every field is optional; a `None` ceiling is simply not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds (`RLIMIT_CPU`)
    #[serde(default)]
    pub cpu_time: Option<u64>,

    /// Address space limit in kilobytes (`RLIMIT_AS`)
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Largest file the process may write, in kilobytes (`RLIMIT_FSIZE`)
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Maximum number of open file descriptors (`RLIMIT_NOFILE`)
    #[serde(default)]
    pub max_open_files: Option<u64>,
}

impl ResourceLimits {
    /// 1 kilobyte in kilobytes
    pub const KB: u64 = 1;
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;
    /// 1 gigabyte in kilobytes
    pub const GB: u64 = 1024 * 1024;

    /// Create resource limits with every ceiling unset
    pub fn none() -> Self {
        Self {
            cpu_time: None,
            memory_limit: None,
            max_file_size: None,
            max_open_files: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_cpu_time(mut self, seconds: u64) -> Self {
        self.cpu_time = Some(seconds);
        self
    }

    /// Set the address space limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the output file size limit in kilobytes
    pub fn with_max_file_size(mut self, kb: u64) -> Self {
        self.max_file_size = Some(kb);
        self
    }

    /// Set the maximum number of open file descriptors
    pub fn with_max_open_files(mut self, count: u64) -> Self {
        self.max_open_files = Some(count);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_time: overrides.cpu_time.or(self.cpu_time),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
        }
    }

    /// Whether no ceiling is set at all
    pub fn is_empty(&self) -> bool {
        self.cpu_time.is_none()
            && self.memory_limit.is_none()
            && self.max_file_size.is_none()
            && self.max_open_files.is_none()
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time: Some(2),
            memory_limit: Some(256 * Self::MB),
            max_file_size: Some(Self::MB),
            max_open_files: Some(64),
        }
    }
}

/// Result of one sandboxed process run
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code, `128 + signal` when killed by a signal, [`TIMEOUT_STATUS`]
    /// on deadline expiry or [`LAUNCH_FAILURE_STATUS`] if nothing ran
    pub exit_status: i32,

    /// Whether the process was killed because the deadline elapsed
    pub timed_out: bool,

    /// Interleaved stdout and stderr, up to the configured cap
    pub output: Vec<u8>,

    /// Whether output was dropped because the cap was reached
    pub truncated: bool,

    /// Infrastructure failure (pipe, spawn, wait), if any
    pub failure: Option<SandboxFailure>,
}

impl ProcessOutcome {
    /// Outcome for a process that could not be run at all
    pub fn failed(failure: SandboxFailure) -> Self {
        let output = format!("{failure}\n").into_bytes();
        Self {
            exit_status: LAUNCH_FAILURE_STATUS,
            timed_out: false,
            output,
            truncated: false,
            failure: Some(failure),
        }
    }

    /// Check if the process exited normally with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.timed_out && self.exit_status == 0
    }

    /// Signal number that killed the process, if it was killed by one
    pub fn signal(&self) -> Option<i32> {
        if self.timed_out || self.failure.is_some() {
            return None;
        }
        (self.exit_status > SIGNAL_STATUS_BASE).then(|| self.exit_status - SIGNAL_STATUS_BASE)
    }
}

impl Default for ProcessOutcome {
    fn default() -> Self {
        Self {
            exit_status: 0,
            timed_out: false,
            output: Vec::new(),
            truncated: false,
            failure: None,
        }
    }
}

/// Outcome of a compile-and-run submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// The toolchain rejected the source (or timed out); diagnostics verbatim
    CompileFailed { output: Vec<u8> },

    /// The program ran to completion, crashed or was killed
    Completed {
        exit_status: i32,
        timed_out: bool,
        output: Vec<u8>,
    },
}

impl PipelineResult {
    /// Captured output of whichever phase ended the submission
    pub fn output(&self) -> &[u8] {
        match self {
            PipelineResult::CompileFailed { output } => output,
            PipelineResult::Completed { output, .. } => output,
        }
    }
}
