//! Builder describing a single sandboxed run

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::ResourceLimits;

/// Deadline used when none is given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Output cap in bytes used when none is given
pub const DEFAULT_MAX_OUTPUT: usize = 1024 * 1024;

/// Everything needed to launch one child process
#[derive(Debug, Clone)]
pub struct Invocation {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) stdin: Vec<u8>,
    pub(crate) timeout: Duration,
    pub(crate) limits: Option<ResourceLimits>,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) env_clear: bool,
    pub(crate) max_output: usize,
}

impl Invocation {
    /// Create an invocation for `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            limits: None,
            working_dir: None,
            env: HashMap::new(),
            env_clear: false,
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }

    /// Create an invocation from a full command line (program first)
    ///
    /// An empty command yields an invocation that fails at launch.
    pub fn from_command(command: impl IntoIterator<Item = String>) -> Self {
        let mut parts = command.into_iter();
        let program = parts.next().unwrap_or_default();
        Self::new(program).args(parts)
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bytes written to the child's stdin before it is closed
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = data.into();
        self
    }

    /// Wall-clock deadline, measured from launch
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resource ceilings applied in the child before exec
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Working directory of the child
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Start the child with an empty environment (plus variables set with [`env`](Self::env))
    pub fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Maximum number of output bytes kept
    pub fn max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_stdin(&self) -> &[u8] {
        &self.stdin
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_limits(&self) -> Option<&ResourceLimits> {
        self.limits.as_ref()
    }

    pub fn get_working_dir(&self) -> Option<&std::path::Path> {
        self.working_dir.as_deref()
    }

    pub fn get_env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn clears_env(&self) -> bool {
        self.env_clear
    }

    pub fn get_max_output(&self) -> usize {
        self.max_output
    }
}
