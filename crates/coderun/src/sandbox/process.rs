//! Child process lifecycle: launch, feed, drain, deadline, kill, classify.

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, instrument, warn};

use crate::sandbox::SandboxFailure;
use crate::sandbox::invocation::Invocation;
use crate::sandbox::limits::RlimitPlan;
use crate::types::{LAUNCH_FAILURE_STATUS, ProcessOutcome, SIGNAL_STATUS_BASE, TIMEOUT_STATUS};

const READ_CHUNK: usize = 4096;

/// How long to keep reading after the process is gone
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Run one invocation to completion
#[instrument(skip_all, fields(program = %invocation.program))]
pub(crate) async fn run(invocation: Invocation) -> ProcessOutcome {
    if invocation.program.is_empty() {
        return ProcessOutcome::failed(SandboxFailure::EmptyCommand);
    }

    let (reader, writer) = match io::pipe() {
        Ok(pipe) => pipe,
        Err(e) => return ProcessOutcome::failed(SandboxFailure::Pipe(e.to_string())),
    };

    let started = Instant::now();
    let deadline = started + invocation.timeout;

    let mut child = match spawn(&invocation, writer) {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "spawn failed");
            return ProcessOutcome::failed(SandboxFailure::Spawn {
                program: invocation.program.clone(),
                message: e.to_string(),
            });
        }
    };

    let Some(pid) = child.id() else {
        return ProcessOutcome::failed(SandboxFailure::Wait(
            "process exited before it could be tracked".to_string(),
        ));
    };
    let mut group = ProcessGroup::new(pid as libc::pid_t);
    debug!(pid, timeout = ?invocation.timeout, limited = invocation.limits.is_some(), "process started");

    let mut output = match pipe::Receiver::from_owned_fd(OwnedFd::from(reader)) {
        Ok(receiver) => receiver,
        Err(e) => {
            group.kill();
            reap(&mut child).await;
            group.release();
            return ProcessOutcome::failed(SandboxFailure::Pipe(e.to_string()));
        }
    };

    let mut exited = tokio::task::spawn_blocking(move || wait_exited(pid as libc::pid_t));
    let feeder = feed_stdin(&mut child, invocation.stdin);
    let mut capture = Capture::new(invocation.max_output);
    let mut buf = [0u8; READ_CHUNK];
    let mut output_open = true;

    let (exit_status, timed_out) = loop {
        tokio::select! {
            read = output.read(&mut buf), if output_open => match read {
                Ok(0) => output_open = false,
                Ok(n) => capture.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "reading child output failed");
                    output_open = false;
                }
            },
            observed = &mut exited => {
                if let Ok(Err(e)) = observed {
                    debug!(error = %e, "could not observe exit without reaping");
                }
                // The unreaped leader keeps the group id reserved, so the
                // kill cannot reach a recycled group.
                group.kill();
                match child.wait().await {
                    Ok(status) => break (exit_status_code(status), false),
                    Err(e) => {
                        group.release();
                        abort_feeder(feeder);
                        return ProcessOutcome::failed(SandboxFailure::Wait(e.to_string()));
                    }
                }
            },
            () = sleep_until(deadline) => {
                warn!(pid, timeout = ?invocation.timeout, "deadline elapsed, killing process group");
                group.kill();
                reap(&mut child).await;
                break (TIMEOUT_STATUS, true);
            }
        }
    };

    group.release();
    abort_feeder(feeder);

    if output_open {
        drain_remaining(&mut output, &mut capture).await;
    }

    let (output, truncated) = capture.into_parts();
    debug!(
        exit_status,
        timed_out,
        bytes = output.len(),
        truncated,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "process finished"
    );

    ProcessOutcome {
        exit_status,
        timed_out,
        output,
        truncated,
        failure: None,
    }
}

/// Launch the child with stdout and stderr sharing `writer`
fn spawn(invocation: &Invocation, writer: io::PipeWriter) -> io::Result<Child> {
    let stderr = writer.try_clone()?;

    // The command owns the parent's copies of the write end; it is dropped
    // when this function returns so the pipe reports EOF once the child exits.
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::piped())
        .stdout(writer)
        .stderr(stderr)
        .process_group(0)
        .kill_on_drop(true);

    if invocation.env_clear {
        command.env_clear();
    }
    command.envs(&invocation.env);

    if let Some(ref dir) = invocation.working_dir {
        command.current_dir(dir);
    }

    if let Some(ref limits) = invocation.limits {
        let plan = RlimitPlan::from_limits(limits);
        // SAFETY: the hook only calls getrlimit/setrlimit, which are
        // async-signal-safe, and does not allocate.
        unsafe {
            command.pre_exec(move || plan.apply());
        }
    }

    command.spawn()
}

/// Write all input on a separate task, then close the child's stdin
fn feed_stdin(child: &mut Child, input: Vec<u8>) -> Option<JoinHandle<()>> {
    let mut stdin = child.stdin.take()?;
    if input.is_empty() {
        drop(stdin);
        return None;
    }

    Some(tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&input).await {
            debug!(error = %e, "child stopped reading stdin");
        }
        drop(stdin);
    }))
}

fn abort_feeder(feeder: Option<JoinHandle<()>>) {
    if let Some(handle) = feeder {
        handle.abort();
    }
}

/// Block until `pid` has exited, leaving it unreaped.
///
/// Runs on the blocking pool. Returns `ECHILD` if the child was already reaped.
fn wait_exited(pid: libc::pid_t) -> io::Result<()> {
    loop {
        // SAFETY: siginfo_t is plain data for which all-zero is a valid value.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: info is valid and writable; WNOWAIT leaves the child waitable.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Blocking reap so no zombie is left behind
async fn reap(child: &mut Child) {
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap child");
    }
}

/// Collect whatever is still buffered in the pipe
async fn drain_remaining(output: &mut pipe::Receiver, capture: &mut Capture) {
    let mut buf = [0u8; READ_CHUNK];
    let drained = timeout(DRAIN_GRACE, async {
        loop {
            match output.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => capture.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "final drain stopped");
                    break;
                }
            }
        }
    })
    .await;

    if drained.is_err() {
        debug!("output pipe still open after grace period");
    }
}

/// Map an exit status to a single integer.
///
/// Normal exits keep their code; death by signal N becomes `128 + N`.
pub(crate) fn exit_status_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| SIGNAL_STATUS_BASE + sig))
        .unwrap_or(LAUNCH_FAILURE_STATUS)
}

/// Process group of a running child.
///
/// Kills the group when dropped while still active, which covers the case
/// where the future driving the child is cancelled mid-run.
#[derive(Debug)]
struct ProcessGroup {
    pgid: libc::pid_t,
    active: bool,
}

impl ProcessGroup {
    fn new(pgid: libc::pid_t) -> Self {
        Self { pgid, active: true }
    }

    /// Send SIGKILL to every process in the group
    fn kill(&self) {
        // SAFETY: kill has no memory-safety preconditions; a negative pid
        // addresses the process group.
        if unsafe { libc::kill(-self.pgid, libc::SIGKILL) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!(pgid = self.pgid, error = %err, "failed to kill process group");
            }
        }
    }

    fn release(&mut self) {
        self.active = false;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.active {
            debug!(pgid = self.pgid, "sandbox cancelled, killing process group");
            self.kill();
        }
    }
}

/// Output buffer that stops growing at a fixed cap
#[derive(Debug)]
pub(crate) struct Capture {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl Capture {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap.min(READ_CHUNK * 4)),
            cap,
            truncated: false,
        }
    }

    /// Append a chunk, dropping whatever does not fit
    pub(crate) fn extend(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        let take = chunk.len().min(room);
        self.bytes.extend_from_slice(&chunk[..take]);
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, bool) {
        (self.bytes, self.truncated)
    }
}
