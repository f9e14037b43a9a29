//! Deadline-bounded execution of external programs.
//!
//! Every child is started in its own process group so that, when the deadline expires,
//! anything it forked is killed together with it. The child is always reaped before
//! [`run_bounded`] returns, whichever branch is taken.

use std::{
    io::{self, ErrorKind},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Output beyond this many bytes per stream is drained and dropped.
pub const MAX_CAPTURE_BYTES: u64 = 1024 * 1024;

/// Least time given to drain the pipes after the child exits.
const MIN_DRAIN: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed while waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// The program binary could not be found on disk or on `PATH`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::Spawn { source, .. } if source.kind() == ErrorKind::NotFound)
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Standard output followed by standard error, decoded lossily.
    pub fn combined_output(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stderr = String::from_utf8_lossy(&self.stderr);
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.into_owned(),
            (true, false) => stderr.into_owned(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Exited(ProcessOutput),
    TimedOut { elapsed: Duration },
}

/// Run `command` to completion or until `deadline` elapses.
///
/// Stdin is redirected from `/dev/null` so the program can never block on operator input.
pub async fn run_bounded(
    mut command: Command,
    deadline: Duration,
) -> Result<ProcessOutcome, ProcessError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let started_at = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    let stdout = spawn_capture(child.stdout.take());
    let stderr = spawn_capture(child.stderr.take());

    match tokio::time::timeout(deadline, child.wait()).await {
        Ok(Ok(status)) => {
            // Anything the program left running in its group would keep the pipes open.
            kill_process_group(pid);
            let drain = deadline.saturating_sub(started_at.elapsed()).max(MIN_DRAIN);
            let (stdout, stderr) = collect_output(stdout, stderr, drain, &program).await;
            let elapsed = started_at.elapsed();
            debug!(
                target = "infra::process",
                op = "process::run_bounded",
                program = %program,
                exit_code = status.code().map(i64::from).unwrap_or(-1),
                elapsed_ms = elapsed.as_millis() as u64,
                "External program exited"
            );
            Ok(ProcessOutcome::Exited(ProcessOutput {
                status,
                stdout,
                stderr,
                elapsed,
            }))
        }
        Ok(Err(source)) => {
            terminate(&mut child, pid, &program).await;
            stdout.abort();
            stderr.abort();
            Err(ProcessError::Wait { program, source })
        }
        Err(_) => {
            terminate(&mut child, pid, &program).await;
            stdout.abort();
            stderr.abort();
            let elapsed = started_at.elapsed();
            warn!(
                target = "infra::process",
                op = "process::run_bounded",
                program = %program,
                result = "timed_out",
                deadline_ms = deadline.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                "External program exceeded its deadline and was killed"
            );
            Ok(ProcessOutcome::TimedOut { elapsed })
        }
    }
}

/// Kill the child's process group, then wait for the child itself so it is not left as a
/// zombie.
async fn terminate(child: &mut Child, pid: Option<u32>, program: &str) {
    kill_process_group(pid);
    if let Err(err) = child.start_kill() {
        // InvalidInput means the child already exited; wait() below still reaps it.
        if err.kind() != ErrorKind::InvalidInput {
            warn!(
                target = "infra::process",
                program = %program,
                error = %err,
                "Failed to signal external program"
            );
        }
    }
    if let Err(err) = child.wait().await {
        warn!(
            target = "infra::process",
            program = %program,
            error = %err,
            "Failed to reap external program"
        );
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!(
            target = "infra::process",
            pgid,
            error = %errno,
            "Failed to kill external process group"
        ),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Join both capture tasks, giving up once `within` elapses.
///
/// A descendant that left the process group can hold the pipes open indefinitely.
async fn collect_output(
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
    within: Duration,
    program: &str,
) -> (Vec<u8>, Vec<u8>) {
    let stdout_abort = stdout.abort_handle();
    let stderr_abort = stderr.abort_handle();
    match tokio::time::timeout(within, async { tokio::join!(stdout, stderr) }).await {
        Ok((stdout, stderr)) => (stdout.unwrap_or_default(), stderr.unwrap_or_default()),
        Err(_) => {
            stdout_abort.abort();
            stderr_abort.abort();
            warn!(
                target = "infra::process",
                op = "process::run_bounded",
                program = %program,
                result = "capture_abandoned",
                drain_ms = within.as_millis() as u64,
                "Output pipes still open after exit; capture abandoned"
            );
            (Vec::new(), Vec::new())
        }
    }
}

fn spawn_capture<R>(stream: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let Some(stream) = stream else {
            return captured;
        };
        let mut limited = stream.take(MAX_CAPTURE_BYTES);
        let _ = limited.read_to_end(&mut captured).await;
        let mut rest = limited.into_inner();
        let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
        captured
    })
}
