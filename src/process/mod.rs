//! Subprocess lifecycle.
//!
//! Every launched tool runs in its own process group. A watcher task races the
//! child's exit against the cancellation token; when cancellation wins the whole
//! group is sent SIGTERM, then SIGKILL after a short grace period, so helpers the
//! tool shelled out to are reclaimed along with it.
//!
//! On platforms without process groups only the direct child is killed.

use crate::error::ProcessError;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Time between the graceful and the forceful signal.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub grace: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
        }
    }
}

/// A launched process plus its output pipes.
pub struct Launched {
    pub handle: ProcessHandle,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Launch `cmd` with piped stdout/stderr in a fresh process group.
///
/// Fails fast with [`ProcessError::Cancelled`] if the token already fired.
/// Must be called from within a tokio runtime.
pub fn launch(
    cancel: &CancellationToken,
    mut cmd: Command,
    options: &LaunchOptions,
) -> Result<Launched, ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }

    let program = cmd.as_std().get_program().to_string_lossy().to_string();

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        command: program.clone(),
        source: Arc::new(e),
    })?;

    let pid = child.id();
    debug!("Spawned {} (pid {:?})", program, pid);

    let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;

    let watcher = tokio::spawn(supervise(child, cancel.clone(), options.grace));

    Ok(Launched {
        handle: ProcessHandle {
            pid,
            watcher: Mutex::new(Some(watcher)),
            outcome: OnceCell::new(),
        },
        stdout,
        stderr,
    })
}

/// Owns one subprocess. Not reusable across invocations.
pub struct ProcessHandle {
    pid: Option<u32>,
    watcher: Mutex<Option<JoinHandle<Result<ExitStatus, ProcessError>>>>,
    outcome: OnceCell<Result<ExitStatus, ProcessError>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process and its cleanup to finish.
    ///
    /// The first call joins the watcher; later calls return the cached outcome.
    pub async fn wait(&self) -> Result<ExitStatus, ProcessError> {
        self.outcome
            .get_or_init(|| async {
                let watcher = self.watcher.lock().await.take();
                match watcher {
                    Some(task) => match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(ProcessError::Watcher(e.to_string())),
                    },
                    None => Err(ProcessError::Watcher(
                        "process watcher already consumed".to_string(),
                    )),
                }
            })
            .await
            .clone()
    }
}

/// Termination progress of a cancelled process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Running,
    Terminating,
    Killed,
}

async fn supervise(
    mut child: Child,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<ExitStatus, ProcessError> {
    tokio::select! {
        biased;
        status = child.wait() => {
            return status.map_err(|e| ProcessError::Wait(Arc::new(e)));
        }
        _ = cancel.cancelled() => {}
    }

    let mut state = Termination::Running;
    while state != Termination::Killed {
        state = advance(&mut child, state, grace).await;
        debug!("Process {:?} termination state: {:?}", child.id(), state);
    }

    // reap the direct child; descendants are reparented and reaped by init
    if let Err(e) = child.wait().await {
        warn!("Failed to reap cancelled process: {}", e);
    }

    Err(ProcessError::Cancelled)
}

async fn advance(child: &mut Child, state: Termination, grace: Duration) -> Termination {
    match state {
        Termination::Running => {
            signal_tree(child, Forcefulness::Graceful);
            Termination::Terminating
        }
        Termination::Terminating => {
            tokio::time::sleep(grace).await;
            signal_tree(child, Forcefulness::Forceful);
            Termination::Killed
        }
        Termination::Killed => Termination::Killed,
    }
}

#[derive(Debug, Clone, Copy)]
enum Forcefulness {
    Graceful,
    Forceful,
}

#[cfg(unix)]
fn signal_tree(child: &mut Child, force: Forcefulness) {
    let Some(pid) = child.id() else {
        return;
    };
    let signal = match force {
        Forcefulness::Graceful => libc::SIGTERM,
        Forcefulness::Forceful => libc::SIGKILL,
    };

    // negative pid addresses the whole process group
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to send {:?} to process group {}: {}", force, pid, err);
        }
    }
}

#[cfg(not(unix))]
fn signal_tree(child: &mut Child, force: Forcefulness) {
    // no process groups here: only the direct child is reachable
    if let Forcefulness::Forceful = force {
        if let Err(e) = child.start_kill() {
            warn!("Failed to kill process: {}", e);
        }
    }
}
