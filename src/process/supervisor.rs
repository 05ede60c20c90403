//! Process supervisor: start, terminate, wait, force-kill.
//!
//! Handles are tolerant by construction. An empty handle, a process that
//! already exited, or one that crashed out of band all turn termination
//! into a no-op. Processes spawned here are owned (`kill_on_drop`) and
//! reaped; processes adopted by pid are only signalled, and a zombie
//! counts as exited for them.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Interval between liveness checks of adopted processes.
const POLL_STEP: Duration = Duration::from_millis(100);

/// How long to wait for the OS to reap a force-killed process.
const KILL_SETTLE: Duration = Duration::from_secs(5);

/// Handle to a supervised OS process.
#[derive(Debug, Default)]
pub struct ProcessHandle {
    pid: Option<u32>,
    name: String,
    child: Option<Child>,
    exited: bool,
}

impl ProcessHandle {
    /// Handle that refers to nothing; every operation is a no-op.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adopt an existing process by pid.
    #[must_use]
    pub fn from_pid(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            name: process_name(pid).unwrap_or_default(),
            child: None,
            exited: false,
        }
    }

    /// OS process id, `None` for an empty handle.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Executable name as reported by the OS when the handle was created.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the handle refers to no process at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pid.is_none()
    }

    /// Whether the process is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match self.pid {
            Some(pid) if !self.exited => pid_alive(pid),
            _ => false,
        }
    }

    /// Force-kill without waiting. Used on drop paths that cannot block.
    pub fn kill_now(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.start_kill() {
                warn!(pid = ?self.pid, %err, "failed to kill child process");
            }
        } else if let Some(pid) = self.pid {
            if let Err(err) = kill_pid(pid) {
                warn!(pid, %err, "failed to kill process");
            }
        }
        self.exited = true;
    }

    fn reap(&mut self) {
        if let Some(child) = self.child.as_mut() {
            // Collects the exit status of an already dead child.
            if let Err(err) = child.try_wait() {
                debug!(pid = ?self.pid, %err, "failed to reap child process");
            }
        }
    }
}

/// Spawn `command` with `args` as an owned child process.
///
/// No check is made that the command succeeds beyond the spawn itself.
///
/// # Errors
///
/// Returns `AppError::Io` if the OS refuses to spawn the process.
pub fn start(command: &Path, args: &[String]) -> Result<ProcessHandle> {
    let child = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Io(format!("failed to spawn {}: {err}", command.display())))?;

    let pid = child.id();
    let name = pid.and_then(process_name).unwrap_or_else(|| {
        command
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    info!(pid = pid.unwrap_or(0), name = %name, command = %command.display(), "process started");

    Ok(ProcessHandle {
        pid,
        name,
        child: Some(child),
        exited: false,
    })
}

/// Ask the process to terminate, wait up to `timeout`, then force-kill.
///
/// Empty handles and processes that already exited are left alone.
///
/// # Errors
///
/// Returns `AppError::Io` if signalling fails for a reason other than the
/// process being gone, or if waiting on an owned child fails.
pub async fn terminate_and_wait(handle: &mut ProcessHandle, timeout: Duration) -> Result<()> {
    let Some(pid) = handle.pid else {
        return Ok(());
    };

    if !handle.is_running() {
        handle.reap();
        handle.exited = true;
        return Ok(());
    }

    if !terminate_pid(pid)? {
        handle.reap();
        handle.exited = true;
        return Ok(());
    }

    if wait_for_exit(handle, pid, timeout).await? {
        debug!(pid, name = %handle.name, "terminated process");
    } else {
        warn!(pid, name = %handle.name, ?timeout, "process ignored termination, killing");
        if let Some(child) = handle.child.as_mut() {
            child
                .kill()
                .await
                .map_err(|err| AppError::Io(format!("failed to kill pid {pid}: {err}")))?;
        } else {
            kill_pid(pid)?;
            wait_for_exit(handle, pid, KILL_SETTLE).await?;
        }
        debug!(pid, name = %handle.name, "killed process");
    }

    handle.exited = true;
    Ok(())
}

/// Whether `pid` names a live, non-zombie process.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    with_process(pid, |process| {
        !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
    })
    .unwrap_or(false)
}

fn process_name(pid: u32) -> Option<String> {
    with_process(pid, |process| process.name().to_string_lossy().into_owned())
}

fn with_process<R>(pid: u32, f: impl FnOnce(&sysinfo::Process) -> R) -> Option<R> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(f)
}

async fn wait_for_exit(handle: &mut ProcessHandle, pid: u32, timeout: Duration) -> Result<bool> {
    if let Some(child) = handle.child.as_mut() {
        return match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(_status)) => Ok(true),
            Ok(Err(err)) => Err(AppError::Io(format!("failed to wait for pid {pid}: {err}"))),
            Err(_elapsed) => Ok(false),
        };
    }

    let deadline = Instant::now() + timeout;
    loop {
        if !pid_alive(pid) {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
    }
}

/// Request graceful termination. `Ok(false)` means the process was gone.
#[cfg(unix)]
fn terminate_pid(pid: u32) -> Result<bool> {
    signal_pid(pid, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> Result<bool> {
    signal_pid(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_pid(pid: u32, signal: nix::sys::signal::Signal) -> Result<bool> {
    use nix::errno::Errno;

    let raw = i32::try_from(pid).map_err(|_| AppError::Io(format!("pid {pid} out of range")))?;
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(AppError::Io(format!(
            "failed to send {} to pid {pid}: {err}",
            signal.as_str()
        ))),
    }
}

#[cfg(not(unix))]
fn terminate_pid(pid: u32) -> Result<bool> {
    Ok(with_process(pid, |process| {
        process
            .kill_with(sysinfo::Signal::Term)
            .unwrap_or_else(|| process.kill())
    })
    .unwrap_or(false))
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) -> Result<bool> {
    Ok(with_process(pid, sysinfo::Process::kill).unwrap_or(false))
}
