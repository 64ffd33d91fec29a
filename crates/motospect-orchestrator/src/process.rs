//! Child process spawning and termination

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::model::ServiceConfig;

/// Launch the service with `PORT` injected
///
/// stdout and stderr are appended to `{log_dir}/{name}.log` so the process
/// keeps running independently of the manager's own streams.
pub(crate) fn spawn(config: &ServiceConfig, port: u16, log_dir: &Path) -> io::Result<Child> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(format!("{}.log", config.name));
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let stderr = stdout.try_clone()?;

    debug!(
        service = %config.name,
        command = %config.command,
        args = ?config.args,
        log = %log_path.display(),
        "Spawning service process"
    );

    Command::new(&config.command)
        .args(&config.args)
        .current_dir(&config.working_dir)
        .envs(&config.environment)
        .env("PORT", port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
}

/// Terminate a child we spawned: SIGTERM, wait `grace`, then SIGKILL
pub(crate) async fn terminate_child(child: &mut Child, grace: Duration) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        send_signal(pid, libc::SIGTERM)?;
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            let status = status?;
            debug!(pid, status = %status, "Process exited after SIGTERM");
            return Ok(());
        }
        warn!(pid, grace_ms = grace.as_millis() as u64, "Process ignored SIGTERM, killing");
    }

    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await
}

/// Terminate a process known only by pid (recorded by an earlier manager run)
#[cfg(unix)]
pub(crate) async fn terminate_pid(pid: u32, grace: Duration) -> io::Result<()> {
    if !is_alive(pid) {
        return Ok(());
    }

    send_signal(pid, libc::SIGTERM)?;
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if is_alive(pid) {
        warn!(pid, "Process ignored SIGTERM, killing");
        send_signal(pid, libc::SIGKILL)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn terminate_pid(pid: u32, _grace: Duration) -> io::Result<()> {
    warn!(pid, "Cannot signal untracked processes on this platform");
    Ok(())
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only performs the existence/permission check
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
