use super::liveness::process_alive;
use log::{debug, warn};
use std::io;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// How long to wait for the group to vanish after SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

const POLL: Duration = Duration::from_millis(100);

/// Sends `signal` to the process group led by `pgid`.
///
/// Falls back to the leader alone when the group is already gone but the
/// pid still answers. A missing process is not an error.
pub fn signal_group(pgid: i32, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Ok(());
    }
    if unsafe { libc::kill(-pgid, signal) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ESRCH) {
        return Err(err);
    }
    if unsafe { libc::kill(pgid, signal) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

/// Polls liveness until `pid` is gone or `timeout` elapses.
pub async fn wait_dead(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL).await;
    }
}

/// Two-stage shutdown of a process group.
///
/// SIGTERM to the group, poll the leader every 100ms for up to
/// `shutdown_timeout`, then SIGKILL and poll for up to [`KILL_GRACE`].
///
/// # Returns
///
/// * `Ok(true)` once the leader is gone (immediately if it already was).
/// * `Ok(false)` if it survived SIGKILL.
/// * `Err` if a signal could not be delivered.
pub async fn terminate_group(pgid: i32, shutdown_timeout: Duration) -> io::Result<bool> {
    if !process_alive(pgid) {
        return Ok(true);
    }
    debug!("sending SIGTERM to process group {}", pgid);
    signal_group(pgid, libc::SIGTERM)?;
    if wait_dead(pgid, shutdown_timeout).await {
        return Ok(true);
    }
    warn!(
        "process group {} still alive after {:?}, sending SIGKILL",
        pgid, shutdown_timeout
    );
    signal_group(pgid, libc::SIGKILL)?;
    Ok(wait_dead(pgid, KILL_GRACE).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_in_group(script: &str) -> tokio::process::Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn term_stops_a_cooperative_group() {
        let mut child = spawn_in_group("sleep 30");
        let pid = child.id().unwrap() as i32;
        let reaper = tokio::spawn(async move { child.wait().await });

        assert!(terminate_group(pid, Duration::from_secs(2)).await.unwrap());
        assert!(!process_alive(pid));
        reaper.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn kill_follows_an_ignored_term() {
        let mut child = spawn_in_group("trap '' TERM; sleep 30 & wait");
        let pid = child.id().unwrap() as i32;
        let reaper = tokio::spawn(async move { child.wait().await });
        sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        assert!(terminate_group(pid, Duration::from_millis(300)).await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(300));
        reaper.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dead_pid_is_a_no_op() {
        assert!(terminate_group(0, Duration::from_millis(10)).await.unwrap());
        assert!(signal_group(-5, libc::SIGTERM).is_ok());
    }
}
