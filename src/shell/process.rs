//! Child process teardown.
//!
//! On unix the shell is spawned as the leader of a fresh process group, so
//! signals go to the whole group and also reach grandchildren that inherited
//! our pipes (`echo a; sleep 60` keeps `sleep` alive after the shell exits).
//! Windows has no groups here; the direct child is terminated.
//!
//! Nothing in this module returns an error. A process that is already gone
//! is the expected outcome of cleanup, not a failure.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, trace};

/// Upper bound on waiting for the OS to reap a force-killed child.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KillSignal {
    /// SIGTERM - allows graceful shutdown
    Term,
    /// SIGKILL - immediate termination
    Kill,
}

/// Makes the spawned child lead its own process group.
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Sends `signal` to every process in the group led by `pgid`.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: u32, signal: KillSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let sig = match signal {
        KillSignal::Term => Signal::SIGTERM,
        KillSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid as i32), sig) {
        Ok(()) => trace!(pgid, ?sig, "signalled process group"),
        Err(Errno::ESRCH) => trace!(pgid, ?sig, "process group already gone"),
        Err(err) => debug!(pgid, ?sig, %err, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
pub(crate) fn signal_group(_pgid: u32, _signal: KillSignal) {}

/// Synchronous best-effort kill for paths that cannot await.
pub(crate) fn kill_now(child: &mut Child, pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        signal_group(pgid, KillSignal::Kill);
    }
    if let Err(err) = child.start_kill() {
        trace!(%err, "start_kill on child failed");
    }
}

/// Terminates the child, escalating to a kill after `grace`, and reaps it.
///
/// `sweep_group` controls whether the group is killed once the leader is
/// already reaped. Pass `false` when both pipes reached EOF: no member can be
/// left holding them, and an empty group's id may already belong to someone
/// else.
///
/// Returns the exit status if one could be collected.
pub(crate) async fn terminate_then_kill(
    child: &mut Child,
    pgid: Option<u32>,
    grace: Duration,
    sweep_group: bool,
) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => {
            // leader is done but stragglers may still hold the pipes
            if let Some(pgid) = pgid.filter(|_| sweep_group) {
                signal_group(pgid, KillSignal::Kill);
            }
            return Some(status);
        }
        Ok(None) => {}
        Err(err) => trace!(%err, "try_wait failed before terminate"),
    }

    match pgid {
        Some(pgid) if cfg!(unix) => signal_group(pgid, KillSignal::Term),
        _ => {
            if let Err(err) = child.start_kill() {
                trace!(%err, "terminate request failed");
            }
        }
    }

    let status = match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(err)) => {
            trace!(%err, "wait after terminate failed");
            None
        }
        Err(_) => {
            debug!(?grace, "child ignored terminate, killing");
            None
        }
    };

    // a leader still running keeps its group id reserved
    if status.is_none() || sweep_group {
        kill_now(child, pgid);
    }

    match status {
        Some(status) => Some(status),
        None => match timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                trace!(%err, "wait after kill failed");
                None
            }
            Err(_) => {
                debug!("child not reaped after kill");
                None
            }
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Instant;

    fn spawn_sh(script: &str) -> (Child, Option<u32>) {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        isolate_process_group(&mut cmd);
        let child = cmd.spawn().unwrap();
        let pid = child.id();
        (child, pid)
    }

    #[tokio::test]
    async fn test_terminate_running_child() {
        let (mut child, pgid) = spawn_sh("sleep 30");
        let start = Instant::now();

        let status = terminate_then_kill(&mut child, pgid, Duration::from_millis(500), true).await;

        assert!(status.is_some());
        assert!(!status.unwrap().success());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_escalates_when_term_is_ignored() {
        let (mut child, pgid) = spawn_sh("trap '' TERM; sleep 30 & wait");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = Instant::now();
        let status = terminate_then_kill(&mut child, pgid, Duration::from_millis(200), true).await;

        assert!(status.is_some());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_exited_child_is_fine() {
        let (mut child, pgid) = spawn_sh("exit 3");
        let first = child.wait().await.unwrap();
        assert_eq!(first.code(), Some(3));

        // reaped already: must not panic or hang
        let status = terminate_then_kill(&mut child, pgid, Duration::from_millis(100), true).await;
        assert_eq!(status.and_then(|s| s.code()), Some(3));

        signal_group(pgid.unwrap(), KillSignal::Kill);
    }

    #[tokio::test]
    async fn test_reaped_leader_only_sweeps_group_on_request() {
        // an unrelated group standing in for a recycled pgid
        let (mut bystander, bystander_pgid) = spawn_sh("sleep 30");
        let (mut child, _) = spawn_sh("exit 0");
        child.wait().await.unwrap();

        let status =
            terminate_then_kill(&mut child, bystander_pgid, Duration::from_millis(100), false)
                .await;
        assert!(status.unwrap().success());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bystander.try_wait().unwrap().is_none());

        terminate_then_kill(&mut child, bystander_pgid, Duration::from_millis(100), true).await;
        let bystander_status = timeout(Duration::from_secs(2), bystander.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!bystander_status.success());
    }
}
