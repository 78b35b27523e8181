//! Start/stop/poll of a locally launched backend service.
//!
//! `is_running` is a liveness check on the child handle, not a health check;
//! readiness is probed separately with [`wait_until_ready`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{AtelierError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Launch scripts expect to run from their own directory.
    fn working_dir(&self) -> Option<&Path> {
        self.program
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Spawned { pid: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Exited,
    /// The wait timed out. The handle was dropped anyway; the real process state is unknown.
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

/// What the idle supervisor needs from a backend process.
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    fn name(&self) -> &str;

    async fn is_running(&self) -> bool;

    async fn stop(&self) -> Result<StopOutcome>;
}

pub struct ProcessManager {
    name: String,
    child: Mutex<Option<Child>>,
    stop_wait: Duration,
}

impl ProcessManager {
    pub fn new(name: impl Into<String>, stop_wait: Duration) -> Self {
        Self {
            name: name.into(),
            child: Mutex::new(None),
            stop_wait,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().as_ref().and_then(Child::id)
    }

    /// Launches the backend and returns without waiting for it to become healthy.
    pub fn start(&self, spec: &LaunchSpec) -> Result<StartOutcome> {
        let mut slot = self.lock();
        if child_alive(&mut slot) {
            info!("process start skipped: name={} reason=already_running", self.name);
            return Ok(StartOutcome::AlreadyRunning);
        }
        if spec.program.as_os_str().is_empty() || !spec.program.exists() {
            return Err(AtelierError::Config(format!(
                "{} launch target not found: path={}",
                self.name,
                spec.program.display()
            )));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        if let Some(dir) = spec.working_dir() {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|err| {
            AtelierError::Config(format!(
                "spawn {} failed: path={} err={}",
                self.name,
                spec.program.display(),
                err
            ))
        })?;
        let pid = child.id();
        info!(
            "process started: name={} pid={:?} program={}",
            self.name,
            pid,
            spec.program.display()
        );
        *slot = Some(child);
        Ok(StartOutcome::Spawned { pid })
    }

    async fn stop_inner(&self) -> Result<StopOutcome> {
        let taken = {
            let mut slot = self.lock();
            if !child_alive(&mut slot) {
                return Ok(StopOutcome::NotRunning);
            }
            slot.take()
        };
        let Some(mut child) = taken else {
            return Ok(StopOutcome::NotRunning);
        };

        let pid = child.id();
        info!("process stopping: name={} pid={:?}", self.name, pid);
        terminate_tree(&mut child, pid).await;

        match tokio::time::timeout(self.stop_wait, child.wait()).await {
            Ok(Ok(status)) => {
                info!("process stopped: name={} pid={:?} status={}", self.name, pid, status);
                Ok(StopOutcome::Exited)
            }
            Ok(Err(err)) => {
                warn!(
                    "process wait failed, handle cleared: name={} pid={:?} err={}",
                    self.name, pid, err
                );
                Ok(StopOutcome::Unconfirmed)
            }
            Err(_) => {
                let _ = child.start_kill();
                warn!(
                    "process did not exit within {:?}, handle cleared, state unconfirmed: name={} pid={:?}",
                    self.stop_wait, self.name, pid
                );
                Ok(StopOutcome::Unconfirmed)
            }
        }
    }
}

#[async_trait]
impl ManagedProcess for ProcessManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_running(&self) -> bool {
        child_alive(&mut self.lock())
    }

    async fn stop(&self) -> Result<StopOutcome> {
        self.stop_inner().await
    }
}

// Exit-code poll. A child that has exited is dropped from the slot.
fn child_alive(slot: &mut Option<Child>) -> bool {
    let Some(child) = slot.as_mut() else {
        return false;
    };
    match child.try_wait() {
        Ok(None) => true,
        Ok(Some(_)) | Err(_) => {
            *slot = None;
            false
        }
    }
}

#[cfg(unix)]
async fn terminate_tree(child: &mut Child, pid: Option<u32>) {
    // the child leads its own process group; signal the whole group
    if let Some(pid) = pid {
        let group = format!("-{pid}");
        let status = Command::new("kill")
            .args(["-s", "TERM", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if matches!(status, Ok(s) if s.success()) {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
async fn terminate_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        let status = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .status()
            .await;
        if matches!(status, Ok(s) if s.success()) {
            return;
        }
    }
    let _ = child.start_kill();
}

/// Polls `probe` every `interval`, up to `attempts` times. A timeout is reported,
/// not treated as fatal: the backend may still come up later.
pub async fn wait_until_ready<F, Fut>(mut probe: F, interval: Duration, attempts: u32) -> Readiness
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if probe().await {
            return Readiness::Ready { attempts: attempt };
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Readiness::TimedOut { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_launch_target_is_a_config_error() {
        let manager = ProcessManager::new("forge", Duration::from_secs(1));
        let err = manager
            .start(&LaunchSpec::new("/definitely/not/here/webui.sh"))
            .expect_err("start must fail");
        assert!(matches!(err, AtelierError::Config(_)));
        assert!(!manager.is_running().await);
        assert_eq!(manager.pid(), None);
    }

    #[tokio::test]
    async fn stop_when_not_running_is_a_noop() {
        let manager = ProcessManager::new("forge", Duration::from_secs(1));
        assert_eq!(manager.stop().await.expect("stop"), StopOutcome::NotRunning);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_is_idempotent_and_stop_reaps() {
        let manager = ProcessManager::new("sleeper", Duration::from_secs(5));
        let spec = LaunchSpec::new("/bin/sh").arg("-c").arg("sleep 30");

        let first = manager.start(&spec).expect("first start");
        assert!(matches!(first, StartOutcome::Spawned { .. }));
        assert!(manager.is_running().await);
        assert_eq!(manager.start(&spec).expect("second start"), StartOutcome::AlreadyRunning);

        assert_eq!(manager.stop().await.expect("stop"), StopOutcome::Exited);
        assert!(!manager.is_running().await);
        assert_eq!(manager.pid(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_child_reads_as_stopped() {
        let manager = ProcessManager::new("crasher", Duration::from_secs(1));
        manager
            .start(&LaunchSpec::new("/bin/sh").arg("-c").arg("exit 3"))
            .expect("start");
        let mut running = true;
        for _ in 0..50 {
            running = manager.is_running().await;
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!running);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_reports_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let ready = wait_until_ready(
            move || {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 }
            },
            Duration::from_secs(5),
            10,
        )
        .await;
        assert_eq!(ready, Readiness::Ready { attempts: 3 });

        let never = wait_until_ready(|| async { false }, Duration::from_secs(5), 4).await;
        assert_eq!(never, Readiness::TimedOut { attempts: 4 });
    }
}
