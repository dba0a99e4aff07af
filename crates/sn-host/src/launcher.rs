//! Remote worker launching.
//!
//! Resolves a worker's machine category to a launch command (typically an
//! `ssh` invocation that starts the client-mode binary on the remote box),
//! executes it, and tracks the resulting process handle.  Launching is the
//! only externally visible side effect in the system, so it is idempotent
//! per worker: a second `launch` while the previous process is alive is a
//! no-op.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use sn_types::{LaunchError, WorkerDescriptor};

/// Placeholders understood by launch command templates:
/// `{worker}` (the worker address), `{host}` (the host's advertised
/// dispatch address), and `{category}`.
pub fn render_template(template: &str, descriptor: &WorkerDescriptor, host: &str) -> String {
    template
        .replace("{worker}", &descriptor.address)
        .replace("{host}", host)
        .replace("{category}", &descriptor.category)
}

struct LaunchHandle {
    child: Child,
    launched_at: Instant,
}

/// Launches and supervises client-mode worker processes.
pub struct RemoteLauncher {
    /// Machine category → launch command template.  Read once at startup.
    categories: HashMap<String, String>,
    /// Host address substituted into templates so clients can connect back.
    host_addr: String,
    handles: Mutex<HashMap<String, LaunchHandle>>,
}

impl RemoteLauncher {
    pub fn new(categories: HashMap<String, String>, host_addr: impl Into<String>) -> Self {
        Self {
            categories,
            host_addr: host_addr.into(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn knows_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    /// Start the worker process for `descriptor`.  Returns `true` if a new
    /// process was spawned, `false` if a live one already existed.
    pub fn launch(&self, descriptor: &WorkerDescriptor) -> Result<bool, LaunchError> {
        let template =
            self.categories
                .get(&descriptor.category)
                .ok_or_else(|| LaunchError::UnknownCategory {
                    category: descriptor.category.clone(),
                })?;
        let command = render_template(template, descriptor, &self.host_addr);

        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get_mut(&descriptor.address) {
            if matches!(handle.child.try_wait(), Ok(None)) {
                debug!(worker = %descriptor.address, "launch skipped, process already running");
                return Ok(false);
            }
            handles.remove(&descriptor.address);
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: command.clone(),
                source,
            })?;

        info!(worker = %descriptor.address, command = %command, "worker launch issued");
        handles.insert(
            descriptor.address.clone(),
            LaunchHandle {
                child,
                launched_at: Instant::now(),
            },
        );
        Ok(true)
    }

    /// Non-blocking liveness check of the launch process.
    pub fn is_alive(&self, address: &str) -> bool {
        let mut handles = self.handles.lock();
        match handles.get_mut(address) {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Collect launch processes that exited on their own, with their exit
    /// details.  The handle is dropped; whether the worker itself is gone
    /// is decided by the registry via channel liveness.
    pub async fn reap(&self) -> Vec<(String, LaunchError)> {
        let exited: Vec<(String, LaunchHandle)> = {
            let mut handles = self.handles.lock();
            let dead: Vec<String> = handles
                .iter_mut()
                .filter_map(|(addr, h)| {
                    if !matches!(h.child.try_wait(), Ok(None)) {
                        Some(addr.clone())
                    } else {
                        None
                    }
                })
                .collect();
            dead.into_iter()
                .filter_map(|addr| handles.remove(&addr).map(|h| (addr, h)))
                .collect()
        };

        let mut out = Vec::with_capacity(exited.len());
        for (address, mut handle) in exited {
            let mut stderr = String::new();
            if let Some(mut pipe) = handle.child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let code = match handle.child.wait().await {
                Ok(status) => status.code(),
                Err(_) => None,
            };
            debug!(
                worker = %address,
                code = ?code,
                uptime_ms = handle.launched_at.elapsed().as_millis() as u64,
                "launch process exited"
            );
            out.push((
                address.clone(),
                LaunchError::Exited {
                    worker: address,
                    code,
                    stderr: stderr.trim().to_string(),
                },
            ));
        }
        out
    }

    /// Best-effort request to stop one worker's launch process.  The caller
    /// must not assume the remote side is gone until the channel confirms
    /// silence or the registry marks it unreachable.
    pub fn terminate(&self, address: &str) {
        let mut handles = self.handles.lock();
        if let Some(mut handle) = handles.remove(address) {
            if let Err(e) = handle.child.start_kill() {
                warn!(worker = %address, error = %e, "terminate failed");
            }
        }
    }

    /// Best-effort stop of every tracked launch process.
    pub fn terminate_all(&self) {
        let mut handles = self.handles.lock();
        for (address, mut handle) in handles.drain() {
            if let Err(e) = handle.child.start_kill() {
                warn!(worker = %address, error = %e, "terminate failed");
            }
        }
    }

    /// Number of tracked launch processes (alive or not yet reaped).
    pub fn active(&self) -> usize {
        self.handles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn launcher_with(template: &str) -> RemoteLauncher {
        let mut categories = HashMap::new();
        categories.insert("test-box".to_string(), template.to_string());
        RemoteLauncher::new(categories, "127.0.0.1:7070")
    }

    fn worker() -> WorkerDescriptor {
        WorkerDescriptor::new("node1.local", "test-box")
    }

    #[test]
    fn template_rendering() {
        let desc = WorkerDescriptor::new("gpu1", "gpu-box");
        let rendered = render_template(
            "ssh {worker} sweepnet --mode client --connect {host} --address {worker} --category {category}",
            &desc,
            "host0:7070",
        );
        assert_eq!(
            rendered,
            "ssh gpu1 sweepnet --mode client --connect host0:7070 --address gpu1 --category gpu-box"
        );
    }

    #[tokio::test]
    async fn unknown_category_is_an_error() {
        let launcher = launcher_with("true");
        let desc = WorkerDescriptor::new("node1", "no-such-category");
        let err = launcher.launch(&desc).unwrap_err();
        assert!(matches!(err, LaunchError::UnknownCategory { .. }));
    }

    #[tokio::test]
    async fn double_launch_starts_exactly_one_process() {
        let launcher = launcher_with("sleep 5");
        assert!(launcher.launch(&worker()).unwrap());
        assert!(!launcher.launch(&worker()).unwrap());
        assert_eq!(launcher.active(), 1);
        assert!(launcher.is_alive("node1.local"));
        launcher.terminate_all();
    }

    #[tokio::test]
    async fn reap_reports_exit_and_stderr() {
        let launcher = launcher_with("echo boom >&2; exit 3");
        launcher.launch(&worker()).unwrap();

        // Give the short-lived process time to exit.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let reaped = launcher.reap().await;
        assert_eq!(reaped.len(), 1);
        match &reaped[0].1 {
            LaunchError::Exited { code, stderr, .. } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(launcher.active(), 0);
        assert!(!launcher.is_alive("node1.local"));
    }

    #[tokio::test]
    async fn relaunch_allowed_after_exit() {
        let launcher = launcher_with("true");
        launcher.launch(&worker()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Handle exists but the process is dead: launch again spawns anew.
        assert!(launcher.launch(&worker()).unwrap());
        launcher.terminate_all();
    }

    #[tokio::test]
    async fn terminate_is_best_effort_and_idempotent() {
        let launcher = launcher_with("sleep 5");
        launcher.launch(&worker()).unwrap();
        launcher.terminate("node1.local");
        launcher.terminate("node1.local");
        assert_eq!(launcher.active(), 0);
    }
}
