use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use relay_core::{RelayError, Result, RoomName};
use relay_workers::WorkerLauncher;
use tokio::process::Command;
use tracing::{info, warn};

const BASE_WORKER_PORT: u16 = 31000;

/// Spawns the voice-worker binary as a child process per room: spawn via
/// `tokio::process::Command`, track the PID, and fall back to a raw
/// `libc::kill(pid, SIGKILL)` on the grace-period timeout since by the time
/// the kill is needed the `Child` handle itself is often no longer held.
///
/// Each worker gets a distinct local port (passed as `RELAY_WORKER_PORT`)
/// so readiness can be probed over HTTP against a `/ready` route the
/// worker binary is expected to serve.
pub struct ProcessWorkerLauncher {
    worker_binary: String,
    next_port: AtomicU16,
    pids: DashMap<String, (u32, u16)>,
    http: reqwest::Client,
}

impl ProcessWorkerLauncher {
    pub fn new(worker_binary: String) -> Self {
        Self {
            worker_binary,
            next_port: AtomicU16::new(BASE_WORKER_PORT),
            pids: DashMap::new(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(1))
                .build()
                .expect("reqwest client"),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn spawn(&self, room_name: &RoomName, job_description: &str) -> Result<String> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);

        let child = Command::new(&self.worker_binary)
            .env("RELAY_ROOM_NAME", room_name.as_str())
            .env("RELAY_JOB_DESCRIPTION", job_description)
            .env("RELAY_WORKER_PORT", port.to_string())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| RelayError::Internal(format!("worker spawn failed: {e}")))?;

        let pid = child.id().ok_or_else(|| RelayError::Internal("spawned worker has no pid".to_string()))?;
        // Readiness and liveness are tracked via the port probe and raw
        // pid, not this handle, but the child still has to be waited on
        // somewhere or its process-table entry is never reaped once it
        // exits. Drive it to completion on its own task instead of
        // holding (or forgetting) the handle here.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        let process_id = format!("{pid}:{port}");
        self.pids.insert(process_id.clone(), (pid, port));
        info!(room_name = %room_name, pid, port, "worker process spawned");
        Ok(process_id)
    }

    async fn probe_ready(&self, process_id: &str) -> bool {
        let Some(port) = self.port_of(process_id) else {
            return false;
        };
        self.http
            .get(format!("http://127.0.0.1:{port}/ready"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn kill(&self, process_id: &str, grace: Duration) -> Result<()> {
        let Some((pid, _port)) = self.pids.get(process_id).map(|e| *e) else {
            return Ok(());
        };

        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        tokio::time::sleep(grace).await;
        if process_is_alive(pid) {
            warn!(pid, "worker did not exit within grace period, sending SIGKILL");
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
        }
        self.pids.remove(process_id);
        Ok(())
    }
}

fn process_is_alive(pid: u32) -> bool {
    // kill(pid, 0) performs no signal delivery, only existence/permission
    // checks (POSIX) — the standard liveness probe when no Child handle
    // is held.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

impl ProcessWorkerLauncher {
    fn port_of(&self, process_id: &str) -> Option<u16> {
        self.pids.get(process_id).map(|e| e.1)
    }
}
