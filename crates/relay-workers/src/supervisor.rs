use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use relay_core::{RelayError, Result, RoomName};
use tracing::{info, instrument, warn};

use crate::launcher::WorkerLauncher;
use crate::state::WorkerState;

const READINESS_WINDOW_SECS: u64 = 30;
const READINESS_MAX_FAILURES: u32 = 3;
const MAX_RESPAWNS: u32 = 3;
const DUPLICATE_GRACE: Duration = Duration::from_secs(5);
const ROOM_EMPTY_GRACE: Duration = Duration::from_secs(60);
const PROBE_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub room_name: RoomName,
    pub state: WorkerState,
    pub respawns: u32,
}

struct Worker {
    room_name: RoomName,
    state: Mutex<WorkerState>,
    process_id: Mutex<Option<String>>,
    respawns: AtomicU32,
}

impl Worker {
    fn new(room_name: RoomName) -> Self {
        Self {
            room_name,
            state: Mutex::new(WorkerState::Spawning),
            process_id: Mutex::new(None),
            respawns: AtomicU32::new(0),
        }
    }

    fn snapshot(&self) -> WorkerHandle {
        WorkerHandle {
            room_name: self.room_name.clone(),
            state: *self.state.lock().unwrap(),
            respawns: self.respawns.load(Ordering::SeqCst),
        }
    }

    fn set_state(&self, next: WorkerState) {
        let mut guard = self.state.lock().unwrap();
        match guard.transition(next) {
            Ok(new_state) => *guard = new_state,
            Err(e) => warn!(room_name = %self.room_name, "{e}"),
        }
    }

    fn get_state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }
}

/// Owns every active worker, one per room. Idempotent on `room_name`;
/// duplicates are reaped (newest survives, older gets a 5s-grace kill).
pub struct WorkerSupervisor<L: WorkerLauncher> {
    launcher: Arc<L>,
    workers: Arc<DashMap<RoomName, Arc<Worker>>>,
}

impl<L: WorkerLauncher + 'static> WorkerSupervisor<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
            workers: Arc::new(DashMap::new()),
        }
    }

    /// Idempotent on `room_name`: a live (non-terminated) worker is
    /// returned as-is; otherwise a fresh one is spawned and driven to
    /// readiness in the background.
    #[instrument(skip(self, job_description), fields(room_name = %room_name))]
    pub async fn ensure_worker(&self, room_name: RoomName, job_description: String) -> WorkerHandle {
        if let Some(existing) = self.workers.get(&room_name) {
            if existing.get_state() != WorkerState::Terminated {
                return existing.snapshot();
            }
        }

        let worker = Arc::new(Worker::new(room_name.clone()));
        let previous = self.workers.insert(room_name.clone(), worker.clone());
        if let Some(prev) = previous {
            if prev.get_state() != WorkerState::Terminated {
                self.reap_duplicate(prev);
            }
        }

        let handle = worker.snapshot();
        let launcher = Arc::clone(&self.launcher);
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            drive_to_ready(launcher, workers, worker, job_description).await;
        });
        handle
    }

    pub fn worker_state(&self, room_name: &RoomName) -> Option<WorkerState> {
        self.workers.get(room_name).map(|w| w.get_state())
    }

    /// Explicit termination (caller-initiated or room-empty-triggered).
    #[instrument(skip(self), fields(room_name = %room_name))]
    pub async fn terminate(&self, room_name: &RoomName, reason: &str) -> Result<()> {
        let worker = match self.workers.get(room_name) {
            Some(w) => w.value().clone(),
            None => return Ok(()),
        };
        info!(reason, "terminating worker");
        terminate_worker(&self.launcher, &worker).await
    }

    /// Room-empty signal from the media plane: drain now, but force a
    /// termination within 60s even if the worker never finishes draining
    /// on its own.
    pub fn on_room_empty(&self, room_name: RoomName) {
        let launcher = Arc::clone(&self.launcher);
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let worker = match workers.get(&room_name) {
                Some(w) => w.value().clone(),
                None => return,
            };
            worker.set_state(WorkerState::Draining);
            tokio::time::timeout(ROOM_EMPTY_GRACE, terminate_worker(&launcher, &worker))
                .await
                .ok();
            worker.set_state(WorkerState::Terminated);
        });
    }

    fn reap_duplicate(&self, worker: Arc<Worker>) {
        let launcher = Arc::clone(&self.launcher);
        tokio::spawn(async move {
            tokio::time::sleep(DUPLICATE_GRACE).await;
            let _ = terminate_worker(&launcher, &worker).await;
        });
    }
}

async fn terminate_worker<L: WorkerLauncher>(launcher: &L, worker: &Worker) -> Result<()> {
    worker.set_state(WorkerState::Draining);
    if let Some(pid) = worker.process_id.lock().unwrap().clone() {
        launcher.kill(&pid, DUPLICATE_GRACE).await?;
    }
    worker.set_state(WorkerState::Terminated);
    Ok(())
}

/// Spawns the worker, waits for readiness, retrying the whole spawn up to
/// `MAX_RESPAWNS` times if 3 consecutive probes fail inside the first 30s.
async fn drive_to_ready<L: WorkerLauncher>(
    launcher: Arc<L>,
    workers: Arc<DashMap<RoomName, Arc<Worker>>>,
    worker: Arc<Worker>,
    job_description: String,
) {
    loop {
        worker.set_state(WorkerState::Spawning);
        let spawned = launcher.spawn(&worker.room_name, &job_description).await;
        let process_id = match spawned {
            Ok(pid) => pid,
            Err(e) => {
                warn!(room_name = %worker.room_name, "worker spawn failed: {e}");
                mark_dispatch_failed(&workers, &worker);
                return;
            }
        };
        *worker.process_id.lock().unwrap() = Some(process_id.clone());
        worker.set_state(WorkerState::Registering);

        let became_ready = poll_readiness(&launcher, &process_id).await;
        if became_ready {
            worker.set_state(WorkerState::Ready);
            worker.set_state(WorkerState::Serving);
            return;
        }

        let _ = launcher.kill(&process_id, DUPLICATE_GRACE).await;
        let respawns = worker.respawns.fetch_add(1, Ordering::SeqCst) + 1;
        if respawns >= MAX_RESPAWNS {
            warn!(room_name = %worker.room_name, "worker exhausted respawns, marking DispatchFailed");
            mark_dispatch_failed(&workers, &worker);
            return;
        }
        info!(room_name = %worker.room_name, respawns, "respawning worker after readiness failure");
    }
}

async fn poll_readiness<L: WorkerLauncher>(launcher: &L, process_id: &str) -> bool {
    let window = tokio::time::Instant::now() + Duration::from_secs(READINESS_WINDOW_SECS);
    let mut consecutive_failures = 0u32;
    while tokio::time::Instant::now() < window {
        if launcher.probe_ready(process_id).await {
            return true;
        }
        consecutive_failures += 1;
        if consecutive_failures >= READINESS_MAX_FAILURES {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(PROBE_INTERVAL_MS)).await;
    }
    false
}

fn mark_dispatch_failed(workers: &DashMap<RoomName, Arc<Worker>>, worker: &Worker) {
    worker.set_state(WorkerState::Terminated);
    workers.remove(&worker.room_name);
}

/// Surfaced by callers polling a worker that exhausted its respawn budget.
pub fn dispatch_failed_error(room_name: &RoomName) -> RelayError {
    RelayError::WorkerCrash {
        room_name: room_name.to_string(),
        reason: "readiness probe failed 3x within 30s, 3 respawns exhausted".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct AlwaysReadyLauncher {
        killed: AtomicBool,
    }

    #[async_trait]
    impl WorkerLauncher for AlwaysReadyLauncher {
        async fn spawn(&self, _room_name: &RoomName, _job_description: &str) -> Result<String> {
            Ok("proc-1".to_string())
        }

        async fn probe_ready(&self, _process_id: &str) -> bool {
            true
        }

        async fn kill(&self, _process_id: &str, _grace: Duration) -> Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NeverReadyLauncher;

    #[async_trait]
    impl WorkerLauncher for NeverReadyLauncher {
        async fn spawn(&self, _room_name: &RoomName, _job_description: &str) -> Result<String> {
            Ok("proc-dead".to_string())
        }

        async fn probe_ready(&self, _process_id: &str) -> bool {
            false
        }

        async fn kill(&self, _process_id: &str, _grace: Duration) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ensure_worker_is_idempotent_for_same_room() {
        let supervisor = WorkerSupervisor::new(AlwaysReadyLauncher {
            killed: AtomicBool::new(false),
        });
        let room = RoomName("r1".to_string());

        let first = supervisor.ensure_worker(room.clone(), "profile".to_string()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = supervisor.ensure_worker(room.clone(), "profile".to_string()).await;

        assert_eq!(first.room_name, second.room_name);
        assert_eq!(supervisor.worker_state(&room), Some(WorkerState::Serving));
    }

    #[tokio::test]
    async fn terminate_transitions_to_terminated() {
        let supervisor = WorkerSupervisor::new(AlwaysReadyLauncher {
            killed: AtomicBool::new(false),
        });
        let room = RoomName("r2".to_string());
        supervisor.ensure_worker(room.clone(), "profile".to_string()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        supervisor.terminate(&room, "caller requested").await.unwrap();
        assert_eq!(supervisor.worker_state(&room), Some(WorkerState::Terminated));
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn readiness_failures_exhaust_respawns_and_remove_worker() {
        let supervisor = WorkerSupervisor::new(NeverReadyLauncher);
        let room = RoomName("r3".to_string());
        supervisor.ensure_worker(room.clone(), "profile".to_string()).await;

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        assert_eq!(supervisor.worker_state(&room), None);
    }
}
