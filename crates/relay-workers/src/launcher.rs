use std::time::Duration;

use async_trait::async_trait;
use relay_core::{RoomName, Result};

/// Drives the actual sandboxed process: spawn returns an opaque handle,
/// kill races a grace period before a hard signal, readiness is polled
/// rather than pushed.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Spawns the worker process with `job_description` (the serialised
    /// `DispatchProfile`) in its environment. Returns an opaque process id.
    async fn spawn(&self, room_name: &RoomName, job_description: &str) -> Result<String>;

    /// Polls the worker's readiness probe once.
    async fn probe_ready(&self, process_id: &str) -> bool;

    /// Sends a termination signal, waiting up to `grace` before assuming
    /// the process is gone.
    async fn kill(&self, process_id: &str, grace: Duration) -> Result<()>;
}
