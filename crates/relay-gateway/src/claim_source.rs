use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use relay_core::RoomName;
use relay_dispatch::{ClaimSource, ClaimStatus, JobClaim};
use relay_workers::{WorkerLauncher, WorkerState};

/// Bridges C4's `WorkerSupervisor` state into the `ClaimSource` seam C3
/// polls during dispatch — in the original job-board source this would be
/// a literal claim row; here a worker's own state machine already is the
/// claim.
pub struct SupervisorClaimSource<L: WorkerLauncher> {
    supervisor: Arc<relay_workers::WorkerSupervisor<L>>,
}

impl<L: WorkerLauncher> SupervisorClaimSource<L> {
    pub fn new(supervisor: Arc<relay_workers::WorkerSupervisor<L>>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl<L: WorkerLauncher + 'static> ClaimSource for SupervisorClaimSource<L> {
    async fn claim_for(&self, room_name: &RoomName) -> Option<JobClaim> {
        let state = self.supervisor.worker_state(room_name)?;
        let status = match state {
            WorkerState::Serving => ClaimStatus::Running,
            WorkerState::Terminated => ClaimStatus::Terminated,
            _ => ClaimStatus::Pending,
        };
        Some(JobClaim {
            room_name: room_name.clone(),
            worker_id: room_name.to_string(),
            claimed_at: Utc::now(),
            status,
        })
    }
}
