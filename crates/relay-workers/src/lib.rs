pub mod launcher;
pub mod state;
pub mod supervisor;

pub use launcher::WorkerLauncher;
pub use state::WorkerState;
pub use supervisor::{dispatch_failed_error, WorkerHandle, WorkerSupervisor};
