pub mod backoff;
pub mod controller;
pub mod media_plane;
pub mod types;

pub use controller::{DispatchController, ExpiredCredentials};
pub use media_plane::{HttpMediaPlane, MediaPlane, MediaPlaneError};
pub use types::{ClaimSource, ClaimStatus, DispatchProfile, DispatchResult, JobClaim, WorkerClaimState};
