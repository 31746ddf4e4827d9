pub mod bridge;
pub mod types;

pub use bridge::EventBridge;
pub use types::{EventKind, TurnCommitted};
