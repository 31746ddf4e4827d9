pub mod registry;
pub mod registry_table;
pub mod types;

pub use registry::AgentRegistry;
pub use types::{Agent, AgentDefaults, EmbeddingProfile, ModelProfile};
