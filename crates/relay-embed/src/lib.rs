pub mod backoff;
pub mod cache;
pub mod gateway;
pub mod provider;

pub use gateway::EmbedGateway;
pub use provider::{EmbedError, EmbedProvider, HttpEmbedProvider};
