pub mod db;
pub mod registry;
pub mod types;

pub use registry::{DataPlaneHandle, TenantRegistry};
pub use types::{DataPlaneConfig, MediaPlaneConfig, ProviderKeys, Tenant};
