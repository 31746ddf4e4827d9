use thiserror::Error;

/// Error kinds from SPEC_FULL.md §7. Variants, not exception types — each
/// maps to a `code()` string clients and logs can key on.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("tenant '{tenant_key}' unavailable: {reason}")]
    TenantUnavailable { tenant_key: String, reason: String },

    #[error("agent '{slug}' not found for tenant '{tenant_id}'")]
    AgentNotFound { tenant_id: String, slug: String },

    #[error("invalid dispatch: {reason}")]
    InvalidDispatch { reason: String },

    #[error("dispatch unavailable after retry: {reason}")]
    DispatchUnavailable { reason: String },

    #[error("credentials expired for tenant '{tenant_id}' provider '{provider}'")]
    CredentialsExpired { tenant_id: String, provider: String },

    #[error("turn write failed for turn '{turn_id}': {cause}")]
    TurnWriteFailed { turn_id: String, cause: String },

    #[error("worker for room '{room_name}' crashed: {reason}")]
    WorkerCrash { room_name: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("embedding/rerank gateway error: {0}")]
    Embed(String),

    #[error("media plane error: {0}")]
    MediaPlane(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short error code for API responses and logs. `ContextDegraded` from
    /// §7 has no variant here: it is not an error, it's a metadata flag on
    /// a successful `ContextBundle` (see relay-context::ContextMetadata).
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::TenantUnavailable { .. } => "TENANT_UNAVAILABLE",
            RelayError::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            RelayError::InvalidDispatch { .. } => "INVALID_DISPATCH",
            RelayError::DispatchUnavailable { .. } => "DISPATCH_UNAVAILABLE",
            RelayError::CredentialsExpired { .. } => "CREDENTIALS_EXPIRED",
            RelayError::TurnWriteFailed { .. } => "TURN_WRITE_FAILED",
            RelayError::WorkerCrash { .. } => "WORKER_CRASH",
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::Database(_) => "DATABASE_ERROR",
            RelayError::Embed(_) => "EMBED_ERROR",
            RelayError::MediaPlane(_) => "MEDIA_PLANE_ERROR",
            RelayError::Serialization(_) => "SERIALIZATION_ERROR",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_for_each_variant() {
        let e = RelayError::AgentNotFound {
            tenant_id: "t1".into(),
            slug: "ada".into(),
        };
        assert_eq!(e.code(), "AGENT_NOT_FOUND");
    }
}
