use async_trait::async_trait;
use relay_core::RoomName;
use relay_tenants::MediaPlaneConfig;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum MediaPlaneError {
    #[error("media plane rejected request (4xx): {0}")]
    InvalidRequest(String),
    #[error("media plane server error (5xx): {0}")]
    ServerError(String),
    #[error("media plane transport error: {0}")]
    Transport(String),
}

/// Outbound contract to the media plane (§6). Out of scope: the SFU
/// itself; only this thin interface matters to the core. Each call takes
/// the tenant's own `MediaPlaneConfig` — §6: "Credentials are provided
/// per tenant" — so one `MediaPlane` instance serves every tenant.
#[async_trait]
pub trait MediaPlane: Send + Sync {
    async fn create_room(
        &self,
        config: &MediaPlaneConfig,
        name: &RoomName,
        job_description: &str,
        empty_timeout_secs: u64,
    ) -> Result<(), MediaPlaneError>;

    async fn mint_participant_token(
        &self,
        config: &MediaPlaneConfig,
        room: &RoomName,
        identity: &str,
        ttl_secs: u64,
    ) -> Result<String, MediaPlaneError>;

    async fn list_room_participants(&self, config: &MediaPlaneConfig, room: &RoomName) -> Result<Vec<String>, MediaPlaneError>;
}

/// HTTP JSON media-plane client. No rate-limit semantics here (the media
/// plane contract has no 429 case), just a 4xx/5xx split into typed errors.
#[derive(Default)]
pub struct HttpMediaPlane {
    client: reqwest::Client,
}

impl HttpMediaPlane {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    async fn post(&self, config: &MediaPlaneConfig, path: &str, body: serde_json::Value) -> Result<reqwest::Response, MediaPlaneError> {
        let url = format!("{}{}", config.url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(format!("{}:{}", config.api_key, config.api_secret))
            .json(&body)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| MediaPlaneError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = %text, "media plane 4xx");
            return Err(MediaPlaneError::InvalidRequest(text));
        }
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = %text, "media plane 5xx");
            return Err(MediaPlaneError::ServerError(text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl MediaPlane for HttpMediaPlane {
    async fn create_room(
        &self,
        config: &MediaPlaneConfig,
        name: &RoomName,
        job_description: &str,
        empty_timeout_secs: u64,
    ) -> Result<(), MediaPlaneError> {
        debug!(room = %name, "creating media-plane room");
        self.post(
            config,
            "/rooms",
            serde_json::json!({
                "name": name.as_str(),
                "job_description": job_description,
                "empty_timeout": empty_timeout_secs,
            }),
        )
        .await?;
        Ok(())
    }

    async fn mint_participant_token(
        &self,
        config: &MediaPlaneConfig,
        room: &RoomName,
        identity: &str,
        ttl_secs: u64,
    ) -> Result<String, MediaPlaneError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let resp = self
            .post(
                config,
                "/tokens",
                serde_json::json!({
                    "room": room.as_str(),
                    "identity": identity,
                    "ttl": ttl_secs,
                }),
            )
            .await?;

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| MediaPlaneError::Transport(e.to_string()))?;
        Ok(parsed.token)
    }

    async fn list_room_participants(&self, config: &MediaPlaneConfig, room: &RoomName) -> Result<Vec<String>, MediaPlaneError> {
        #[derive(Deserialize)]
        struct ParticipantsResponse {
            participants: Vec<String>,
        }

        let url = format!("{}/rooms/{}/participants", config.url, room.as_str());
        let resp = self
            .client
            .get(&url)
            .bearer_auth(format!("{}:{}", config.api_key, config.api_secret))
            .send()
            .await
            .map_err(|e| MediaPlaneError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(MediaPlaneError::ServerError(text));
        }

        let parsed: ParticipantsResponse = resp
            .json()
            .await
            .map_err(|e| MediaPlaneError::Transport(e.to_string()))?;
        Ok(parsed.participants)
    }
}
