//! Saving identified tracks to the user's Spotify library.
//!
//! Authorization happens once, outside the appliance; the resulting refresh
//! token is configured and exchanged for short-lived access tokens here.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::LibraryError;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const TRACKS_URL: &str = "https://api.spotify.com/v1/me/tracks";

#[async_trait]
pub trait MusicLibrary: Send + Sync {
    async fn add_to_library(&self, provider_id: &str) -> Result<(), LibraryError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct SpotifyLibrary {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    access: Mutex<Option<AccessToken>>,
}

impl SpotifyLibrary {
    pub fn new(
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            client_id,
            client_secret,
            refresh_token,
            access: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, LibraryError> {
        let mut access = self.access.lock().await;
        if let Some(token) = access.as_ref() {
            // Refresh a minute early so a request never races expiry
            if token.expires_at - ChronoDuration::seconds(60) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("[library] refreshing access token");
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LibraryError::Token(format!("HTTP {}", response.status())));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LibraryError::Token(e.to_string()))?;
        let value = token.access_token.clone();
        *access = Some(AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        });
        Ok(value)
    }
}

#[async_trait]
impl MusicLibrary for SpotifyLibrary {
    async fn add_to_library(&self, provider_id: &str) -> Result<(), LibraryError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .put(TRACKS_URL)
            .bearer_auth(token)
            .query(&[("ids", provider_id)])
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LibraryError::Status(status.as_u16()));
        }
        info!("[library] saved track {}", provider_id);
        Ok(())
    }
}
