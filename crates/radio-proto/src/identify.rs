//! Song identification via the audd.io recognition API.
//!
//! The recorded sample is uploaded as multipart form data with
//! `return=spotify`, so a match may carry a Spotify track id that the
//! music-library client can save.
//!
//! API reference: https://docs.audd.io/

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::IdentifyError;
use crate::protocol::Track;

#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self, sample: &Path) -> Result<Track, IdentifyError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    result: Option<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    spotify: Option<ApiSpotify>,
}

#[derive(Debug, Deserialize)]
struct ApiSpotify {
    #[serde(default)]
    id: String,
    #[serde(default)]
    external_urls: HashMap<String, String>,
}

pub struct AuddClient {
    client: reqwest::Client,
    gateway: String,
    api_token: String,
}

impl AuddClient {
    pub fn new(gateway: &str, api_token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            gateway: gateway.to_string(),
            api_token,
        })
    }
}

#[async_trait]
impl Identifier for AuddClient {
    async fn identify(&self, sample: &Path) -> Result<Track, IdentifyError> {
        let bytes = tokio::fs::read(sample)
            .await
            .map_err(|source| IdentifyError::Sample {
                path: sample.display().to_string(),
                source,
            })?;
        let file_name = sample
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "sample.mp3".to_string());

        info!("[identify] uploading {} ({} bytes)", file_name, bytes.len());
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("api_token", self.api_token.clone())
            .text("return", "spotify");

        let response = self.client.post(&self.gateway).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IdentifyError::Status(status.as_u16()));
        }
        let body: serde_json::Value = response.json().await?;
        parse_response(body)
    }
}

/// Turn an audd.io JSON body into a `Track`.  A body without a `result`
/// is a miss.
pub fn parse_response(body: serde_json::Value) -> Result<Track, IdentifyError> {
    let response: ApiResponse = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            warn!("[identify] unexpected response shape: {}", e);
            return Err(IdentifyError::NoMatch);
        }
    };
    let result = match response.result {
        Some(r) => r,
        None => {
            info!("[identify] no match (status={})", response.status);
            return Err(IdentifyError::NoMatch);
        }
    };

    // A match does not guarantee a Spotify id
    let (provider_id, provider_url) = match result.spotify {
        Some(sp) => (
            Some(sp.id).filter(|id| !id.is_empty()),
            sp.external_urls.get("spotify").cloned(),
        ),
        None => (None, None),
    };
    info!(
        "[identify] [{}] {} - {}",
        provider_id.as_deref().unwrap_or("-"),
        result.title,
        result.artist
    );
    Ok(Track {
        title: result.title,
        artist: result.artist,
        provider_id,
        provider_url,
        ok: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_match_with_spotify() {
        let body = serde_json::json!({
            "status": "success",
            "result": {
                "title": "Trouble",
                "artist": "Cat Stevens",
                "spotify": {
                    "id": "4sp",
                    "external_urls": { "spotify": "https://open.spotify.com/track/4sp" }
                }
            }
        });
        let track = parse_response(body).unwrap();
        assert!(track.ok);
        assert_eq!(track.title, "Trouble");
        assert_eq!(track.provider_id.as_deref(), Some("4sp"));
        assert_eq!(
            track.provider_url.as_deref(),
            Some("https://open.spotify.com/track/4sp")
        );
    }

    #[test]
    fn test_parse_match_without_spotify() {
        let body = serde_json::json!({
            "status": "success",
            "result": { "title": "Obscure", "artist": "Nobody" }
        });
        let track = parse_response(body).unwrap();
        assert!(track.ok);
        assert!(track.provider_id.is_none());
    }

    #[test]
    fn test_parse_empty_spotify_id_is_none() {
        let body = serde_json::json!({
            "status": "success",
            "result": { "title": "T", "artist": "A", "spotify": { "id": "" } }
        });
        assert!(parse_response(body).unwrap().provider_id.is_none());
    }

    #[test]
    fn test_parse_no_result_is_no_match() {
        let body = serde_json::json!({ "status": "success", "result": null });
        assert!(matches!(parse_response(body), Err(IdentifyError::NoMatch)));
    }
}
