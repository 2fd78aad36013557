//! HTTP fetcher for the upstream tile provider.
//!
//! The provider URL comes from the settings snapshot's template:
//!
//! ```text
//! https://tile.example.com/{z}/{x}/{y}.png?apikey={key}
//! ```
//!
//! A single GET is issued per fetch, bounded by the client timeout. There is
//! no retry. Status mapping:
//!
//! | Upstream result        | Error                         |
//! |------------------------|-------------------------------|
//! | 2xx                    | body returned verbatim        |
//! | 404                    | [`UpstreamError::NotFound`]   |
//! | other status           | [`UpstreamError::Status`]     |
//! | timeout                | [`UpstreamError::Timeout`]    |
//! | connect / body failure | [`UpstreamError::Transport`]  |

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tracing::debug;
use url::Url;

use crate::config::{default_user_agent, ProviderSettings, DEFAULT_UPSTREAM_TIMEOUT_SECS};
use crate::error::UpstreamError;
use crate::tile::TileCoordinate;

/// Source of tile bytes for cache misses.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch the tile at `coord` from the provider described by `settings`.
    async fn fetch(
        &self,
        settings: &ProviderSettings,
        coord: &TileCoordinate,
    ) -> Result<Bytes, UpstreamError>;
}

/// Substitute a coordinate (and provider key) into a URL template.
///
/// The key is percent-encoded; `{key}` becomes empty when no key is set.
pub fn build_tile_url(
    template: &str,
    provider_key: Option<&str>,
    coord: &TileCoordinate,
) -> Result<Url, UpstreamError> {
    let key = provider_key.map(urlencoding::encode).unwrap_or_default();

    let raw = template
        .replace("{z}", &coord.zoom.to_string())
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string())
        .replace("{key}", &key);

    Url::parse(&raw).map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", raw, e)))
}

/// [`TileFetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    /// Create a fetcher with the default timeout and User-Agent.
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_options(
            Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            &default_user_agent(),
        )
    }

    /// Create a fetcher with a custom timeout and User-Agent.
    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| UpstreamError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(
        &self,
        settings: &ProviderSettings,
        coord: &TileCoordinate,
    ) -> Result<Bytes, UpstreamError> {
        let url = build_tile_url(
            &settings.url_template,
            settings.provider_key.as_deref(),
            coord,
        )?;

        debug!(%coord, host = url.host_str().unwrap_or(""), "Fetching tile from upstream");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound);
        }
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        response.bytes().await.map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport(err.to_string())
    }
}
