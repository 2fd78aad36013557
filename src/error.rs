use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by the tile service to its callers.
///
/// Each variant maps to exactly one HTTP status in the server layer.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Request carried no Referer header (hot-link protection)
    #[error("Unauthorized request.")]
    Unauthorized,

    /// Coordinate failed validation
    #[error("Invalid tile coordinates.")]
    InvalidCoordinate { zoom: i64, x: i64, y: i64 },

    /// Client exceeded its per-minute request budget
    #[error("Too many requests. Retry in {}s.", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// Upstream provider has no tile at this coordinate
    #[error("Tile not found.")]
    NotFound,

    /// Upstream provider failed for any reason other than a 404
    #[error("Upstream tile provider error: {0}")]
    Upstream(UpstreamError),
}

impl From<UpstreamError> for TileError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound => TileError::NotFound,
            other => TileError::Upstream(other),
        }
    }
}

/// Errors from fetching a tile over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Provider answered 404
    #[error("tile not found upstream")]
    NotFound,

    /// Provider answered with a non-2xx status other than 404
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Connection, TLS or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// URL template did not produce a valid URL
    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),
}

/// Local disk cache failures.
///
/// These never fail a tile request; the fetched bytes are still served.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("cache I/O error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors loading provider settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file could not be read
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid JSON for the expected shape
    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A setting holds a value the proxy cannot run with
    #[error("invalid setting {name}: {message}")]
    Invalid { name: &'static str, message: String },
}
