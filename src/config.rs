//! Configuration for the tile cache proxy.
//!
//! Two layers:
//! - [`Config`]: process options from the command line and `TILE_`
//!   environment variables (bind address, cache directory, HTTP behavior).
//! - [`ProviderSettings`]: the tile provider and cache policy, read from a
//!   JSON settings file that an external admin tool owns. The proxy only
//!   reads it. A reload replaces the whole snapshot in [`SettingsStore`].
//!
//! # Settings File
//!
//! ```json
//! {
//!   "MaxCacheTileSizeInMB": 512,
//!   "TileProviderUrlTemplate": "https://tile.example.com/{z}/{x}/{y}.png?key={key}",
//!   "TileProviderKey": "abc123",
//!   "TileProviderAttribution": "© Example Maps",
//!   "TileRateLimitEnabled": true,
//!   "TileRateLimitPerMinute": 300
//! }
//! ```
//!
//! Missing keys take their defaults.
//!
//! # Environment Variables
//!
//! - `TILE_HOST` - Server bind address (default: 0.0.0.0)
//! - `TILE_PORT` - Server port (default: 3000)
//! - `TILE_CACHE_DIR` - Tile cache directory (default: ./tile-cache)
//! - `TILE_SETTINGS_FILE` - Provider settings JSON file
//! - `TILE_UPSTREAM_TIMEOUT` - Upstream request timeout in seconds (default: 10)
//! - `TILE_USER_AGENT` - User-Agent sent to the provider
//! - `TILE_TRUST_FORWARDED_FOR` - Derive client keys from X-Forwarded-For (default: true)
//! - `TILE_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 86400)
//! - `TILE_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `TILE_ADMIN_ENABLED` - Mount the cache-clear endpoint (default: false)

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use clap::Parser;
use serde::Deserialize;

use crate::error::SettingsError;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default tile cache directory.
pub const DEFAULT_CACHE_DIR: &str = "./tile-cache";

/// Default upstream request timeout in seconds.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Default HTTP cache max-age in seconds (1 day).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 86_400;

/// Default cache budget in megabytes.
pub const DEFAULT_MAX_CACHE_SIZE_MB: u64 = 100;

/// Default per-client request budget.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 600;

/// Default provider URL template (OpenStreetMap standard tiles).
pub const DEFAULT_URL_TEMPLATE: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Default attribution for the default provider.
pub const DEFAULT_ATTRIBUTION: &str = "© OpenStreetMap contributors";

/// Bytes per megabyte in the settings file.
pub const BYTES_PER_MB: u64 = 1_048_576;

/// Default User-Agent for upstream requests.
pub fn default_user_agent() -> String {
    format!("tile-cache-proxy/{}", env!("CARGO_PKG_VERSION"))
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile Cache Proxy - a caching proxy for slippy-map tiles.
///
/// Serves tiles from a local disk cache and fetches misses from a configured
/// upstream provider, with per-client rate limiting.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-cache-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TILE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TILE_PORT")]
    pub port: u16,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Directory holding cached tiles.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "TILE_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Provider settings file (JSON).
    ///
    /// If not specified, built-in defaults are used and reload is a no-op.
    #[arg(long, env = "TILE_SETTINGS_FILE")]
    pub settings_file: Option<PathBuf>,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Upstream request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_UPSTREAM_TIMEOUT_SECS, env = "TILE_UPSTREAM_TIMEOUT")]
    pub upstream_timeout: u64,

    /// User-Agent header sent to the tile provider.
    #[arg(long, default_value_t = default_user_agent(), env = "TILE_USER_AGENT")]
    pub user_agent: String,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// Use the first X-Forwarded-For address as the client identity.
    ///
    /// Disable when the proxy is exposed directly, so clients cannot pick
    /// their own rate-limit key.
    #[arg(
        long,
        default_value_t = true,
        env = "TILE_TRUST_FORWARDED_FOR",
        action = clap::ArgAction::Set
    )]
    pub trust_forwarded_for: bool,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TILE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TILE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Mount `DELETE /cache` for clearing the tile cache.
    #[arg(long, default_value_t = false, env = "TILE_ADMIN_ENABLED")]
    pub admin_enabled: bool,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(
                "cache_dir must not be empty. Set --cache-dir or TILE_CACHE_DIR".to_string(),
            );
        }

        if self.upstream_timeout == 0 || self.upstream_timeout > 300 {
            return Err("upstream_timeout must be between 1 and 300 seconds".to_string());
        }

        if self.user_agent.trim().is_empty() {
            return Err("user_agent must not be empty".to_string());
        }

        if let Some(ref path) = self.settings_file {
            if !path.is_file() {
                return Err(format!("settings file not found: {}", path.display()));
            }
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load provider settings from the configured file, or defaults.
    pub fn load_settings(&self) -> Result<ProviderSettings, SettingsError> {
        match self.settings_file {
            Some(ref path) => ProviderSettings::from_file(path),
            None => Ok(ProviderSettings::default()),
        }
    }
}

// =============================================================================
// Provider Settings
// =============================================================================

/// Immutable snapshot of the tile provider and cache policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// URL template with `{z}`, `{x}`, `{y}` and optional `{key}` placeholders
    pub url_template: String,

    /// Provider API key substituted for `{key}`
    pub provider_key: Option<String>,

    /// Attribution text shown by the map UI
    pub attribution: String,

    /// Disk cache budget in bytes
    pub max_cache_size_bytes: u64,

    /// Whether per-client rate limiting is applied
    pub rate_limit_enabled: bool,

    /// Requests allowed per client per minute
    pub rate_limit_per_minute: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            provider_key: None,
            attribution: DEFAULT_ATTRIBUTION.to_string(),
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE_MB * BYTES_PER_MB,
            rate_limit_enabled: false,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }
}

/// On-disk shape of the settings file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SettingsFile {
    #[serde(rename = "MaxCacheTileSizeInMB")]
    max_cache_tile_size_in_mb: u64,
    tile_provider_url_template: String,
    tile_provider_key: Option<String>,
    tile_provider_attribution: String,
    tile_rate_limit_enabled: bool,
    tile_rate_limit_per_minute: u32,
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            max_cache_tile_size_in_mb: DEFAULT_MAX_CACHE_SIZE_MB,
            tile_provider_url_template: DEFAULT_URL_TEMPLATE.to_string(),
            tile_provider_key: None,
            tile_provider_attribution: DEFAULT_ATTRIBUTION.to_string(),
            tile_rate_limit_enabled: false,
            tile_rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }
}

impl ProviderSettings {
    /// Parse settings from the JSON text of a settings file.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: SettingsFile = serde_json::from_str(json)?;
        Ok(file.into())
    }

    /// Read and validate a settings file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the values the proxy depends on.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for placeholder in ["{z}", "{x}", "{y}"] {
            if !self.url_template.contains(placeholder) {
                return Err(SettingsError::Invalid {
                    name: "TileProviderUrlTemplate",
                    message: format!("missing {} placeholder", placeholder),
                });
            }
        }

        if self.url_template.contains("{key}") && self.provider_key.is_none() {
            return Err(SettingsError::Invalid {
                name: "TileProviderKey",
                message: "template uses {key} but no key is set".to_string(),
            });
        }

        if self.rate_limit_enabled && self.rate_limit_per_minute == 0 {
            return Err(SettingsError::Invalid {
                name: "TileRateLimitPerMinute",
                message: "must be greater than 0 when rate limiting is enabled".to_string(),
            });
        }

        Ok(())
    }
}

impl From<SettingsFile> for ProviderSettings {
    fn from(file: SettingsFile) -> Self {
        Self {
            url_template: file.tile_provider_url_template,
            provider_key: file.tile_provider_key.filter(|k| !k.is_empty()),
            attribution: file.tile_provider_attribution,
            max_cache_size_bytes: file.max_cache_tile_size_in_mb.saturating_mul(BYTES_PER_MB),
            rate_limit_enabled: file.tile_rate_limit_enabled,
            rate_limit_per_minute: file.tile_rate_limit_per_minute,
        }
    }
}

// =============================================================================
// Settings Store
// =============================================================================

/// Shared holder for the current [`ProviderSettings`] snapshot.
///
/// Readers take an `Arc` clone and keep a consistent view for the rest of
/// their request; [`SettingsStore::replace`] swaps in a whole new snapshot.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Arc<ProviderSettings>>,
}

impl SettingsStore {
    /// Create a store holding `settings`.
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ProviderSettings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the snapshot.
    pub fn replace(&self, settings: ProviderSettings) {
        let settings = Arc::new(settings);
        match self.current.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(ProviderSettings::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
