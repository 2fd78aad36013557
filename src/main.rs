//! Tile Cache Proxy - a caching proxy for slippy-map tiles.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_cache_proxy::{
    config::{Config, SettingsStore, BYTES_PER_MB},
    create_router,
    limit::RATE_LIMIT_WINDOW,
    tile::{DiskTileCache, TileCacheService},
    HttpTileFetcher, RouterConfig, TileFetcher,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let settings = match config.load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Settings error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_banner();

    info!("Configuration:");
    info!("  Cache directory: {}", config.cache_dir.display());
    match config.settings_file {
        Some(ref path) => info!("  Settings file: {}", path.display()),
        None => info!("  Settings file: none (built-in defaults)"),
    }
    info!("  Provider: {}", settings.url_template);
    info!(
        "  Cache budget: {}MB",
        settings.max_cache_size_bytes / BYTES_PER_MB
    );
    if settings.rate_limit_enabled {
        info!(
            "  Rate limit: {} requests/minute per client",
            settings.rate_limit_per_minute
        );
    } else {
        info!("  Rate limit: disabled");
    }
    info!("  Upstream timeout: {}s", config.upstream_timeout);
    if !config.trust_forwarded_for {
        info!("  X-Forwarded-For: ignored (clients keyed by peer address)");
    }
    if config.admin_enabled {
        warn!("  Admin endpoints: ENABLED - DELETE /cache is publicly reachable");
    }

    let cache = match DiskTileCache::open(&config.cache_dir, settings.max_cache_size_bytes).await
    {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to open tile cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match HttpTileFetcher::with_options(
        Duration::from_secs(config.upstream_timeout),
        &config.user_agent,
    ) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Failed to create upstream client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let settings_store = Arc::new(SettingsStore::new(settings));
    let tile_service = Arc::new(TileCacheService::new(
        cache,
        fetcher,
        Arc::clone(&settings_store),
    ));

    spawn_rate_limit_purge(Arc::clone(&tile_service));

    if let Some(path) = config.settings_file.clone() {
        spawn_settings_reload(path, settings_store, Arc::clone(&tile_service));
    }

    // Create router
    let router = create_router(tile_service, build_router_config(&config));

    // Bind and serve
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/cache/stats", addr);
    info!("");
    info!("  Fetch a tile directly:");
    info!(
        "    curl -H 'Referer: http://localhost/' http://{}/tiles/0/0/0.png -o tile.png",
        addr
    );
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("████████╗██╗██╗     ███████╗     ██████╗ █████╗  ██████╗██╗  ██╗███████╗");
    info!("╚══██╔══╝██║██║     ██╔════╝    ██╔════╝██╔══██╗██╔════╝██║  ██║██╔════╝");
    info!("   ██║   ██║██║     █████╗      ██║     ███████║██║     ███████║█████╗  ");
    info!("   ██║   ██║██║     ██╔══╝      ██║     ██╔══██║██║     ██╔══██║██╔══╝  ");
    info!("   ██║   ██║███████╗███████╗    ╚██████╗██║  ██║╚██████╗██║  ██║███████╗");
    info!("   ╚═╝   ╚═╝╚══════╝╚══════╝     ╚═════╝╚═╝  ╚═╝ ╚═════╝╚═╝  ╚═╝╚══════╝");
    info!("");
    info!("                           tile cache proxy v{}", version);
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_cache_proxy=debug,tower_http=debug"
    } else {
        "tile_cache_proxy=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_trust_forwarded_for(config.trust_forwarded_for)
        .with_admin_enabled(config.admin_enabled)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Drop idle rate-limit buckets once per window.
fn spawn_rate_limit_purge<F: TileFetcher + 'static>(service: Arc<TileCacheService<F>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_WINDOW);
        loop {
            interval.tick().await;
            let purged = service.purge_rate_limits().await;
            if purged > 0 {
                debug!(purged, "Purged idle rate-limit buckets");
            }
        }
    });
}

/// Re-read the settings file on SIGHUP.
///
/// A file that fails to load or validate leaves the current settings in
/// place.
#[cfg(unix)]
fn spawn_settings_reload<F: TileFetcher + 'static>(
    path: std::path::PathBuf,
    store: Arc<SettingsStore>,
    service: Arc<TileCacheService<F>>,
) {
    use tile_cache_proxy::ProviderSettings;
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Settings reload unavailable, cannot listen for SIGHUP: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match ProviderSettings::from_file(&path) {
                Ok(settings) => {
                    info!(
                        provider = %settings.url_template,
                        cache_budget_mb = settings.max_cache_size_bytes / BYTES_PER_MB,
                        rate_limit_enabled = settings.rate_limit_enabled,
                        "Reloaded provider settings"
                    );
                    store.replace(settings);
                    service.sync_settings().await;
                }
                Err(e) => warn!("Settings reload failed, keeping current settings: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_settings_reload<F: TileFetcher + 'static>(
    _path: std::path::PathBuf,
    _store: Arc<SettingsStore>,
    _service: Arc<TileCacheService<F>>,
) {
    warn!("Settings reload on SIGHUP is not supported on this platform");
}
