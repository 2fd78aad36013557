//! Test utilities for integration tests.
//!
//! This module provides a mock tile fetcher, a router harness over a
//! temporary cache directory, and a stub upstream HTTP server.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use tile_cache_proxy::config::{ProviderSettings, SettingsStore};
use tile_cache_proxy::error::UpstreamError;
use tile_cache_proxy::tile::{DiskTileCache, TileCacheService, TileCoordinate};
use tile_cache_proxy::upstream::TileFetcher;
use tile_cache_proxy::{create_router, RouterConfig};

/// Smallest valid PNG signature plus a marker byte, enough to tell tiles apart.
pub fn fake_png(marker: u8) -> Bytes {
    Bytes::from(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, marker])
}

// =============================================================================
// Mock Tile Fetcher
// =============================================================================

/// A fetcher serving canned tiles and counting upstream calls.
#[derive(Clone, Default)]
pub struct MockFetcher {
    tiles: Arc<Mutex<HashMap<String, Result<Bytes, UpstreamError>>>>,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile(self, key: &str, data: Bytes) -> Self {
        self.set(key, Ok(data));
        self
    }

    pub fn with_error(self, key: &str, err: UpstreamError) -> Self {
        self.set(key, Err(err));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set(&self, key: &str, result: Result<Bytes, UpstreamError>) {
        self.tiles
            .lock()
            .unwrap()
            .insert(key.to_string(), result);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileFetcher for MockFetcher {
    async fn fetch(
        &self,
        _settings: &ProviderSettings,
        coord: &TileCoordinate,
    ) -> Result<Bytes, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.tiles
            .lock()
            .unwrap()
            .get(&coord.cache_key())
            .cloned()
            .unwrap_or(Err(UpstreamError::NotFound))
    }
}

// =============================================================================
// Router Harness
// =============================================================================

/// A router over a temporary cache directory and a [`MockFetcher`].
pub struct TestApp {
    pub dir: TempDir,
    pub fetcher: MockFetcher,
    pub settings: Arc<SettingsStore>,
    pub service: Arc<TileCacheService<MockFetcher>>,
    pub router: Router,
}

impl TestApp {
    pub async fn new(fetcher: MockFetcher) -> Self {
        Self::with_config(fetcher, ProviderSettings::default(), RouterConfig::new()).await
    }

    pub async fn with_settings(fetcher: MockFetcher, settings: ProviderSettings) -> Self {
        Self::with_config(fetcher, settings, RouterConfig::new()).await
    }

    pub async fn with_config(
        fetcher: MockFetcher,
        settings: ProviderSettings,
        config: RouterConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskTileCache::open(dir.path(), settings.max_cache_size_bytes)
            .await
            .unwrap();
        let settings = Arc::new(SettingsStore::new(settings));
        let service = Arc::new(TileCacheService::new(
            cache,
            fetcher.clone(),
            Arc::clone(&settings),
        ));
        let router = create_router(Arc::clone(&service), config.with_tracing(false));

        Self {
            dir,
            fetcher,
            settings,
            service,
            router,
        }
    }

    /// Send a request through a clone of the router.
    pub async fn send(&self, request: Request<Body>) -> Response {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Path of a tile file in the cache directory.
    pub fn tile_path(&self, key: &str) -> std::path::PathBuf {
        self.dir.path().join(format!("{}.png", key))
    }
}

// =============================================================================
// Request Helpers
// =============================================================================

pub const TEST_REFERER: &str = "https://maps.example.com/";

/// A GET with a Referer and a peer address.
pub fn tile_request(uri: &str) -> Request<Body> {
    tile_request_from(uri, None, "192.0.2.10:40000")
}

/// A GET with a Referer, an optional X-Forwarded-For and a peer address.
pub fn tile_request_from(uri: &str, forwarded_for: Option<&str>, remote: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .header("referer", TEST_REFERER)
        .extension(ConnectInfo::<SocketAddr>(remote.parse().unwrap()));
    if let Some(forwarded) = forwarded_for {
        builder = builder.header("x-forwarded-for", forwarded);
    }
    builder.body(Body::empty()).unwrap()
}

/// A GET without any Referer header.
pub fn request_without_referer(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let body = body_bytes(response).await;
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Stub Upstream Server
// =============================================================================

/// A real HTTP tile provider on an ephemeral local port.
///
/// - `/{z}/{x}/{y}.png` returns `fake_png(z)` and records the request
/// - zoom 9 returns 404
/// - zoom 10 returns 503
/// - zoom 11 sleeps for two seconds before answering
pub struct StubUpstream {
    pub base_url: String,
    pub hits: Arc<AtomicUsize>,
    pub last_query: Arc<Mutex<Option<String>>>,
    pub last_user_agent: Arc<Mutex<Option<String>>>,
}

#[derive(Clone)]
struct StubState {
    hits: Arc<AtomicUsize>,
    last_query: Arc<Mutex<Option<String>>>,
    last_user_agent: Arc<Mutex<Option<String>>>,
}

impl StubUpstream {
    pub async fn start() -> Self {
        let state = StubState {
            hits: Arc::new(AtomicUsize::new(0)),
            last_query: Arc::new(Mutex::new(None)),
            last_user_agent: Arc::new(Mutex::new(None)),
        };

        let app = Router::new()
            .route("/{z}/{x}/{filename}", get(stub_tile))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            hits: state.hits,
            last_query: state.last_query,
            last_user_agent: state.last_user_agent,
        }
    }

    /// URL template pointing at this stub.
    pub fn template(&self) -> String {
        format!("{}/{{z}}/{{x}}/{{y}}.png?key={{key}}", self.base_url)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn stub_tile(
    State(state): State<StubState>,
    Path((z, _x, _filename)): Path<(u8, String, String)>,
    request: Request<Body>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock().unwrap() = request.uri().query().map(str::to_string);
    *state.last_user_agent.lock().unwrap() = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match z {
        9 => StatusCode::NOT_FOUND.into_response(),
        10 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        11 => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            fake_png(z).into_response()
        }
        _ => ([("content-type", "image/png")], fake_png(z)).into_response(),
    }
}
