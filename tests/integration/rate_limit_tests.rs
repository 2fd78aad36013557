//! Rate limiting integration tests.
//!
//! Tests verify:
//! - The (N+1)-th request in a window is rejected with 429 and Retry-After
//! - Client keys come from X-Forwarded-For before the peer address
//! - Disabled rate limiting never rejects
//! - Settings reloads change the limit on the next request

use axum::http::StatusCode;

use tile_cache_proxy::config::ProviderSettings;
use tile_cache_proxy::RouterConfig;

use super::test_utils::{
    body_json, fake_png, request_without_referer, tile_request, tile_request_from, MockFetcher,
    TestApp,
};

fn limited(per_minute: u32) -> ProviderSettings {
    ProviderSettings {
        rate_limit_enabled: true,
        rate_limit_per_minute: per_minute,
        ..ProviderSettings::default()
    }
}

fn fetcher() -> MockFetcher {
    MockFetcher::new().with_tile("0_0_0", fake_png(0))
}

#[tokio::test]
async fn test_request_over_limit_is_rejected() {
    let app = TestApp::with_settings(fetcher(), limited(3)).await;

    for _ in 0..3 {
        let response = app.send(tile_request("/tiles/0/0/0.png")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.send(tile_request("/tiles/0/0/0.png")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let error = body_json(response).await;
    assert_eq!(error["error"], "rate_limited");
    assert_eq!(error["status"], 429);
}

#[tokio::test]
async fn test_rate_limit_applies_to_cached_tiles() {
    let app = TestApp::with_settings(MockFetcher::new(), limited(1)).await;
    std::fs::write(app.tile_path("0_0_0"), fake_png(0)).unwrap();

    assert_eq!(
        app.send(tile_request("/tiles/0/0/0.png")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        app.send(tile_request("/tiles/0/0/0.png")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_unauthorized_and_invalid_requests_not_counted() {
    let app = TestApp::with_settings(fetcher(), limited(1)).await;

    for _ in 0..5 {
        let response = app.send(request_without_referer("/tiles/0/0/0.png")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.send(tile_request("/tiles/99/0/0.png")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = app.send(tile_request("/tiles/0/0/0.png")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_distinct_remote_addresses_are_independent() {
    let app = TestApp::with_settings(fetcher(), limited(1)).await;

    let a = app
        .send(tile_request_from("/tiles/0/0/0.png", None, "10.0.0.1:1000"))
        .await;
    let b = app
        .send(tile_request_from("/tiles/0/0/0.png", None, "10.0.0.2:1000"))
        .await;
    let a_again = app
        .send(tile_request_from("/tiles/0/0/0.png", None, "10.0.0.1:2000"))
        .await;

    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    // Same IP on a different port is the same client
    assert_eq!(a_again.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_same_forwarded_address_shares_budget_across_remotes() {
    let app = TestApp::with_settings(fetcher(), limited(1)).await;

    let first = app
        .send(tile_request_from(
            "/tiles/0/0/0.png",
            Some("203.0.113.7"),
            "10.0.0.1:1000",
        ))
        .await;
    let second = app
        .send(tile_request_from(
            "/tiles/0/0/0.png",
            Some("203.0.113.7"),
            "10.0.0.2:1000",
        ))
        .await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_different_forwarded_addresses_through_one_proxy() {
    let app = TestApp::with_settings(fetcher(), limited(1)).await;

    let first = app
        .send(tile_request_from(
            "/tiles/0/0/0.png",
            Some("203.0.113.7, 10.0.0.254"),
            "10.0.0.254:1000",
        ))
        .await;
    let second = app
        .send(tile_request_from(
            "/tiles/0/0/0.png",
            Some("203.0.113.8, 10.0.0.254"),
            "10.0.0.254:1000",
        ))
        .await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_untrusted_forwarded_header_ignored() {
    let app = TestApp::with_config(
        fetcher(),
        limited(1),
        RouterConfig::new().with_trust_forwarded_for(false),
    )
    .await;

    let first = app
        .send(tile_request_from(
            "/tiles/0/0/0.png",
            Some("203.0.113.7"),
            "10.0.0.1:1000",
        ))
        .await;
    let second = app
        .send(tile_request_from(
            "/tiles/0/0/0.png",
            Some("203.0.113.8"),
            "10.0.0.1:1000",
        ))
        .await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_disabled_rate_limit_never_rejects() {
    let settings = ProviderSettings {
        rate_limit_enabled: false,
        rate_limit_per_minute: 1,
        ..ProviderSettings::default()
    };
    let app = TestApp::with_settings(fetcher(), settings).await;

    for _ in 0..50 {
        let response = app.send(tile_request("/tiles/0/0/0.png")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_reload_enables_rate_limit() {
    let app = TestApp::new(fetcher()).await;

    for _ in 0..5 {
        assert_eq!(
            app.send(tile_request("/tiles/0/0/0.png")).await.status(),
            StatusCode::OK
        );
    }

    app.settings.replace(limited(2));

    assert_eq!(
        app.send(tile_request("/tiles/0/0/0.png")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        app.send(tile_request("/tiles/0/0/0.png")).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        app.send(tile_request("/tiles/0/0/0.png")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
