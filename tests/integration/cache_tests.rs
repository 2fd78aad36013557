//! Cache behavior integration tests.
//!
//! Tests verify:
//! - Cached tiles take precedence over the upstream provider
//! - A 404 followed by a seeded cache file serves the file
//! - Eviction keeps the cache within its budget
//! - Concurrent misses for one tile share an upstream fetch

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use tile_cache_proxy::config::ProviderSettings;

use super::test_utils::{body_bytes, body_json, fake_png, tile_request, MockFetcher, TestApp};

#[tokio::test]
async fn test_cached_tile_served_without_upstream() {
    let fetcher = MockFetcher::new().with_tile("1_2_3", fake_png(99));
    let app = TestApp::new(fetcher).await;

    let cached = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
    std::fs::write(app.tile_path("1_2_3"), &cached).unwrap();

    let response = app.send(tile_request("/tiles/1/2/3.png")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-tile-cache-hit").unwrap(), "true");
    assert_eq!(body_bytes(response).await.as_ref(), cached.as_slice());
    assert_eq!(app.fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_not_found_then_seeded_file_is_served() {
    let app = TestApp::new(MockFetcher::new()).await;

    let response = app.send(tile_request("/tiles/7/7/7.png")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!app.tile_path("7_7_7").exists());

    // An external process drops the file into the cache directory
    std::fs::write(app.tile_path("7_7_7"), fake_png(7)).unwrap();

    let response = app.send(tile_request("/tiles/7/7/7.png")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, fake_png(7));
    assert_eq!(app.fetcher.call_count(), 1);
}

#[tokio::test]
async fn test_fetched_tile_written_verbatim() {
    let fetcher = MockFetcher::new().with_tile("6_1_2", fake_png(6));
    let app = TestApp::new(fetcher).await;

    app.send(tile_request("/tiles/6/1/2.png")).await;

    let on_disk = std::fs::read(app.tile_path("6_1_2")).unwrap();
    assert_eq!(on_disk, fake_png(6).to_vec());
}

#[tokio::test]
async fn test_failed_fetch_can_be_retried() {
    let fetcher = MockFetcher::new();
    let app = TestApp::new(fetcher).await;

    let response = app.send(tile_request("/tiles/8/1/1.png")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Provider gains the tile
    app.fetcher.set("8_1_1", Ok(fake_png(8)));

    let response = app.send(tile_request("/tiles/8/1/1.png")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.fetcher.call_count(), 2);
}

#[tokio::test]
async fn test_cache_stays_within_budget() {
    let tile_size = fake_png(0).len() as u64;
    let settings = ProviderSettings {
        max_cache_size_bytes: tile_size * 3,
        ..ProviderSettings::default()
    };

    let fetcher = MockFetcher::new();
    for x in 0..10 {
        fetcher.set(&format!("5_{}_0", x), Ok(fake_png(x as u8)));
    }
    let app = TestApp::with_settings(fetcher, settings).await;

    for x in 0..10 {
        let response = app.send(tile_request(&format!("/tiles/5/{}/0.png", x))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stats = body_json(
        app.send(super::test_utils::request_without_referer("/cache/stats"))
            .await,
    )
    .await;
    assert_eq!(stats["entries"], 3);
    assert!(stats["size_bytes"].as_u64().unwrap() <= tile_size * 3);

    // Least recently accessed tiles are gone from disk too
    assert!(!app.tile_path("5_0_0").exists());
    assert!(app.tile_path("5_9_0").exists());
}

#[tokio::test]
async fn test_recently_served_tile_survives_eviction() {
    let tile_size = fake_png(0).len() as u64;
    let settings = ProviderSettings {
        max_cache_size_bytes: tile_size * 2,
        ..ProviderSettings::default()
    };
    let fetcher = MockFetcher::new()
        .with_tile("3_0_0", fake_png(0))
        .with_tile("3_1_0", fake_png(1))
        .with_tile("3_2_0", fake_png(2));
    let app = TestApp::with_settings(fetcher, settings).await;

    app.send(tile_request("/tiles/3/0/0.png")).await;
    app.send(tile_request("/tiles/3/1/0.png")).await;

    // Serve the older tile from cache so the other one becomes least recent
    let hit = app.send(tile_request("/tiles/3/0/0.png")).await;
    assert_eq!(hit.headers().get("x-tile-cache-hit").unwrap(), "true");

    app.send(tile_request("/tiles/3/2/0.png")).await;

    assert!(app.tile_path("3_0_0").exists());
    assert!(!app.tile_path("3_1_0").exists());
    assert!(app.tile_path("3_2_0").exists());
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let fetcher = MockFetcher::new()
        .with_tile("12_100_200", fake_png(12))
        .with_delay(Duration::from_millis(100));
    let app = Arc::new(TestApp::new(fetcher).await);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = Arc::clone(&app);
        handles.push(tokio::spawn(async move {
            let response = app.send(tile_request("/tiles/12/100/200.png")).await;
            assert_eq!(response.status(), StatusCode::OK);
            body_bytes(response).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), fake_png(12));
    }

    assert_eq!(app.fetcher.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_for_different_tiles() {
    let fetcher = MockFetcher::new().with_delay(Duration::from_millis(20));
    for x in 0..5 {
        fetcher.set(&format!("9_{}_0", x), Ok(fake_png(x as u8)));
    }
    let app = Arc::new(TestApp::new(fetcher).await);

    let mut handles = Vec::new();
    for x in 0..5u8 {
        let app = Arc::clone(&app);
        handles.push(tokio::spawn(async move {
            let response = app
                .send(tile_request(&format!("/tiles/9/{}/0.png", x)))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_bytes(response).await, fake_png(x));
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(app.fetcher.call_count(), 5);
}

#[tokio::test]
async fn test_cache_reopened_from_disk() {
    let fetcher = MockFetcher::new().with_tile("4_4_4", fake_png(4));
    let app = TestApp::new(fetcher).await;
    app.send(tile_request("/tiles/4/4/4.png")).await;

    let (size, _, count) = app.service.cache_stats().await;
    assert_eq!(count, 1);

    let reopened = tile_cache_proxy::DiskTileCache::open(app.dir.path(), 1024 * 1024)
        .await
        .unwrap();
    assert_eq!(reopened.len().await, 1);
    assert_eq!(reopened.size().await, size);
}
