//! HTTP API tests.
//!
//! These drive the full router with an in-memory source and verify status
//! codes, headers and image contents.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};

use pixelpipe::RouterConfig;

use super::test_utils::*;

fn photo_source() -> MockImageSource {
    MockImageSource::new()
        .with_image("photos/cat.png", create_test_png(200, 100))
        .with_image("photos/dog.jpg", create_test_jpeg(120, 80, 90))
        .with_image("broken.png", b"definitely not an image".to_vec())
}

// =============================================================================
// Transforms
// =============================================================================

#[tokio::test]
async fn test_resize_by_width_keeps_aspect_ratio() {
    let router = test_router(&photo_source(), test_manager_config(2, 8));

    let response = get(&router, "/images/photos/cat.png?ops=resize:100x").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(dimensions(&response.body), (100, 50));
}

#[tokio::test]
async fn test_operation_chain() {
    let router = test_router(&photo_source(), test_manager_config(2, 8));

    let response = get(
        &router,
        "/images/photos/cat.png?ops=crop:0,0,100,100;rotate:90;grayscale",
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    let img = image::load_from_memory(&response.body).unwrap();
    assert_eq!((img.width(), img.height()), (100, 100));
}

#[tokio::test]
async fn test_format_conversion() {
    let router = test_router(&photo_source(), test_manager_config(2, 8));

    let response = get(&router, "/images/photos/cat.png?format=jpg&quality=70").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/jpeg"));
    assert!(is_valid_jpeg(&response.body));
    assert_eq!(dimensions(&response.body), (200, 100));
}

#[tokio::test]
async fn test_target_format_alias() {
    let router = test_router(&photo_source(), test_manager_config(2, 8));

    let response = get(&router, "/images/photos/dog.jpg?target-format=webp").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/webp"));
    assert_eq!(&response.body[0..4], b"RIFF");
    assert_eq!(&response.body[8..12], b"WEBP");
}

#[tokio::test]
async fn test_legacy_resize_parameters() {
    let router = test_router(&photo_source(), test_manager_config(2, 8));

    let response = get(&router, "/images/photos/cat.png?op=resize&max=50").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(dimensions(&response.body), (50, 25));

    let response = get(&router, "/images/photos/dog.jpg?op=resize&height=40").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(is_valid_jpeg(&response.body));
    assert_eq!(dimensions(&response.body), (60, 40));
}

// =============================================================================
// Passthrough and Caching Headers
// =============================================================================

#[tokio::test]
async fn test_no_parameters_serves_original_bytes() {
    let original = create_test_png(200, 100);
    let source = MockImageSource::new().with_image("photos/cat.png", original.clone());
    let router = test_router(&source, test_manager_config(1, 1));

    let response = get(&router, "/images/photos/cat.png").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-image-source"), Some("original"));
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(response.body.as_ref(), original.as_slice());
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let source = photo_source();
    let router = test_router(&source, test_manager_config(2, 8));
    let uri = "/images/photos/cat.png?ops=resize:50x";

    let first = get(&router, uri).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("x-image-source"), Some("transform"));
    assert!(first.header("x-transform-time-ms").is_some());
    assert!(first.header("x-encode-time-ms").is_some());

    let second = get(&router, uri).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-image-source"), Some("cache"));
    assert!(second.header("x-transform-time-ms").is_none());

    assert_eq!(first.body, second.body);
    assert_eq!(first.header("etag"), second.header("etag"));
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_cache_control_and_etag() {
    let router = test_router_with(
        &photo_source(),
        test_manager_config(1, 4),
        RouterConfig::new().with_cache_max_age(600),
    );

    let response = get(&router, "/images/photos/cat.png?ops=grayscale").await;

    assert_eq!(response.header("cache-control"), Some("public, max-age=600"));
    let etag = response.header("etag").unwrap();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    assert_eq!(etag.len(), 66);
}

#[tokio::test]
async fn test_if_none_match_returns_not_modified() {
    let source = photo_source();
    let router = test_router(&source, test_manager_config(1, 4));
    let uri = "/images/photos/cat.png?ops=flip:h";

    let first = get(&router, uri).await;
    let etag = first.header("etag").unwrap().to_string();

    let request = Request::builder()
        .uri(uri)
        .header(header::IF_NONE_MATCH, &etag)
        .body(Body::empty())
        .unwrap();
    let response = send(&router, request).await;

    assert_eq!(response.status, StatusCode::NOT_MODIFIED);
    assert!(response.body.is_empty());
    assert_eq!(response.header("etag"), Some(etag.as_str()));
    assert_eq!(source.fetch_count(), 1);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_image_returns_404() {
    let router = test_router(&photo_source(), test_manager_config(1, 4));

    let response = get(&router, "/images/nope.png?ops=grayscale").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let error = response.json();
    assert_eq!(error["error"], "not_found");
    assert_eq!(error["status"], 404);
}

#[tokio::test]
async fn test_missing_original_returns_404() {
    let router = test_router(&photo_source(), test_manager_config(1, 4));

    let response = get(&router, "/images/nope.png").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "not_found");
}

#[tokio::test]
async fn test_invalid_requests_return_400() {
    let source = photo_source();
    let router = test_router(&source, test_manager_config(1, 4));

    for uri in [
        "/images/photos/cat.png?ops=sharpen:2",
        "/images/photos/cat.png?ops=resize:abc",
        "/images/photos/cat.png?ops=rotate:45",
        "/images/photos/cat.png?format=tiff",
        "/images/photos/cat.png?quality=0",
        "/images/photos/cat.png?width=abc&op=resize",
        "/images/photos/cat.png?width=100",
        "/images/photos/../secret.png?ops=grayscale",
        "/images/photos//cat.png?ops=grayscale",
        "/images/photos/../secret.png",
    ] {
        let response = get(&router, uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(response.json()["error"], "invalid_request", "{uri}");
    }

    // Rejected before reaching the source
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn test_undecodable_source_returns_500() {
    let router = test_router(&photo_source(), test_manager_config(1, 4));

    let response = get(&router, "/images/broken.png?ops=grayscale").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["error"], "transform_failed");
}

#[tokio::test]
async fn test_crop_outside_image_returns_500() {
    let router = test_router(&photo_source(), test_manager_config(1, 4));

    let response = get(&router, "/images/photos/cat.png?ops=crop:150,50,100,100").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["error"], "transform_failed");
}

// =============================================================================
// Service Endpoints
// =============================================================================

#[tokio::test]
async fn test_health() {
    let router = test_router(&photo_source(), test_manager_config(1, 4));

    let response = get(&router, "/health").await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_stats_reflect_activity() {
    let router = test_router(&photo_source(), test_manager_config(3, 4));

    get(&router, "/images/photos/cat.png?ops=grayscale").await;
    get(&router, "/images/photos/cat.png?ops=grayscale").await;

    let response = get(&router, "/stats").await;
    assert_eq!(response.status, StatusCode::OK);

    let stats = response.json();
    assert_eq!(stats["workers"], 3);
    assert_eq!(stats["queue_capacity"], 4);
    assert_eq!(stats["cache_entries"], 1);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["cache_hits"], 1);
    assert_eq!(stats["pending"], 0);
    assert!(stats["cache_bytes"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let router = test_router(&photo_source(), test_manager_config(1, 4));

    let response = get(&router, "/nonexistent").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Cache Deletion
// =============================================================================

fn admin_router(source: &MockImageSource) -> axum::Router {
    test_router_with(
        source,
        test_manager_config(1, 4),
        RouterConfig::new().with_admin_token("s3cret"),
    )
}

#[tokio::test]
async fn test_delete_cache_without_token_is_forbidden() {
    let router = admin_router(&photo_source());

    let response = delete(&router, "/cache").await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.json()["error"], "missing_token");
}

#[tokio::test]
async fn test_delete_cache_with_wrong_token_is_forbidden() {
    let router = admin_router(&photo_source());

    let response = delete(&router, "/cache?token=guess").await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.json()["error"], "invalid_token");
}

#[tokio::test]
async fn test_delete_cache_without_configured_token_is_forbidden() {
    let router = test_router(&photo_source(), test_manager_config(1, 4));

    let response = delete(&router, "/cache?token=anything").await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.json()["error"], "invalid_token");
}

#[tokio::test]
async fn test_delete_cache_clears_entries() {
    let source = photo_source();
    let router = admin_router(&source);
    let uri = "/images/photos/cat.png?ops=resize:20x";

    get(&router, uri).await;
    get(&router, "/images/photos/dog.jpg?ops=grayscale").await;

    let response = delete(&router, "/cache?token=s3cret").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["removed"], 2);

    let again = get(&router, uri).await;
    assert_eq!(again.header("x-image-source"), Some("transform"));
    assert_eq!(source.fetch_count(), 3);
}
