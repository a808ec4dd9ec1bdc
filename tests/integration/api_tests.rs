//! HTTP API integration tests.
//!
//! Tests verify:
//! - Image responses and their headers (Content-Type, ETag, Cache-Control)
//! - Conditional requests answered without running the chain
//! - Error mapping to status codes and JSON bodies
//! - Health, favicon, stats and peer protocol endpoints

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use clap::Parser;
use http_body_util::BodyExt;
use tower::ServiceExt;

use imgserve::cache::{Cache, ParamsHashKeyGenerator, PeerCache};
use imgserve::chain::compose::build_chain_with_source;
use imgserve::config::Config;
use imgserve::error::ServerError;
use imgserve::model::Image;
use imgserve::server::{
    create_router, create_router_with_state, parse_params, AppState, RouterConfig,
};

use super::test_utils::{dimensions, png_image, CountingServer, MockSource};

fn router_for(server: Arc<CountingServer>) -> Router {
    let state = AppState::new(server).with_cache_max_age(3600);
    create_router_with_state(state, RouterConfig::new().with_tracing(false))
}

async fn get(router: Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.oneshot(request).await.unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Image Responses
// =============================================================================

#[tokio::test]
async fn test_image_response_headers() {
    let image = png_image(4, 4);
    let server = CountingServer::new(image.clone());
    let response = get(router_for(server.clone()), "/photos/a.png?width=4").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=3600"
    );

    let seen = server.seen().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get_str("source").unwrap(), Some("photos/a.png"));
    assert_eq!(seen[0].get_int("width").unwrap(), Some(4));

    let etag = format!("\"{}\"", ParamsHashKeyGenerator::hash(&seen[0]));
    assert_eq!(response.headers()[header::ETAG], etag.as_str());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, image.data);
}

#[tokio::test]
async fn test_if_none_match_skips_the_chain() {
    let server = CountingServer::new(png_image(4, 4));
    let response = get(router_for(server.clone()), "/a.png?width=4").await;
    let etag = response.headers()[header::ETAG].clone();

    let request = Request::builder()
        .uri("/a.png?width=4")
        .header(header::IF_NONE_MATCH, etag.clone())
        .body(Body::empty())
        .unwrap();
    let response = router_for(server.clone()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()[header::ETAG], etag);
    assert_eq!(server.calls(), 1);
}

#[tokio::test]
async fn test_etag_ignores_query_order() {
    let server = CountingServer::new(png_image(4, 4));
    let a = get(router_for(server.clone()), "/a.png?width=4&height=2").await;
    let b = get(router_for(server.clone()), "/a.png?height=2&width=4").await;
    assert_eq!(a.headers()[header::ETAG], b.headers()[header::ETAG]);

    let c = get(router_for(server), "/a.png?width=5&height=2").await;
    assert_ne!(a.headers()[header::ETAG], c.headers()[header::ETAG]);
}

#[tokio::test]
async fn test_real_chain_over_http() {
    let source = Arc::new(MockSource::new().with_image("photo.png", png_image(64, 32)));
    let config = Config::parse_from(["imgserve", "--source-path", "/unused"]);
    let components = build_chain_with_source(&config, source.clone()).unwrap();
    let router = create_router(components, RouterConfig::new().with_tracing(false));

    let response = get(router.clone(), "/photo.png?width=16&format=jpeg&quality=60").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(dimensions(&Image::new("jpeg", body)), (16, 8));

    let response = get(router, "/photo.png?width=16&format=jpeg&quality=60").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(source.fetch_count(), 1);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_malformed_param_is_bad_request() {
    let server = CountingServer::new(png_image(4, 4));
    let response = get(router_for(server.clone()), "/a.png?width=wide").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_param");
    assert_eq!(json["status"], 400);
    assert!(json["message"].as_str().unwrap().contains("width"));
    assert_eq!(server.calls(), 0);
}

#[tokio::test]
async fn test_bad_crop_is_bad_request() {
    let server = CountingServer::new(png_image(4, 4));
    let response = get(router_for(server), "/a.png?crop=1,2,3,4").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chain_errors_map_to_status() {
    let cases = [
        (
            ServerError::SourceNotFound("a.png".to_string()),
            StatusCode::NOT_FOUND,
            "not_found",
        ),
        (
            ServerError::Source("upstream 500".to_string()),
            StatusCode::BAD_GATEWAY,
            "source_error",
        ),
        (
            ServerError::Processing("decode failed".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "processing_error",
        ),
    ];

    for (err, status, error_type) in cases {
        let response = get(router_for(CountingServer::failing(err)), "/a.png").await;
        assert_eq!(response.status(), status);
        let json = body_json(response).await;
        assert_eq!(json["error"], error_type);
        assert_eq!(json["status"], status.as_u16());
    }
}

#[tokio::test]
async fn test_unknown_source_through_real_chain() {
    let source = Arc::new(MockSource::new());
    let config = Config::parse_from(["imgserve", "--source-path", "/unused"]);
    let components = build_chain_with_source(&config, source).unwrap();
    let router = create_router(components, RouterConfig::new().with_tracing(false));

    let response = get(router, "/missing.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Other Endpoints
// =============================================================================

#[tokio::test]
async fn test_health() {
    let response = get(router_for(CountingServer::new(png_image(1, 1))), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_favicon_is_not_found() {
    let server = CountingServer::new(png_image(1, 1));
    let response = get(router_for(server.clone()), "/favicon.ico").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.calls(), 0);
}

#[tokio::test]
async fn test_stats_without_peer_tier() {
    let state = AppState::new(CountingServer::new(png_image(1, 1)));
    let router = create_router_with_state(
        state,
        RouterConfig::new().with_tracing(false).with_stats_path("/_stats"),
    );

    let response = get(router, "/_stats").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], 503);
}

#[tokio::test]
async fn test_stats_with_peer_tier() {
    let peer = Arc::new(PeerCache::new(
        "thumbs",
        "127.0.0.1:1",
        Vec::<String>::new(),
        1 << 20,
    ));
    let state =
        AppState::new(CountingServer::new(png_image(1, 1))).with_peer_cache(Some(peer));
    let router = create_router_with_state(
        state,
        RouterConfig::new().with_tracing(false).with_stats_path("/_stats"),
    );

    let response = get(router, "/_stats").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "thumbs");
    assert_eq!(json["group"]["gets"], 0);
    assert!(json["caches"]["main"].is_object());
}

#[tokio::test]
async fn test_peer_protocol_routes() {
    let peer = Arc::new(PeerCache::new(
        "thumbs",
        "127.0.0.1:1",
        Vec::<String>::new(),
        1 << 20,
    ));
    let state = AppState::new(CountingServer::new(png_image(1, 1)))
        .with_peer_cache(Some(peer.clone()));
    let router = create_router_with_state(state, RouterConfig::new().with_tracing(false));

    // A single node owns every key.
    let image = png_image(2, 2);
    peer.set("abc123", &image).await.unwrap();

    let response = get(router.clone(), "/_peercache/thumbs/abc123").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(Image::from_bytes(&body).unwrap(), image);

    let response = get(router.clone(), "/_peercache/thumbs/missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(router, "/_peercache/other/abc123").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clients_cannot_write_peer_entries() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_peer = listener.local_addr().unwrap().to_string();
    drop(listener);

    let original = png_image(6, 6);
    let source = Arc::new(MockSource::new().with_image("a.png", original.clone()));
    let config = Config::parse_from([
        "imgserve",
        "--source-path",
        "/unused",
        "--memory-cache-size",
        "0",
        "--peer-cache-peers",
        dead_peer.as_str(),
        "--peer-cache-size",
        "1048576",
    ]);
    let components = build_chain_with_source(&config, source).unwrap();
    let peer = components.peer_cache.clone().unwrap();
    let router = create_router(components, RouterConfig::new().with_tracing(false));

    let key = ParamsHashKeyGenerator::hash(&parse_params("a.png", None).unwrap());
    let planted = Image::new("png", b"planted".to_vec());
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/_peercache/{}/{}", peer.name(), key))
        .body(Body::from(planted.to_bytes()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(peer.serve_get(&key).await, None);

    let response = get(router, "/a.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, original.data);
}
