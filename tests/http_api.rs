//! HTTP surface tests: the full router over an in-memory store, driven with
//! `tower::ServiceExt::oneshot`.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use comics_gateway::api;
use comics_gateway::app_state::AppState;
use comics_gateway::context::QueryContext;
use comics_gateway::db::{OtelTracingProvider, PoolConfig, TracingProvider};
use comics_gateway::domain::ComicId;
use comics_gateway::health::{HealthChecker, HealthConfig, Pinger};
use comics_gateway::persistence::{ComicStore, MemoryBackend, ResilientComicStore};

struct TestApp {
    router: Router,
    backend: MemoryBackend,
    health: Arc<HealthChecker>,
}

async fn test_app() -> TestApp {
    let backend = MemoryBackend::new();
    let tracer: Arc<dyn TracingProvider> = Arc::new(OtelTracingProvider::global("http-tests"));
    let config = PoolConfig {
        max_size: 4,
        acquire_timeout: Duration::from_secs(1),
        backoff_timeout: Duration::from_secs(1),
        ..PoolConfig::default()
    };
    let Ok(store) =
        ResilientComicStore::connect(backend.clone(), config, tracer, &QueryContext::background())
            .await
    else {
        panic!("store should start");
    };
    let store = Arc::new(store);
    let health = Arc::new(HealthChecker::new(
        Arc::clone(&store) as Arc<dyn Pinger>,
        HealthConfig::default(),
    ));
    let router = api::app(AppState {
        store: store as Arc<dyn ComicStore>,
        health: Arc::clone(&health),
        request_timeout: Duration::from_secs(5),
    });
    TestApp {
        router,
        backend,
        health,
    }
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    };
    let Ok(request) = request else {
        panic!("request should build");
    };
    let Ok(response) = router.clone().oneshot(request).await else {
        panic!("router should answer");
    };
    let status = response.status();
    let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
        panic!("body should be readable");
    };
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn crud_round_trip() {
    let app = test_app().await;
    let body = json!({
        "titles": ["Omniscient Reader", "ORV"],
        "author": "Sing Shong",
        "type": "manhwa",
        "status": "completed",
        "genres": ["fantasy"],
        "current_chap": 551,
        "track": true
    });

    let (status, created) = call(&app.router, Method::POST, "/api/v1/comics", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created, json!({ "id": 1 }));

    let (status, comic) = call(&app.router, Method::GET, "/api/v1/comics/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(comic.get("type"), Some(&json!("manhwa")));
    assert_eq!(comic.get("has_unread"), Some(&json!(true)));

    let update = json!({ "titles": ["Omniscient Reader"], "viewed_chap": 551, "track": true, "current_chap": 551 });
    let (status, _) = call(&app.router, Method::PUT, "/api/v1/comics/1", Some(update)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, comic) = call(&app.router, Method::GET, "/api/v1/comics/by-title/reader", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(comic.get("has_unread"), Some(&json!(false)));

    let (status, _) = call(&app.router, Method::DELETE, "/api/v1/comics/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, err) = call(&app.router, Method::GET, "/api/v1/comics/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err.pointer("/error/code"), Some(&json!(2001)));
    assert!(app.backend.row(ComicId::new(1)).is_some_and(|c| c.deleted));
}

#[tokio::test]
async fn list_and_search_are_paginated() {
    let app = test_app().await;
    for i in 0..12 {
        let body = json!({ "titles": [format!("Hunter {i}")], "author": "Togashi" });
        let (status, _) = call(&app.router, Method::POST, "/api/v1/comics", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = call(&app.router, Method::GET, "/api/v1/comics?page=2&per_page=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page.pointer("/pagination/total"), Some(&json!(12)));
    assert_eq!(page.pointer("/pagination/total_pages"), Some(&json!(3)));
    assert_eq!(page.get("data").and_then(Value::as_array).map(Vec::len), Some(5));

    let (status, found) = call(&app.router, Method::GET, "/api/v1/comics/search?q=hunter%201", None).await;
    assert_eq!(status, StatusCode::OK);
    // "Hunter 1", "Hunter 10", "Hunter 11"
    assert_eq!(found.pointer("/pagination/total"), Some(&json!(3)));
}

#[tokio::test]
async fn invalid_input_maps_to_bad_request() {
    let app = test_app().await;

    let (status, err) = call(&app.router, Method::GET, "/api/v1/comics/search?q=%20", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err.pointer("/error/code"), Some(&json!(1002)));

    let (status, _) = call(
        &app.router,
        Method::POST,
        "/api/v1/comics",
        Some(json!({ "titles": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, err) = call(&app.router, Method::DELETE, "/api/v1/comics/0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err.pointer("/error/code"), Some(&json!(1001)));

    let (status, _) = call(&app.router, Method::PUT, "/api/v1/comics/77", Some(json!({ "titles": ["x"] }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn probes_follow_health_state() {
    let app = test_app().await;

    let (status, live) = call(&app.router, Method::GET, "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(live.get("status"), Some(&json!("UP")));

    let (status, ready) = call(&app.router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ready.get("status"), Some(&json!("DOWN")));

    assert!(app.health.check_now().await);
    let (status, ready) = call(&app.router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready.get("status"), Some(&json!("UP")));

    app.health.stop().await;
    let (status, _) = call(&app.router, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_report_per_operation_counts() {
    let app = test_app().await;
    let _ = call(&app.router, Method::GET, "/api/v1/comics/5", None).await;
    let _ = call(&app.router, Method::GET, "/api/v1/comics", None).await;

    let (status, metrics) = call(&app.router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics.get("total_queries"), Some(&json!(2)));
    assert_eq!(metrics.get("failed_queries"), Some(&json!(1)));
    assert_eq!(metrics.pointer("/operations/GetByID/failures"), Some(&json!(1)));
    assert_eq!(metrics.pointer("/operations/List/count"), Some(&json!(1)));
    assert_eq!(metrics.get("active_connections"), Some(&json!(0)));
}
