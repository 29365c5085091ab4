//! ReqwestTransport against a local axum server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use pollsense_core::{
    FetchConfig, FetchCycle, FetchTarget, HttpMethod, HttpTransport, Locator, RequestBody,
    ResponseMode, ReqwestTransport, SensorRule, TransportError,
};
use serde_json::{json, Value};
use std::sync::Arc;

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/weather",
            get(|| async { Json(json!({"data": {"temp": 21.5, "station": "north"}})) }),
        )
        .route(
            "/echo",
            post(
                |headers: HeaderMap, Query(params): Query<HashMap<String, String>>, body: String| async move {
                    let token = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    Json(json!({"token": token, "params": params, "body": body}))
                },
            ),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "no such thing") }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_fetch_json() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::new().unwrap();
    let config = FetchConfig::new("weather", format!("http://{}/weather", addr));

    let response = transport.fetch(&config).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("application/json"));

    let body: Value = serde_json::from_str(&response.text).unwrap();
    assert_eq!(body["data"]["temp"], json!(21.5));
}

#[tokio::test]
async fn test_headers_params_and_body_are_sent() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::new().unwrap();
    let config = FetchConfig::new("echo", format!("http://{}/echo", addr))
        .with_method(HttpMethod::Post)
        .with_header("Authorization", "Bearer abc")
        .with_param("units", "metric")
        .with_body(RequestBody::Raw("hello".to_string()));

    let response = transport.fetch(&config).await.unwrap();
    let body: Value = serde_json::from_str(&response.text).unwrap();
    assert_eq!(body["token"], json!("Bearer abc"));
    assert_eq!(body["params"]["units"], json!("metric"));
    assert_eq!(body["body"], json!("hello"));
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::new().unwrap();
    let config = FetchConfig::new("missing", format!("http://{}/missing", addr));

    let response = transport.fetch(&config).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.text, "no such thing");
}

#[tokio::test]
async fn test_timeout() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::new().unwrap();
    let config = FetchConfig::new("slow", format!("http://{}/slow", addr))
        .with_timeout(Duration::from_secs(1));

    let err = transport.fetch(&config).await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout(_)));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = ReqwestTransport::new().unwrap();
    let config = FetchConfig::new("gone", format!("http://{}/", addr));
    let err = transport.fetch(&config).await.unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)));
}

#[tokio::test]
async fn test_cycle_over_real_http() {
    let addr = spawn_server().await;
    let transport = Arc::new(ReqwestTransport::new().unwrap());
    let target = FetchTarget::new(
        FetchConfig::new("weather", format!("http://{}/weather", addr))
            .with_mode(ResponseMode::Structured),
    )
    .with_sensor(SensorRule::new("temperature", Locator::structured("data.temp")).with_unit("°C"));

    let mut cycle = FetchCycle::new(target, transport);
    let outcome = cycle.tick().await;

    assert_eq!(outcome.sensors["temperature"].value, json!(21.5));
    assert_eq!(outcome.health.is_up(), Some(true));
    assert_eq!(
        outcome.health.attributes(cycle.config())["http_status"],
        json!(200)
    );
}
