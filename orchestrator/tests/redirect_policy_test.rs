use artifact_proxy::{NetworkProxy, ProxyConfig, ProxyRequest};
use axum::{
    extract::Query,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use proxy_common::ErrorKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

// `/jump?to=<url>` answers 302 to the given location; `/secret` counts its hits
async fn spawn_origin() -> (u16, Arc<AtomicUsize>) {
    let secret_hits = Arc::new(AtomicUsize::new(0));

    let counter = secret_hits.clone();
    let app = Router::new()
        .route(
            "/jump",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let location = params.get("to").cloned().unwrap_or_else(|| "/".to_string());
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }),
        )
        .route(
            "/secret",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "internal-secret"
                }
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, secret_hits)
}

fn proxy() -> NetworkProxy {
    let mut config = ProxyConfig::default();
    config.settings.allow_private_networks = true;
    config.settings.blocked_domains = vec!["localhost".to_string()];
    config.settings.advanced.retry_delay_ms = 10;
    NetworkProxy::builder(config)
        .without_default_providers()
        .build()
        .unwrap()
}

fn jump(port: u16, to: &str) -> String {
    format!("http://127.0.0.1:{}/jump?to={}", port, to)
}

#[tokio::test]
async fn test_redirect_to_blocked_domain_is_refused() {
    let (port, secret_hits) = spawn_origin().await;
    let proxy = proxy();

    let target = format!("http://localhost:{}/secret", port);
    let result = proxy.execute_request(ProxyRequest::get("a", jump(port, &target))).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Security);
    assert!(!error.retryable);
    assert_eq!(result.diagnostics.attempts, 1);
    assert_eq!(secret_hits.load(Ordering::SeqCst), 0);

    let stats = proxy.get_stats();
    assert_eq!(stats.blocked_requests, 1);
}

#[tokio::test]
async fn test_redirect_to_blocked_port_is_refused() {
    let (port, _) = spawn_origin().await;
    let proxy = proxy();

    let result = proxy
        .execute_request(ProxyRequest::get("a", jump(port, "http://127.0.0.1:3306/")))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Security);
}

#[tokio::test]
async fn test_approval_does_not_follow_redirect_to_another_host() {
    let (port, secret_hits) = spawn_origin().await;
    let proxy = proxy();

    let target = format!("http://localhost:{}/secret", port);
    let result = proxy
        .execute_request(ProxyRequest::get("a", jump(port, &target)).approved())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Security);
    assert_eq!(secret_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_redirect_within_allowed_host_is_followed() {
    let (port, secret_hits) = spawn_origin().await;
    let proxy = proxy();

    let result = proxy
        .execute_request(ProxyRequest::get("a", jump(port, "/secret")))
        .await;

    assert!(result.success, "{:?}", result.error);
    let response = result.response.unwrap();
    assert_eq!(response.redirect_count, 1);
    assert_eq!(response.body_text(), "internal-secret");
    assert_eq!(secret_hits.load(Ordering::SeqCst), 1);
}
