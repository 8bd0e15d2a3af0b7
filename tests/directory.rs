//! Graph directory client against a local stand-in server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use vmgate::credential::TokenProvider;
use vmgate::directory::{DirectoryClient, GraphDirectoryClient, MAX_PAGES};
use vmgate::retry::RetryConfig;
use vmgate::{Error, Result};

struct StaticToken;

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok("test-token".to_string())
    }
}

/// Behaviour of the stand-in directory
#[derive(Clone)]
struct GraphState {
    base: Arc<String>,
    membership_calls: Arc<AtomicUsize>,
    throttle_first: usize,
}

async fn transitive_member_of(
    State(state): State<GraphState>,
    Path(user): Path<String>,
) -> Response {
    let call = state.membership_calls.fetch_add(1, Ordering::SeqCst);
    if call < state.throttle_first {
        return (StatusCode::TOO_MANY_REQUESTS, "throttled").into_response();
    }
    if user == "missing" {
        return (StatusCode::NOT_FOUND, "Request_ResourceNotFound").into_response();
    }
    if user == "looping" {
        return Json(json!({
            "value": [{ "id": "users-guid" }],
            "@odata.nextLink": format!("{}/users/looping/transitiveMemberOf", state.base)
        }))
        .into_response();
    }
    if user == "redirected" {
        return Json(json!({
            "value": [{ "id": "users-guid" }],
            "@odata.nextLink": "http://192.0.2.1/v1.0/collect"
        }))
        .into_response();
    }

    Json(json!({
        "value": [
            { "@odata.type": "#microsoft.graph.group", "id": "users-guid" },
            { "@odata.type": "#microsoft.graph.directoryRole", "id": "role-guid" }
        ],
        "@odata.nextLink": format!("{}/paged/{}", state.base, user)
    }))
    .into_response()
}

async fn second_page(Path(_user): Path<String>) -> Json<serde_json::Value> {
    Json(json!({ "value": [{ "id": "admins-guid" }] }))
}

async fn user(Path(user): Path<String>) -> Response {
    if user == "ada@contoso.com" {
        Json(json!({ "id": "0b5a7c1e-1111-4c3a-9d7e-2f0e6f7a8b9c" })).into_response()
    } else {
        (StatusCode::NOT_FOUND, "Request_ResourceNotFound").into_response()
    }
}

/// Start a stand-in directory and return its base URL and call counter
async fn spawn_graph(throttle_first: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/v1.0", listener.local_addr().unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let state = GraphState {
        base: Arc::new(base.clone()),
        membership_calls: calls.clone(),
        throttle_first,
    };
    let app = Router::new()
        .route("/v1.0/users/{user}/transitiveMemberOf", get(transitive_member_of))
        .route("/v1.0/users/{user}", get(user))
        .route("/v1.0/paged/{user}", get(second_page))
        .with_state(state);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (base, calls)
}

fn client(base: &str) -> GraphDirectoryClient {
    GraphDirectoryClient::with_base_url(Arc::new(StaticToken), base)
        .unwrap()
        .with_retry(RetryConfig {
            initial_delay: Duration::from_millis(5),
            ..RetryConfig::directory()
        })
}

#[tokio::test]
async fn membership_is_collected_across_pages() {
    let (base, calls) = spawn_graph(0).await;

    let groups = client(&base).resolve_groups("subject-1").await.unwrap();

    assert_eq!(groups.len(), 3);
    assert!(groups.contains("users-guid"));
    assert!(groups.contains("admins-guid"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn throttling_is_retried_until_success() {
    let (base, calls) = spawn_graph(2).await;

    let groups = client(&base).resolve_groups("subject-1").await.unwrap();

    assert!(groups.contains("admins-guid"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_throttling_stops_after_three_attempts() {
    let (base, calls) = spawn_graph(10).await;

    let err = client(&base).resolve_groups("subject-1").await.unwrap_err();

    assert!(matches!(err, Error::DirectoryQuery { status: 429, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let (base, calls) = spawn_graph(0).await;

    let err = client(&base).resolve_groups("missing").await.unwrap_err();

    assert!(matches!(err, Error::DirectoryQuery { status: 404, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn endless_pagination_is_cut_off() {
    let (base, calls) = spawn_graph(0).await;

    let err = client(&base).resolve_groups("looping").await.unwrap_err();

    assert!(matches!(err, Error::DirectoryTransport(_)));
    assert_eq!(calls.load(Ordering::SeqCst), MAX_PAGES as usize);
}

#[tokio::test]
async fn next_link_to_another_origin_is_not_followed() {
    let (base, calls) = spawn_graph(0).await;

    let err = client(&base).resolve_groups("redirected").await.unwrap_err();

    assert!(matches!(err, Error::DirectoryTransport(msg) if msg.contains("origin")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn user_principal_name_resolves_to_object_id() {
    let (base, _) = spawn_graph(0).await;
    let c = client(&base);

    assert_eq!(
        c.resolve_object_id("ada@contoso.com").await.unwrap().as_deref(),
        Some("0b5a7c1e-1111-4c3a-9d7e-2f0e6f7a8b9c")
    );
    assert_eq!(c.resolve_object_id("nobody@contoso.com").await.unwrap(), None);
}

#[tokio::test]
async fn unreachable_directory_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/v1.0", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&base).resolve_groups("subject-1").await.unwrap_err();
    assert!(matches!(err, Error::DirectoryTransport(_)));
}
