//! End-to-end request handling through the HTTP router

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tower::ServiceExt;

use vmgate::auth::{GroupIdSet, CLIENT_PRINCIPAL_HEADER};
use vmgate::cache::MembershipCache;
use vmgate::compute::VmControl;
use vmgate::directory::DirectoryClient;
use vmgate::dispatch::Dispatcher;
use vmgate::policy::{ActionPolicy, GroupBindings};
use vmgate::resolver::AuthorizationResolver;
use vmgate::server::{router, AppState};
use vmgate::Result;

const USERS: &str = "5f1c2a9e-users";
const ADMINS: &str = "7d3e8b41-admins";
const OID: &str = "0b5a7c1e-1111-4c3a-9d7e-2f0e6f7a8b9c";

/// Directory returning a fixed membership and counting lookups
struct FakeDirectory {
    groups: GroupIdSet,
    calls: AtomicUsize,
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn resolve_groups(&self, _subject_id: &str) -> Result<GroupIdSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.clone())
    }

    async fn resolve_object_id(&self, _user_name: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(OID.to_string()))
    }
}

/// VM that accepts every request and counts them
#[derive(Default)]
struct FakeVm {
    calls: AtomicUsize,
}

#[async_trait]
impl VmControl for FakeVm {
    async fn start(&self) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "vm": "avd-host-0", "message": "VM 'avd-host-0' start request sent.", "statusCode": 202 }))
    }

    async fn power_off(&self) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "vm": "avd-host-0", "message": "VM 'avd-host-0' stop request sent.", "statusCode": 202 }))
    }

    async fn instance_view(&self) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "vm": "avd-host-0", "powerState": "VM running", "statuses": [] }))
    }
}

struct Harness {
    app: axum::Router,
    directory: Arc<FakeDirectory>,
    vm: Arc<FakeVm>,
}

fn harness(directory_groups: &[&str]) -> Harness {
    let directory = Arc::new(FakeDirectory {
        groups: directory_groups.iter().map(|g| g.to_string()).collect(),
        calls: AtomicUsize::new(0),
    });
    let vm = Arc::new(FakeVm::default());

    let policy = ActionPolicy::new(GroupBindings {
        users: USERS.into(),
        administrators: ADMINS.into(),
    });
    let resolver = AuthorizationResolver::new(directory.clone(), Arc::new(MembershipCache::new()));
    let dispatcher = Dispatcher::new(policy, Arc::new(resolver), vm.clone());

    Harness {
        app: router(AppState {
            dispatcher: Arc::new(dispatcher),
        }),
        directory,
        vm,
    }
}

fn principal_header(claim_groups: &[&str]) -> String {
    let claims: Vec<_> = claim_groups
        .iter()
        .map(|g| json!({ "typ": "groups", "val": g }))
        .collect();
    let doc = json!({
        "identityProvider": "aad",
        "userId": OID,
        "userDetails": "ada@contoso.com",
        "userRoles": ["anonymous", "authenticated"],
        "claims": claims,
    });
    STANDARD.encode(doc.to_string())
}

fn request(method: &str, action: &str, principal: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(format!("/api/vm/{}", action));
    if let Some(p) = principal {
        builder = builder.header(CLIENT_PRINCIPAL_HEADER, p);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// =============================================================================
// Story: a user with the group in their token starts the VM
// =============================================================================

#[tokio::test]
async fn user_with_group_claim_starts_vm_without_directory_call() {
    let h = harness(&[]);

    let (status, body) = send(
        &h.app,
        request("POST", "start", Some(principal_header(&[USERS]))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "start");
    assert_eq!(body["result"]["vm"], "avd-host-0");
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.vm.calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Story: a user cannot stop; the directory confirms and the answer is cached
// =============================================================================

#[tokio::test]
async fn user_cannot_stop_and_membership_is_cached() {
    let h = harness(&[USERS]);
    let principal = principal_header(&[USERS]);

    let (status, body) = send(&h.app, request("POST", "stop", Some(principal.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "success": false, "error": "access denied" }));
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 1);

    let (status, _) = send(&h.app, request("POST", "stop", Some(principal))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.vm.calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Story: an administrator without group claims is resolved via the directory
// =============================================================================

#[tokio::test]
async fn administrator_resolved_through_directory_can_stop() {
    let h = harness(&[ADMINS]);

    let (status, body) = send(&h.app, request("POST", "stop", Some(principal_header(&[])))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "stop");
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.vm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_is_readable_with_get() {
    let h = harness(&[]);

    let (status, body) = send(
        &h.app,
        request("GET", "status", Some(principal_header(&[ADMINS]))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["powerState"], "VM running");
}

// =============================================================================
// Story: malformed requests never reach the directory
// =============================================================================

#[tokio::test]
async fn stop_via_get_is_method_not_allowed_without_lookup() {
    let h = harness(&[ADMINS]);

    let (status, body) = send(&h.app, request("GET", "stop", Some(principal_header(&[])))).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["success"], false);
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.vm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn method_not_allowed_advertises_accepted_methods() {
    let h = harness(&[]);

    let response = h
        .app
        .clone()
        .oneshot(request("DELETE", "status", Some(principal_header(&[ADMINS]))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST");
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let h = harness(&[]);

    let (status, body) = send(
        &h.app,
        request("POST", "reboot", Some(principal_header(&[ADMINS]))),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn paths_outside_the_action_table_get_json_not_found() {
    let h = harness(&[ADMINS]);

    for uri in ["/api/vm/", "/api/vm/start/extra", "/api/vm/%FF", "/api/other"] {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CLIENT_PRINCIPAL_HEADER, principal_header(&[ADMINS]))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, req).await;

        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["success"], false, "{}", uri);
        assert!(body["error"].is_string(), "{}", uri);
    }
    assert_eq!(h.vm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_principal_is_unauthenticated() {
    let h = harness(&[ADMINS]);

    let (status, body) = send(&h.app, request("POST", "start", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn undecodable_principal_is_unauthenticated() {
    let h = harness(&[ADMINS]);

    let (status, _) = send(
        &h.app,
        request("POST", "start", Some("%%% not base64 %%%".into())),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn healthz_reports_ok() {
    let h = harness(&[]);

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}
