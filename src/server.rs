//! HTTP server

use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{any, get};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use tracing::{debug, info};

use crate::cache::{spawn_purge_task, MembershipCache};
use crate::compute::ArmComputeClient;
use crate::config::Config;
use crate::credential::{ClientCredentialProvider, GRAPH_SCOPE, MANAGEMENT_SCOPE};
use crate::directory::GraphDirectoryClient;
use crate::dispatch::{ActionOutcome, Dispatcher};
use crate::error::{Error, Result};
use crate::policy::ActionPolicy;
use crate::resolver::AuthorizationResolver;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Action dispatcher
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the production dispatcher from configuration around a shared cache
pub fn build_state(config: &Config, cache: Arc<MembershipCache>) -> Result<AppState> {
    let graph_tokens = ClientCredentialProvider::with_authority(
        config.credential.clone(),
        GRAPH_SCOPE,
        &config.authority,
    )?;
    let management_tokens = ClientCredentialProvider::with_authority(
        config.credential.clone(),
        MANAGEMENT_SCOPE,
        &config.authority,
    )?;

    let directory =
        GraphDirectoryClient::with_base_url(Arc::new(graph_tokens), &config.graph_base_url)?;
    let compute = ArmComputeClient::with_base_url(
        config.vm.clone(),
        Arc::new(management_tokens),
        &config.management_url,
    )?;

    let resolver = AuthorizationResolver::new(Arc::new(directory), cache);
    let dispatcher = Dispatcher::new(
        ActionPolicy::new(config.groups.clone()),
        Arc::new(resolver),
        Arc::new(compute),
    );

    Ok(AppState {
        dispatcher: Arc::new(dispatcher),
    })
}

/// Routes served by the gate
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/vm/{action}", any(action_handler))
        .fallback(not_found)
        .with_state(state)
}

/// JSON 404 for every path outside the route table
async fn not_found(uri: Uri) -> Error {
    debug!(path = %uri.path(), "No route for request");
    Error::NotFound(uri.path().to_string())
}

/// Handle `/api/vm/{action}` for any method
async fn action_handler(
    State(state): State<AppState>,
    action: std::result::Result<Path<String>, PathRejection>,
    method: Method,
    headers: HeaderMap,
) -> std::result::Result<Json<ActionOutcome>, Error> {
    // Undecodable segments cannot name an action
    let Path(action) = action.map_err(|e| Error::NotFound(e.body_text()))?;
    debug!(action = %action, method = %method, "Action request received");

    state
        .dispatcher
        .dispatch(&method, &action, &headers)
        .await
        .map(Json)
}

/// Start the gate server
pub async fn start_server(config: Config) -> Result<()> {
    let cache = Arc::new(MembershipCache::with_ttl(config.cache_ttl));
    let state = build_state(&config, cache.clone())?;
    spawn_purge_task(cache, config.cache_ttl);
    let app = router(state);

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| Error::Config(format!("TLS config error: {}", e)))?;

            info!(addr = %config.addr, "Starting VM gate (TLS)");
            axum_server::bind_rustls(config.addr, tls_config)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!(addr = %config.addr, "Starting VM gate");
            axum_server::bind(config.addr)
                .serve(app.into_make_service())
                .await
        }
    }
    .map_err(|e| Error::Internal(format!("Server error: {}", e)))
}
