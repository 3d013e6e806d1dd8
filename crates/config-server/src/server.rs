//! HTTP surface of the plan delivery server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use capr_settings::{SERVER_URL, Settings};
use crds::CONNECT_AGENT_PATH;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::delivery::PlanDelivery;
use crate::error::{DeliveryError, InstallerError};
use crate::installer::{Installer, SYSTEM_AGENT_INSTALL_PATH, ScriptParams, WINS_AGENT_INSTALL_PATH};

/// Route serving the configured CA bundle
pub const CACERTS_PATH: &str = "/cacerts";
/// Liveness route
pub const HEALTHZ_PATH: &str = "/healthz";

/// Shared state of the HTTP handlers
#[derive(Debug)]
pub struct AppState {
    pub delivery: PlanDelivery,
    pub installer: Installer,
    pub settings: Arc<Settings>,
}

/// Build the router for all server routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(CONNECT_AGENT_PATH, get(connect_agent).post(connect_agent))
        .route(SYSTEM_AGENT_INSTALL_PATH, get(linux_installer))
        .route(WINS_AGENT_INSTALL_PATH, get(windows_installer))
        .route(CACERTS_PATH, get(cacerts))
        .route(HEALTHZ_PATH, get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `addr` until the listener fails
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Plan delivery server listening");
    axum::serve(listener, router(state)).await
}

async fn connect_agent(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, DeliveryError> {
    let connection = state.delivery.connect(&headers).await?;
    let body = connection.to_json()?;
    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

/// Server URL agents are told to use: the `server-url` setting, else the request's host
fn server_url(settings: &Settings, headers: &HeaderMap) -> String {
    let configured = settings.get(SERVER_URL);
    if !configured.is_empty() {
        return configured;
    }
    let host = headers.get(HOST).and_then(|h| h.to_str().ok()).unwrap_or_default();
    format!("https://{host}")
}

fn script_params(state: &AppState, headers: &HeaderMap) -> ScriptParams {
    ScriptParams {
        server_url: server_url(&state.settings, headers),
        ca_checksum: state.settings.ca_checksum(),
        ..Default::default()
    }
}

fn plain_text(body: String) -> Response {
    ([(CONTENT_TYPE, "text/plain")], body).into_response()
}

async fn linux_installer(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, InstallerError> {
    let script = state.installer.linux_script(&script_params(&state, &headers)).await?;
    Ok(plain_text(script))
}

async fn windows_installer(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, InstallerError> {
    let script = state.installer.windows_script(&script_params(&state, &headers)).await?;
    Ok(plain_text(script))
}

async fn cacerts(State(state): State<Arc<AppState>>) -> Response {
    match state.settings.ca_bundle() {
        Some(ca) => plain_text(ca),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}
