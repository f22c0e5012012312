//! Authenticated read endpoints over the catalog and status snapshots.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse as _, Response},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use secrecy::{ExposeSecret as _, SecretString};
use tower_http::cors::CorsLayer;

use crate::catalog::Host;
use crate::http::server::AppState;
use crate::status::HostStatus;

/// Credentials protecting the read endpoints.
pub struct BasicAuth {
    pub login: String,
    pub password: Arc<SecretString>,
}

pub(super) fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/hosts", get(list_hosts))
        .route("/hosts_statuses", get(list_host_statuses))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth))
        .layer(CorsLayer::permissive())
}

#[axum::debug_handler]
async fn list_hosts(State(state): State<AppState>) -> Json<Vec<Host>> {
    Json(state.catalog.snapshot().await)
}

#[axum::debug_handler]
async fn list_host_statuses(State(state): State<AppState>) -> Json<Vec<HostStatus>> {
    Json(state.statuses.snapshot().await)
}

/// Middleware rejecting requests without the configured basic-auth credentials.
async fn require_basic_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if authorized(&req, &state.auth) {
        return next.run(req).await;
    }
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"overseer\""),
    );
    response
}

fn authorized(req: &Request<Body>, auth: &BasicAuth) -> bool {
    let Some(value) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((login, password)) = credentials.split_once(':') else {
        return false;
    };
    login == auth.login && password == auth.password.expose_secret()
}
