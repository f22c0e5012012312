//! Agent self-provisioning endpoint.
//!
//! A freshly started agent asks `GET /hosts/{host_name}/agent_config` for its
//! configuration. The caller is trusted only if reverse DNS of its socket
//! address resolves to the requested host name; on first contact the host
//! record is autocreated from the configured defaults.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse as _, Response},
    routing::get,
};
use tracing::{error, info, warn};

use crate::http::server::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/hosts/{host_name}/agent_config", get(agent_config))
}

#[axum::debug_handler]
async fn agent_config(
    Path(host_name): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let names = match state.dns.lookup(peer.ip()).await {
        Ok(names) => names,
        Err(e) => {
            error!(host = %host_name, peer = %peer, error = %e, "reverse dns lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    // PTR answers come back rooted ("ws01.example.com."); compare without the
    // trailing dot.
    let matched = names
        .iter()
        .any(|name| name.trim_end_matches('.') == host_name);
    if !matched {
        warn!(
            host = %host_name,
            peer = %peer,
            resolved = ?names,
            "caller does not resolve to requested host"
        );
        return StatusCode::NOT_FOUND.into_response();
    }

    match state.catalog.get_or_create(&host_name).await {
        Ok(host) => {
            info!(host = %host_name, peer = %peer, "served agent config");
            Json(host.agent_config()).into_response()
        }
        Err(e) => {
            error!(host = %host_name, error = %e, "failed to get or create host");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
