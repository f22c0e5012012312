//! Stateless client for the per-workstation agent wire protocol.
//!
//! Liveness is a plain TCP connect against the configured ports; the agent
//! itself speaks HTTP: `GET /status` returns the current camera frame with the
//! active login in a base64 header, `POST /logout` force-logs-out the session.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use reqwest::{StatusCode, header::HeaderMap};
use thiserror::Error as ThisError;
use tokio::{net::TcpStream, time};

/// Header carrying the base64-encoded login of the active session.
pub const ACTIVE_USER_HEADER: &str = "x-active-user";

/// Extra time on top of the dial timeout for the agent to stream a frame.
const STATUS_READ_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, ThisError)]
pub enum AgentError {
    #[error("not 200 status code: {0}")]
    UnexpectedStatus(u16),
    #[error("missing X-Active-User header")]
    MissingUserHeader,
    #[error("decode user name: {0}")]
    DecodeUser(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Successful `GET /status` response: one camera frame and the active login
/// (empty when the workstation is locked or nobody is logged in).
#[derive(Debug)]
pub struct AgentStatus {
    pub frame: Bytes,
    pub active_user: String,
}

/// Client for talking to agents. Cheap to clone; holds one HTTP client.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl AgentClient {
    /// Build a client whose HTTP calls time out after `agent_timeout` plus a
    /// read budget for the frame body.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the HTTP client cannot be constructed.
    pub fn new(agent_timeout: Duration) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .connect_timeout(agent_timeout)
            .timeout(agent_timeout + STATUS_READ_BUDGET)
            .build()?;
        Ok(Self { http })
    }

    /// True iff a TCP connection to `host:port` succeeds within `timeout`.
    pub async fn check_online(&self, host: &str, port: u16, timeout: Duration) -> bool {
        probe(host, port, timeout).await
    }

    /// True iff the agent port accepts a TCP connection within `timeout`.
    pub async fn check_agent_online(&self, host: &str, port: u16, timeout: Duration) -> bool {
        probe(host, port, timeout).await
    }

    /// Fetch the agent status: camera frame plus decoded active login.
    ///
    /// The header is decoded before the status code is checked, and a non-200
    /// response drops the body and surfaces `not 200 status code: {code}`.
    ///
    /// # Errors
    ///
    /// Returns an [`AgentError`] on transport failure, non-200 response, or a
    /// missing/undecodable `X-Active-User` header.
    pub async fn status(&self, host: &str, port: u16) -> Result<AgentStatus, AgentError> {
        let response = self
            .http
            .get(format!("http://{host}:{port}/status"))
            .send()
            .await?;

        let active_user = decode_active_user(response.headers())?;

        let code = response.status();
        if code != StatusCode::OK {
            return Err(AgentError::UnexpectedStatus(code.as_u16()));
        }

        let frame = response.bytes().await?;
        Ok(AgentStatus { frame, active_user })
    }

    /// Ask the agent to log out the active session; success iff 200.
    ///
    /// # Errors
    ///
    /// Returns an [`AgentError`] on transport failure or non-200 response.
    pub async fn logout(&self, host: &str, port: u16) -> Result<(), AgentError> {
        let response = self
            .http
            .post(format!("http://{host}:{port}/logout"))
            .send()
            .await?;
        let code = response.status();
        if code != StatusCode::OK {
            return Err(AgentError::UnexpectedStatus(code.as_u16()));
        }
        Ok(())
    }
}

async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

fn decode_active_user(headers: &HeaderMap) -> Result<String, AgentError> {
    let value = headers
        .get(ACTIVE_USER_HEADER)
        .ok_or(AgentError::MissingUserHeader)?;
    let value = value
        .to_str()
        .map_err(|e| AgentError::DecodeUser(e.to_string()))?;
    let decoded = STANDARD
        .decode(value.trim())
        .map_err(|e| AgentError::DecodeUser(e.to_string()))?;
    String::from_utf8(decoded).map_err(|e| AgentError::DecodeUser(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{
        Router,
        http::{HeaderValue, StatusCode, header::HeaderName},
        response::IntoResponse,
        routing::{get, post},
    };

    use super::*;

    const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

    async fn spawn_agent(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(tokio::spawn(async move {
            axum::serve(listener, router).await
        }));
        addr
    }

    fn status_response(user_b64: &'static str, code: StatusCode) -> Router {
        Router::new().route(
            "/status",
            get(move || async move {
                (
                    code,
                    [(
                        HeaderName::from_static(ACTIVE_USER_HEADER),
                        HeaderValue::from_static(user_b64),
                    )],
                    "frame-bytes",
                )
                    .into_response()
            }),
        )
    }

    #[tokio::test]
    async fn probe_reports_listening_and_refused_ports() {
        let client = AgentClient::new(PROBE_TIMEOUT).unwrap();
        let addr = spawn_agent(Router::new()).await;
        assert!(client.check_online("127.0.0.1", addr.port(), PROBE_TIMEOUT).await);

        let free = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!client.check_agent_online("127.0.0.1", free, PROBE_TIMEOUT).await);
    }

    #[tokio::test]
    async fn status_decodes_user_and_returns_frame() {
        // "alice"
        let addr = spawn_agent(status_response("YWxpY2U=", StatusCode::OK)).await;
        let client = AgentClient::new(PROBE_TIMEOUT).unwrap();

        let status = client.status("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(status.active_user, "alice");
        assert_eq!(&status.frame[..], b"frame-bytes");
    }

    #[tokio::test]
    async fn status_with_empty_header_yields_empty_user() {
        let addr = spawn_agent(status_response("", StatusCode::OK)).await;
        let client = AgentClient::new(PROBE_TIMEOUT).unwrap();

        let status = client.status("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(status.active_user, "");
    }

    #[tokio::test]
    async fn status_surfaces_non_200_with_original_message() {
        let addr =
            spawn_agent(status_response("YWxpY2U=", StatusCode::INTERNAL_SERVER_ERROR)).await;
        let client = AgentClient::new(PROBE_TIMEOUT).unwrap();

        let err = client.status("127.0.0.1", addr.port()).await.unwrap_err();
        assert_eq!(err.to_string(), "not 200 status code: 500");
    }

    #[tokio::test]
    async fn status_rejects_undecodable_header() {
        let addr = spawn_agent(status_response("%%%not-base64%%%", StatusCode::OK)).await;
        let client = AgentClient::new(PROBE_TIMEOUT).unwrap();

        let err = client.status("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(matches!(err, AgentError::DecodeUser(_)));
    }

    #[tokio::test]
    async fn status_without_header_is_an_error() {
        let router = Router::new().route("/status", get(|| async { "frame" }));
        let addr = spawn_agent(router).await;
        let client = AgentClient::new(PROBE_TIMEOUT).unwrap();

        let err = client.status("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingUserHeader));
    }

    #[tokio::test]
    async fn logout_succeeds_on_200_and_fails_otherwise() {
        let router = Router::new().route("/logout", post(|| async { StatusCode::OK }));
        let addr = spawn_agent(router).await;
        let client = AgentClient::new(PROBE_TIMEOUT).unwrap();
        client.logout("127.0.0.1", addr.port()).await.unwrap();

        let router = Router::new()
            .route("/logout", post(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let addr = spawn_agent(router).await;
        let err = client.logout("127.0.0.1", addr.port()).await.unwrap_err();
        assert_eq!(err.to_string(), "not 200 status code: 503");
    }
}
