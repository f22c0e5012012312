//! Shared fixtures for the integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use bytes::Bytes;
use tokio::sync::mpsc;

use overseer::catalog::Host;
use overseer::dns::{DnsError, ReverseDns};
use overseer::face::{FaceApi, FaceError};

/// Grab an ephemeral port that nothing is listening on.
pub fn get_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// A fake workstation agent: `/status` answers with a fixed code and
/// `X-Active-User` value, `/logout` counts calls and answers a fixed code.
pub struct StubAgent {
    pub addr: SocketAddr,
    pub logouts: Arc<AtomicUsize>,
}

pub async fn spawn_agent(status_code: u16, user_b64: &'static str, logout_code: u16) -> StubAgent {
    let logouts = Arc::new(AtomicUsize::new(0));
    let counter = logouts.clone();

    let router = Router::new()
        .route(
            "/status",
            get(move || async move {
                (
                    StatusCode::from_u16(status_code).unwrap(),
                    [(
                        HeaderName::from_static("x-active-user"),
                        HeaderValue::from_static(user_b64),
                    )],
                    "frame-bytes",
                )
                    .into_response()
            }),
        )
        .route(
            "/logout",
            post(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::from_u16(logout_code).unwrap()
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(tokio::spawn(async move {
        axum::serve(listener, router).await
    }));

    StubAgent { addr, logouts }
}

/// What the stubbed face backend should answer with.
pub enum FaceBehavior {
    User(&'static str),
    NotPresent,
    Fail,
}

pub struct StubFace(pub FaceBehavior);

#[async_trait]
impl FaceApi for StubFace {
    async fn add_user(&self, _photo: Bytes) -> Result<String, FaceError> {
        unimplemented!("not exercised by these tests")
    }

    async fn add_user_photo(&self, _user_id: &str, _photo: Bytes) -> Result<(), FaceError> {
        unimplemented!("not exercised by these tests")
    }

    async fn recognize_user(&self, _frame: Bytes) -> Result<String, FaceError> {
        match self.0 {
            FaceBehavior::User(id) => Ok(id.to_string()),
            FaceBehavior::NotPresent => Err(FaceError::NotPresent),
            FaceBehavior::Fail => Err(FaceError::UnexpectedStatus(500)),
        }
    }

    async fn remove_user(&self, _user_id: &str) -> Result<(), FaceError> {
        unimplemented!("not exercised by these tests")
    }
}

/// Resolver answering fixed names, or failing when none are configured.
pub struct StubDns {
    pub names: Option<Vec<String>>,
}

#[async_trait]
impl ReverseDns for StubDns {
    async fn lookup(&self, _ip: IpAddr) -> Result<Vec<String>, DnsError> {
        self.names
            .clone()
            .ok_or_else(|| DnsError("simulated resolver failure".to_string()))
    }
}

/// Host record pointing at loopback stub ports.
pub fn loopback_host(online_port: u16, agent_port: u16, users: &[(&str, &str)]) -> Host {
    let users = if users.is_empty() {
        None
    } else {
        Some(
            users
                .iter()
                .map(|(login, id)| (login.to_string(), id.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    };
    Host {
        name: "127.0.0.1".to_string(),
        online_check_port: online_port,
        agent_host: "localhost".to_string(),
        agent_port,
        camera_id: 0,
        users,
    }
}

/// Pull everything currently queued without blocking.
pub fn drain_notifications(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
