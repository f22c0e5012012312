//! HTTP server lifecycle: router assembly, bind-with-retry startup, and
//! graceful teardown.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use eyre::{WrapErr as _, bail};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{Instant, sleep, timeout},
};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::catalog::HostCatalog;
use crate::config::WebServerConfig;
use crate::dns::ReverseDns;
use crate::http::{BasicAuth, api, provisioning};
use crate::status::StatusStore;

const BIND_ATTEMPTS: u32 = 3;
const BIND_RETRY_GAP: Duration = Duration::from_secs(1);
const STARTUP_DEADLINE: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<HostCatalog>,
    pub statuses: Arc<StatusStore>,
    pub dns: Arc<dyn ReverseDns>,
    pub auth: Arc<BasicAuth>,
}

fn router(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    provisioning::routes()
        .merge(api::routes(&state))
        .layer(middleware_stack)
        .with_state(state)
}

/// A running HTTP server; [`Self::stop`] drains it gracefully.
pub struct WebServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), io::Error>>,
}

impl WebServer {
    /// The address the listener is actually bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal the server to stop and wait up to `drain` for in-flight
    /// requests; the serve task is aborted if the drain window elapses.
    pub async fn stop(mut self, drain: Duration) {
        drop(self.shutdown_tx.send(()));
        match timeout(drain, &mut self.handle).await {
            Ok(Ok(Ok(()))) => info!("web server stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "web server exited with error"),
            Ok(Err(e)) => warn!(error = %e, "web server task failed"),
            Err(_) => {
                warn!("web server did not drain in time, aborting");
                self.handle.abort();
            }
        }
    }
}

/// Bind and start serving.
///
/// Binding is retried up to 3 times with a 1 s gap; after that the listener
/// must accept connections within 5 s or startup fails.
///
/// # Errors
///
/// Returns an error when the address cannot be parsed or bound, or the server
/// does not come up within the deadline.
pub async fn start(config: &WebServerConfig, state: AppState) -> eyre::Result<WebServer> {
    let addr: SocketAddr = config
        .address
        .parse()
        .wrap_err(format!("Invalid web server address: {}", config.address))?;

    let listener = bind_with_retry(addr).await?;
    let addr = listener.local_addr().wrap_err("Failed to read bound address")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        drop(shutdown_rx.await);
    });
    let mut handle = tokio::spawn(async move { server.await });

    // Readiness probe: the supervisor treats a server that is not accepting
    // connections within the deadline as a failed startup.
    let deadline = Instant::now() + STARTUP_DEADLINE;
    loop {
        if handle.is_finished() {
            match (&mut handle).await {
                Ok(Err(e)) => return Err(e).wrap_err("Web server exited during startup"),
                Ok(Ok(())) => bail!("Web server exited during startup"),
                Err(e) => return Err(e).wrap_err("Web server task failed during startup"),
            }
        }
        match TcpStream::connect(addr).await {
            Ok(_) => break,
            Err(_) if Instant::now() < deadline => sleep(Duration::from_millis(100)).await,
            Err(e) => {
                handle.abort();
                return Err(e).wrap_err(format!(
                    "Web server did not start within {STARTUP_DEADLINE:?}"
                ));
            }
        }
    }

    info!("Listening on http://{addr}");
    Ok(WebServer {
        addr,
        shutdown_tx,
        handle,
    })
}

async fn bind_with_retry(addr: SocketAddr) -> eyre::Result<TcpListener> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < BIND_ATTEMPTS => {
                warn!(%addr, error = %e, attempt, "failed to bind, retrying");
                sleep(BIND_RETRY_GAP).await;
            }
            Err(e) => {
                return Err(e).wrap_err(format!(
                    "Failed to bind {addr} after {BIND_ATTEMPTS} attempts"
                ));
            }
        }
    }
}
