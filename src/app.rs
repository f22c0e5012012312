//! Supervisor: wires the components together and owns their lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error as ThisError;
use tokio::{signal, sync::mpsc};
use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::catalog::{CatalogError, HostCatalog};
use crate::cli::ServeArgs;
use crate::config::{self, CONFIG_FILE_NAME};
use crate::dns::{ReverseDns, SystemResolver};
use crate::face::{self, FaceApi};
use crate::http::{self, AppState, BasicAuth};
use crate::monitor::Monitor;
use crate::notify::{self, Notifier, TelegramNotifier};
use crate::processor::HostProcessor;
use crate::status::StatusStore;

/// Drain window for the HTTP server during shutdown.
const WEB_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Startup failures, each mapped to the service exit code it reports.
#[derive(Debug, ThisError)]
pub enum StartupError {
    #[error("locate executable: {0}")]
    ExecutablePath(#[source] std::io::Error),
    #[error("load config: {0:#}")]
    Config(eyre::Report),
    #[error("load hosts: {0}")]
    Hosts(#[from] CatalogError),
    #[error("start web server: {0:#}")]
    WebServer(eyre::Report),
}

impl StartupError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ExecutablePath(_) => 1,
            Self::Config(_) => 2,
            Self::Hosts(_) => 3,
            Self::WebServer(_) => 4,
        }
    }
}

fn resolve_config_path(args: &ServeArgs) -> Result<PathBuf, StartupError> {
    if let Some(ref path) = args.config {
        return Ok(path.clone());
    }
    let exe = std::env::current_exe().map_err(StartupError::ExecutablePath)?;
    let dir = exe.parent().map_or_else(|| PathBuf::from("."), PathBuf::from);
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Resolves when the process receives SIGTERM or ctrl-c.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to create SIGTERM signal handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Run the daemon until a shutdown signal arrives.
///
/// Startup order: config, host catalog, notification pump, agent/face
/// clients, web server, scan loop. Shutdown order: the ticker stops and the
/// in-flight scan completes, the notification channel closes and the pump
/// drains, then the web server is torn down.
///
/// # Errors
///
/// Returns a [`StartupError`] when any startup step fails; the variant
/// carries the exit code to report.
pub async fn run(args: &ServeArgs) -> Result<(), StartupError> {
    let config_path = resolve_config_path(args)?;
    info!("using config path: {}", config_path.display());

    let config = config::load(&config_path).await.map_err(StartupError::Config)?;

    let catalog = Arc::new(HostCatalog::new(
        config.hosts_dir(&config_path),
        config.host_defaults(),
    ));
    catalog.reload().await?;

    let statuses = Arc::new(StatusStore::new());
    let (notifications_tx, notifications_rx) = mpsc::channel(1);

    let notifier: Arc<dyn Notifier> = Arc::new(
        TelegramNotifier::new(
            config.telegram_bot_token.clone(),
            config.telegram_notifications_recipients.clone(),
        )
        .map_err(|e| StartupError::Config(e.into()))?,
    );
    let pump = tokio::spawn(notify::pump(notifications_rx, notifier));

    let agent = AgentClient::new(config.check_agent_online_timeout)
        .map_err(|e| StartupError::Config(e.into()))?;
    let face: Arc<dyn FaceApi> = Arc::new(
        face::Client::new(&config.face_api).map_err(|e| StartupError::Config(e.into()))?,
    );
    let processor = Arc::new(HostProcessor::new(
        agent,
        face,
        statuses.clone(),
        notifications_tx,
        config.check_online_timeout,
        config.check_agent_online_timeout,
    ));

    let dns: Arc<dyn ReverseDns> = Arc::new(
        SystemResolver::from_system_conf().map_err(|e| StartupError::WebServer(e.into()))?,
    );
    let state = AppState {
        catalog: catalog.clone(),
        statuses: statuses.clone(),
        dns,
        auth: Arc::new(BasicAuth {
            login: config.web_server.login.clone(),
            password: config.web_server.password.clone(),
        }),
    };
    let web = http::start(&config.web_server, state)
        .await
        .map_err(StartupError::WebServer)?;

    info!(
        period = ?config.process_period,
        concurrency = config.process_concurrency,
        "overseer started"
    );

    let monitor = Monitor::new(
        catalog,
        statuses,
        processor,
        config.process_period,
        config.process_concurrency,
    );
    monitor.run(shutdown_signal()).await;

    // Dropping the monitor drops the processor and with it the last
    // notification sender; the pump exits once the channel drains.
    drop(monitor);
    if pump.await.is_err() {
        warn!("notification pump panicked");
    }

    web.stop(WEB_DRAIN_TIMEOUT).await;
    info!("overseer stopped");
    Ok(())
}
