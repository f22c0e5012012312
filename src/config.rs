//! Daemon configuration (`overseer.conf`, YAML).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eyre::{WrapErr as _, ensure};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::fs;

use crate::catalog::HostDefaults;
use crate::face::FaceApiConfig;

/// Default name of the config file, looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "overseer.conf";

/// HTTP surface settings (`web_server` section).
#[derive(Debug, Clone, Deserialize)]
pub struct WebServerConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub address: String,
    pub login: String,
    pub password: Arc<SecretString>,
}

/// Root configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct OverseerConfig {
    pub hosts_configs_directory_path: PathBuf,

    pub default_online_check_port: u16,
    pub default_agent_host: String,
    pub default_agent_port: u16,
    pub default_camera_id: u32,

    #[serde(with = "humantime_serde")]
    pub process_period: Duration,
    pub process_concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub check_online_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub check_agent_online_timeout: Duration,

    pub telegram_bot_token: Arc<SecretString>,
    pub telegram_notifications_recipients: Vec<i64>,

    pub face_api: FaceApiConfig,
    pub web_server: WebServerConfig,
}

impl OverseerConfig {
    /// Defaults used when a host record is autocreated by self-registration.
    pub fn host_defaults(&self) -> HostDefaults {
        HostDefaults {
            online_check_port: self.default_online_check_port,
            agent_host: self.default_agent_host.clone(),
            agent_port: self.default_agent_port,
            camera_id: self.default_camera_id,
        }
    }

    /// Hosts dir resolved against the config file's directory when relative.
    pub fn hosts_dir(&self, config_path: &Path) -> PathBuf {
        if self.hosts_configs_directory_path.is_absolute() {
            self.hosts_configs_directory_path.clone()
        } else {
            config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&self.hosts_configs_directory_path)
        }
    }

    fn validate(&self) -> eyre::Result<()> {
        ensure!(
            self.process_concurrency >= 1,
            "process_concurrency must be at least 1"
        );
        ensure!(
            !self.process_period.is_zero(),
            "process_period must be positive"
        );
        Ok(())
    }
}

/// Read and parse the daemon config.
///
/// # Errors
///
/// Returns an error if the file cannot be read, fails to decode, or violates
/// the value constraints.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<OverseerConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(&path).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: OverseerConfig = serde_yaml::from_str(&content).wrap_err(format!(
        "Failed to parse config as YAML at: {}",
        path_ref.display()
    ))?;
    config.validate().wrap_err(format!(
        "Invalid config at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}
