//! Host records and the on-disk host catalog.
//!
//! Each monitored workstation is described by `<hosts_dir>/<name>/host.conf`
//! (YAML). The catalog keeps an in-memory map derived from that tree and is
//! the single owner of both the map and the filesystem side effects of
//! self-registration.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tokio::{fs, sync::RwLock};
use tracing::info;

/// File name of a per-host config inside its directory.
pub const HOST_CONFIG_FILE_NAME: &str = "host.conf";

/// A monitored workstation as configured on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Cluster-resolvable name of the workstation; must match the directory name.
    pub name: String,
    /// TCP port probed to decide whether the machine is powered on.
    pub online_check_port: u16,
    /// Address the agent binds to on the workstation (served back via agent config).
    pub agent_host: String,
    /// TCP port of the agent's HTTP endpoint.
    pub agent_port: u16,
    /// Camera index the agent should capture from.
    pub camera_id: u32,
    /// Mapping of OS login to face-api user id. Absent means nobody is authorized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<HashMap<String, String>>,
}

/// Configuration handed to a freshly registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub camera_id: u32,
}

impl Host {
    /// The agent-facing slice of this record.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            host: self.agent_host.clone(),
            port: self.agent_port,
            camera_id: self.camera_id,
        }
    }

    fn validate(&self, dir_name: &str, path: &Path) -> Result<(), CatalogError> {
        if self.name != dir_name {
            return Err(CatalogError::Invalid {
                path: path.to_path_buf(),
                reason: format!(
                    "host name {:?} does not match its directory {:?}",
                    self.name, dir_name
                ),
            });
        }
        if self.online_check_port == 0 || self.agent_port == 0 {
            return Err(CatalogError::Invalid {
                path: path.to_path_buf(),
                reason: "ports must be in 1..=65535".to_string(),
            });
        }
        Ok(())
    }
}

/// Defaults applied when a host record is autocreated by self-registration.
#[derive(Debug, Clone)]
pub struct HostDefaults {
    pub online_check_port: u16,
    pub agent_host: String,
    pub agent_port: u16,
    pub camera_id: u32,
}

/// Errors from catalog disk operations.
#[derive(Debug, ThisError)]
pub enum CatalogError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse host config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("host config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error("write host config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encode host config: {0}")]
    Encode(#[source] serde_yaml::Error),
}

/// In-memory view of the hosts-configs directory tree.
///
/// The lock guards the map and the filesystem writes of [`Self::get_or_create`]:
/// readers take the shared side for snapshots, while reload and
/// self-registration take the exclusive side.
pub struct HostCatalog {
    dir: PathBuf,
    defaults: HostDefaults,
    hosts: RwLock<HashMap<String, Host>>,
}

impl HostCatalog {
    pub fn new(dir: PathBuf, defaults: HostDefaults) -> Self {
        Self {
            dir,
            defaults,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the map from disk and install it atomically.
    ///
    /// The directory tree is parsed before the lock is taken; on any error the
    /// previously installed map is kept untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the directory cannot be listed, a host
    /// config cannot be read or decoded, or a record violates its invariants.
    pub async fn reload(&self) -> Result<(), CatalogError> {
        let mut hosts = HashMap::new();

        let mut entries = fs::read_dir(&self.dir).await.map_err(|source| CatalogError::Io {
            path: self.dir.clone(),
            source,
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|source| CatalogError::Io {
            path: self.dir.clone(),
            source,
        })? {
            let file_type = entry.file_type().await.map_err(|source| CatalogError::Io {
                path: entry.path(),
                source,
            })?;
            if !file_type.is_dir() {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path().join(HOST_CONFIG_FILE_NAME);
            let content = fs::read_to_string(&path).await.map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;
            let host: Host =
                serde_yaml::from_str(&content).map_err(|source| CatalogError::Parse {
                    path: path.clone(),
                    source,
                })?;
            host.validate(&dir_name, &path)?;
            hosts.insert(host.name.clone(), host);
        }

        *self.hosts.write().await = hosts;
        Ok(())
    }

    /// Return the host `name`, creating its directory and `host.conf` from the
    /// configured defaults when it does not exist yet.
    ///
    /// The new record is inserted into the live map inside the critical
    /// section, so it is visible to the next scan without waiting for a
    /// reload. Concurrent calls for the same name resolve to the same record.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the directory or config file cannot be
    /// created.
    pub async fn get_or_create(&self, name: &str) -> Result<Host, CatalogError> {
        let mut hosts = self.hosts.write().await;
        if let Some(host) = hosts.get(name) {
            return Ok(host.clone());
        }

        let host_dir = self.dir.join(name);
        fs::create_dir_all(&host_dir).await.map_err(|source| CatalogError::Write {
            path: host_dir.clone(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            fs::set_permissions(&host_dir, std::fs::Permissions::from_mode(0o775))
                .await
                .map_err(|source| CatalogError::Write {
                    path: host_dir.clone(),
                    source,
                })?;
        }

        let host = Host {
            name: name.to_string(),
            online_check_port: self.defaults.online_check_port,
            agent_host: self.defaults.agent_host.clone(),
            agent_port: self.defaults.agent_port,
            camera_id: self.defaults.camera_id,
            users: None,
        };

        let config_path = host_dir.join(HOST_CONFIG_FILE_NAME);
        let encoded = serde_yaml::to_string(&host).map_err(CatalogError::Encode)?;
        fs::write(&config_path, encoded).await.map_err(|source| CatalogError::Write {
            path: config_path,
            source,
        })?;

        hosts.insert(host.name.clone(), host.clone());
        info!(host = %host.name, "registered new host with default config");
        Ok(host)
    }

    /// Stable copy of the current host records; order unspecified.
    pub async fn snapshot(&self) -> Vec<Host> {
        self.hosts.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn defaults() -> HostDefaults {
        HostDefaults {
            online_check_port: 445,
            agent_host: "localhost".to_string(),
            agent_port: 8181,
            camera_id: 0,
        }
    }

    fn write_host(dir: &Path, name: &str, body: &str) {
        let host_dir = dir.join(name);
        std::fs::create_dir_all(&host_dir).unwrap();
        std::fs::write(host_dir.join(HOST_CONFIG_FILE_NAME), body).unwrap();
    }

    #[tokio::test]
    async fn reload_builds_map_from_directory_tree() {
        let tmp = tempfile::tempdir().unwrap();
        write_host(
            tmp.path(),
            "ws01",
            "name: ws01\nonline_check_port: 445\nagent_host: localhost\nagent_port: 8181\ncamera_id: 0\nusers:\n  alice: U-42\n",
        );
        write_host(
            tmp.path(),
            "ws02",
            "name: ws02\nonline_check_port: 445\nagent_host: localhost\nagent_port: 8181\ncamera_id: 1\n",
        );

        let catalog = HostCatalog::new(tmp.path().to_path_buf(), defaults());
        catalog.reload().await.unwrap();

        let mut hosts = catalog.snapshot().await;
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].name, "ws01");
        assert_eq!(
            hosts[0].users.as_ref().unwrap().get("alice").unwrap(),
            "U-42"
        );
        assert_eq!(hosts[1].users, None);
    }

    #[tokio::test]
    async fn reload_keeps_previous_map_on_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_host(
            tmp.path(),
            "ws01",
            "name: ws01\nonline_check_port: 445\nagent_host: localhost\nagent_port: 8181\ncamera_id: 0\n",
        );

        let catalog = HostCatalog::new(tmp.path().to_path_buf(), defaults());
        catalog.reload().await.unwrap();

        write_host(tmp.path(), "ws02", "online_check_port: [not, a, port]\n");
        let err = catalog.reload().await.unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));

        let hosts = catalog.snapshot().await;
        assert_eq!(hosts.len(), 1, "old map must survive a failed reload");
        assert_eq!(hosts[0].name, "ws01");
    }

    #[tokio::test]
    async fn reload_rejects_name_directory_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        write_host(
            tmp.path(),
            "ws01",
            "name: somewhere-else\nonline_check_port: 445\nagent_host: localhost\nagent_port: 8181\ncamera_id: 0\n",
        );

        let catalog = HostCatalog::new(tmp.path().to_path_buf(), defaults());
        let err = catalog.reload().await.unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { .. }));
    }

    #[tokio::test]
    async fn get_or_create_then_reload_yields_equal_host() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = HostCatalog::new(tmp.path().to_path_buf(), defaults());
        catalog.reload().await.unwrap();

        let created = catalog.get_or_create("ws09").await.unwrap();
        assert_eq!(created.online_check_port, 445);
        assert_eq!(created.agent_host, "localhost");
        assert_eq!(created.users, None);

        // Visible immediately, before any reload.
        let snapshot = catalog.snapshot().await;
        assert_eq!(snapshot.len(), 1);

        catalog.reload().await.unwrap();
        let reloaded = catalog.snapshot().await;
        assert_eq!(reloaded, vec![created]);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_resolves_to_one_record() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Arc::new(HostCatalog::new(tmp.path().to_path_buf(), defaults()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                tokio::spawn(async move { catalog.get_or_create("ws01").await.unwrap() })
            })
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(catalog.snapshot().await.len(), 1);
    }
}
