//! Per-host processing pipeline.
//!
//! Each scan runs every catalog host through [`HostProcessor::process`]: a
//! short-circuit state machine (TCP liveness, agent liveness, status fetch,
//! face recognition, remedial action) that always terminates in exactly one
//! status-store write and pushes operator notifications along the way.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::agent::AgentClient;
use crate::catalog::Host;
use crate::face::{FaceApi, FaceError};
use crate::status::{HostStatus, StatusStore};

pub struct HostProcessor {
    agent: AgentClient,
    face: Arc<dyn FaceApi>,
    statuses: Arc<StatusStore>,
    notifications: mpsc::Sender<String>,
    check_online_timeout: Duration,
    check_agent_online_timeout: Duration,
}

impl HostProcessor {
    pub fn new(
        agent: AgentClient,
        face: Arc<dyn FaceApi>,
        statuses: Arc<StatusStore>,
        notifications: mpsc::Sender<String>,
        check_online_timeout: Duration,
        check_agent_online_timeout: Duration,
    ) -> Self {
        Self {
            agent,
            face,
            statuses,
            notifications,
            check_online_timeout,
            check_agent_online_timeout,
        }
    }

    /// Run the pipeline for one host and publish the resulting status.
    pub async fn process(&self, host: &Host) {
        let mut status = self.evaluate(host).await;
        status.updated_at = Utc::now();
        self.statuses.put(&host.name, status).await;
    }

    /// The pipeline proper: every branch returns the final status record.
    async fn evaluate(&self, host: &Host) -> HostStatus {
        let online = self
            .agent
            .check_online(&host.name, host.online_check_port, self.check_online_timeout)
            .await;
        let mut status = HostStatus {
            online,
            ..HostStatus::default()
        };
        if !status.online {
            // A powered-off host is not an incident.
            info!(host = %host.name, "host is offline");
            return status;
        }

        status.agent_online = self
            .agent
            .check_agent_online(&host.name, host.agent_port, self.check_agent_online_timeout)
            .await;
        if !status.agent_online {
            warn!(host = %host.name, "agent is offline");
            self.notify(format!("[host={}] agent offline", host.name)).await;
            return status;
        }

        let agent_status = match self.agent.status(&host.name, host.agent_port).await {
            Ok(s) => s,
            Err(e) => {
                error!(host = %host.name, error = %e, "failed to get agent status");
                status.error = e.to_string();
                self.notify(format!("[host={}] failed to get agent status", host.name))
                    .await;
                return status;
            }
        };

        status.active_user = agent_status.active_user.clone();
        if agent_status.active_user.is_empty() {
            // Locked workstation; nothing to verify.
            info!(host = %host.name, "no active session");
            return status;
        }

        let recognized = match self.face.recognize_user(agent_status.frame).await {
            Ok(id) => id,
            Err(FaceError::NotPresent) => {
                info!(
                    host = %host.name,
                    user = %agent_status.active_user,
                    "no face in camera frame"
                );
                return status;
            }
            Err(e) => {
                error!(
                    host = %host.name,
                    user = %agent_status.active_user,
                    error = %e,
                    "face recognition failed"
                );
                status.error = e.to_string();
                self.notify(format!(
                    "[host={},user={}] face recognition failed",
                    host.name, agent_status.active_user
                ))
                .await;
                return status;
            }
        };

        let expected = host
            .users
            .as_ref()
            .and_then(|users| users.get(&agent_status.active_user));
        let authorized = !recognized.is_empty() && expected == Some(&recognized);
        if authorized {
            return status;
        }

        error!(
            host = %host.name,
            user = %agent_status.active_user,
            recognized = %recognized,
            "unauthorized user detected"
        );
        // Notify before attempting the logout so operators see the event even
        // if the logout call hangs.
        self.notify(format!(
            "[host={},user={}] unauthorized user detected",
            host.name, agent_status.active_user
        ))
        .await;

        if let Err(e) = self.agent.logout(&host.name, host.agent_port).await {
            error!(
                host = %host.name,
                user = %agent_status.active_user,
                error = %e,
                "failed to log out unauthorized user"
            );
            status.error = e.to_string();
            self.notify(format!(
                "[host={},user={}] failed to log out unauthorized user",
                host.name, agent_status.active_user
            ))
            .await;
        }

        status
    }

    async fn notify(&self, message: String) {
        if self.notifications.send(message).await.is_err() {
            warn!("notification channel closed, dropping message");
        }
    }
}
