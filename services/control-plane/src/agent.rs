//! Agent reconfiguration channel.
//!
//! Agents are told about rate changes and migrations with a small JSON
//! message. Delivery is best effort: failures are reported to the caller,
//! which logs them and moves on.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use arha_reconcile::{ServiceInstance, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where an agent listens for reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentAddr {
    pub ip: String,
    pub port: u16,
}

impl AgentAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }
}

impl From<&Subscription> for AgentAddr {
    fn from(sub: &Subscription) -> Self {
        Self::new(sub.agent_ip.clone(), sub.agent_port)
    }
}

impl fmt::Display for AgentAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Reconfiguration message.
///
/// Rate-only updates leave `ip` and `port` empty; the agent keeps its current
/// instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceChange {
    pub servicename: String,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub frequency: f64,
}

impl ServiceChange {
    /// Same instance, new rate.
    pub fn rate_only(instance: &ServiceInstance) -> Self {
        Self {
            servicename: instance.service_type.clone(),
            ip: None,
            port: None,
            frequency: instance.current_frequency,
        }
    }

    /// Move to `instance` at its current rate.
    pub fn relocate(instance: &ServiceInstance) -> Self {
        Self {
            servicename: instance.service_type.clone(),
            ip: Some(instance.host_ip.clone()),
            port: Some(instance.host_port),
            frequency: instance.current_frequency,
        }
    }
}

#[async_trait]
pub trait AgentChannel: Send + Sync {
    async fn notify(&self, agent: &AgentAddr, change: &ServiceChange) -> Result<()>;
}

/// POSTs changes to `http://<agent>/servicechange`.
pub struct HttpAgentChannel {
    client: reqwest::Client,
}

impl HttpAgentChannel {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build agent HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AgentChannel for HttpAgentChannel {
    async fn notify(&self, agent: &AgentAddr, change: &ServiceChange) -> Result<()> {
        let url = format!("http://{}/servicechange", agent);
        debug!(agent = %agent, frequency = change.frequency, "Notifying agent");

        let response = self
            .client
            .post(&url)
            .json(change)
            .send()
            .await
            .with_context(|| format!("Failed to reach agent {agent}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Agent {} rejected service change: {} - {}", agent, status, body);
        }

        Ok(())
    }
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingAgentChannel {
    sent: Mutex<Vec<(AgentAddr, ServiceChange)>>,
    unreachable: Mutex<Vec<AgentAddr>>,
}

impl RecordingAgentChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail deliveries to `agent`.
    pub fn set_unreachable(&self, agent: AgentAddr) {
        self.unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(agent);
    }

    pub fn sent(&self) -> Vec<(AgentAddr, ServiceChange)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl AgentChannel for RecordingAgentChannel {
    async fn notify(&self, agent: &AgentAddr, change: &ServiceChange) -> Result<()> {
        let unreachable = self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(agent);
        if unreachable {
            anyhow::bail!("agent {agent} unreachable");
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((agent.clone(), change.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use arha_reconcile::FrequencyLimit;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn instance() -> ServiceInstance {
        ServiceInstance {
            pod_ip: "10.244.0.7".to_string(),
            host_ip: "192.168.1.10".to_string(),
            host_port: 30501,
            node_name: "gpu-a".to_string(),
            service_type: "pose".to_string(),
            current_connection: 2,
            frequency_limit: FrequencyLimit::new(20.0, 10.0),
            current_frequency: 17.5,
            workload_limit: 35.0,
        }
    }

    #[test]
    fn test_rate_only_message_has_null_target() {
        let json = serde_json::to_value(ServiceChange::rate_only(&instance())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"servicename": "pose", "ip": null, "port": null, "frequency": 17.5})
        );
    }

    #[tokio::test]
    async fn test_http_channel_posts_service_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servicechange"))
            .and(body_json(serde_json::json!({
                "servicename": "pose",
                "ip": "192.168.1.10",
                "port": 30501,
                "frequency": 17.5
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = HttpAgentChannel::new(Duration::from_secs(1)).unwrap();
        let agent = AgentAddr::new("127.0.0.1", server.address().port());

        channel
            .notify(&agent, &ServiceChange::relocate(&instance()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_channel_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servicechange"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let channel = HttpAgentChannel::new(Duration::from_secs(1)).unwrap();
        let agent = AgentAddr::new("127.0.0.1", server.address().port());

        let err = channel
            .notify(&agent, &ServiceChange::rate_only(&instance()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
