//! External daemon detection and attachment
//!
//! An external daemon is a peer-to-peer node process running independently of
//! this workspace, reached over its local HTTP API rather than created by us.
//! Detection probes a fixed set of well-known local API ports; each probe is
//! independently timed out and failures are ignored individually. Probes run
//! in parallel with bounded concurrency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, WharfError};
use crate::store::{DocumentStore, NetworkNode, UNKNOWN_PEER_ID};

/// Probe strategy for daemon detection
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Candidate API ports on the loopback interface
    pub ports: Vec<u16>,
    /// Per-probe timeout
    pub timeout: Duration,
    /// How many probes run concurrently
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ports: vec![5001, 5002, 5003, 5004, 5005],
            timeout: Duration::from_secs(2),
            concurrency: 4,
        }
    }
}

/// Identity response from a daemon's API
#[derive(Debug, Clone, Deserialize)]
struct DaemonIdentity {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Addresses", default)]
    addresses: Vec<String>,
}

/// A detected daemon, ready to be attached as a network
#[derive(Debug, Clone)]
pub struct DetectedDaemon {
    pub port: u16,
    pub api_url: String,
    pub peer_id: String,
    pub addresses: Vec<String>,
}

/// Probe the configured ports for running daemons.
///
/// Best effort: unreachable ports and malformed responses are skipped, never
/// surfaced. Results come back in completion order.
pub async fn detect_daemons(client: &reqwest::Client, config: &ProbeConfig) -> Vec<DetectedDaemon> {
    let found: Vec<DetectedDaemon> = stream::iter(config.ports.clone())
        .map(|port| {
            let client = client.clone();
            let timeout = config.timeout;
            async move { probe_port(&client, port, timeout).await }
        })
        .buffer_unordered(config.concurrency.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;

    if !found.is_empty() {
        info!(count = found.len(), "Detected external daemons");
    }
    found
}

async fn probe_port(client: &reqwest::Client, port: u16, timeout: Duration) -> Option<DetectedDaemon> {
    let api_url = format!("http://127.0.0.1:{port}");
    let response = client
        .post(format!("{api_url}/api/v0/id"))
        .timeout(timeout)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let identity: DaemonIdentity = response.json().await.ok()?;

    debug!(port, peer_id = %identity.id, "Daemon responded to probe");
    Some(DetectedDaemon {
        port,
        api_url,
        peer_id: identity.id,
        addresses: identity.addresses,
    })
}

/// An attached external daemon, exposed through the same [`NetworkNode`]
/// surface as self-hosted nodes so callers never branch on kind.
pub struct ExternalDaemonNode {
    api_url: String,
    client: reqwest::Client,
    timeout: Duration,
    identity: RwLock<DaemonIdentity>,
}

impl ExternalDaemonNode {
    /// Attach to a detected daemon
    pub fn from_detected(client: reqwest::Client, daemon: DetectedDaemon) -> Self {
        Self {
            api_url: daemon.api_url,
            client,
            timeout: Duration::from_secs(2),
            identity: RwLock::new(DaemonIdentity {
                id: daemon.peer_id,
                addresses: daemon.addresses,
            }),
        }
    }

    /// Attach to a daemon by API URL, verifying it answers an identity call
    pub async fn attach(client: reqwest::Client, api_url: &str, timeout: Duration) -> Result<Self> {
        let response = client
            .post(format!("{api_url}/api/v0/id"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                WharfError::TransientNetwork(format!("daemon at {api_url} unreachable: {e}"))
            })?;
        if !response.status().is_success() {
            return Err(WharfError::TransientNetwork(format!(
                "daemon at {api_url} answered {}",
                response.status()
            )));
        }
        let identity: DaemonIdentity = response.json().await.map_err(|e| {
            WharfError::TransientNetwork(format!("daemon at {api_url} sent a malformed identity: {e}"))
        })?;

        Ok(Self {
            api_url: api_url.to_string(),
            client,
            timeout,
            identity: RwLock::new(identity),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl NetworkNode for ExternalDaemonNode {
    async fn start(&self) -> Result<()> {
        // The daemon's lifecycle belongs to its own process.
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Detaching must not stop a daemon we do not own.
        Ok(())
    }

    async fn peer_id(&self) -> String {
        let id = self.identity.read().await.id.clone();
        if id.is_empty() {
            UNKNOWN_PEER_ID.to_string()
        } else {
            id
        }
    }

    async fn listen_addresses(&self) -> Vec<String> {
        self.identity.read().await.addresses.clone()
    }

    async fn peer_count(&self) -> usize {
        // Best effort: an unreachable daemon reports zero peers.
        let response = match self
            .client
            .post(format!("{}/api/v0/swarm/peers", self.api_url))
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(_) => return 0,
        };
        let body: Value = match response.json().await {
            Ok(b) => b,
            Err(_) => return 0,
        };
        body.get("Peers")
            .and_then(Value::as_array)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    async fn open_store(&self, name: &str) -> Result<Arc<dyn DocumentStore>> {
        // Daemons expose raw block storage only; they carry no document layer
        // this workspace can enumerate.
        Err(WharfError::Storage(format!(
            "external daemon at {} exposes no document store (requested '{name}')",
            self.api_url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detection_survives_unreachable_ports() {
        // Nothing listens on these ports; every probe must fail quietly.
        let config = ProbeConfig {
            ports: vec![1, 2, 3],
            timeout: Duration::from_millis(200),
            concurrency: 4,
        };
        let client = reqwest::Client::new();
        let found = detect_daemons(&client, &config).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn attach_fails_with_transient_error_when_unreachable() {
        let client = reqwest::Client::new();
        let result = ExternalDaemonNode::attach(
            client,
            "http://127.0.0.1:1",
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(WharfError::TransientNetwork(_))));
    }

    #[tokio::test]
    async fn attached_daemon_presents_uniform_node_surface() {
        let node = ExternalDaemonNode::from_detected(
            reqwest::Client::new(),
            DetectedDaemon {
                port: 5001,
                api_url: "http://127.0.0.1:5001".to_string(),
                peer_id: "QmProbe".to_string(),
                addresses: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
            },
        );

        assert_eq!(node.peer_id().await, "QmProbe");
        assert_eq!(node.listen_addresses().await.len(), 1);
        assert!(node.open_store("resources").await.is_err());
    }
}
