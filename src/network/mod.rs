//! Network registry: the set of active peer-to-peer network attachments
//!
//! The registry owns every network the workspace knows about, self-hosted or
//! attached daemon, and presents them through one descriptor shape. Callers
//! branch on `kind` for display only; everything else goes through the
//! uniform [`NetworkNode`] surface. Iteration order is insertion order, which
//! fixes the concatenation order of discovery scans.

pub mod daemon;
pub mod self_hosted;

pub use daemon::{detect_daemons, DetectedDaemon, ExternalDaemonNode, ProbeConfig};
pub use self_hosted::{FsDocumentStore, SelfHostedNode, RESOURCE_INDEX_STORE};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, WharfError};
use crate::store::{NetworkNode, UNKNOWN_PEER_ID};

/// Whether this workspace created the node or attached to a running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkKind {
    SelfHosted,
    ExternalDaemon,
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkKind::SelfHosted => write!(f, "self-hosted"),
            NetworkKind::ExternalDaemon => write!(f, "external-daemon"),
        }
    }
}

/// Connection state reported in descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Uniform view of one network attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub id: String,
    pub name: String,
    pub kind: NetworkKind,
    pub status: NetworkStatus,
    pub peer_id: String,
    pub listen_addresses: Vec<String>,
    pub peer_count: usize,
}

struct NetworkEntry {
    id: String,
    kind: NetworkKind,
    node: Arc<dyn NetworkNode>,
}

impl NetworkEntry {
    /// Display name: capitalised id for self-hosted nodes, the id as-is for
    /// attached daemons (their ids already carry the port).
    fn display_name(&self) -> String {
        match self.kind {
            NetworkKind::SelfHosted => {
                let mut chars = self.id.chars();
                match chars.next() {
                    Some(first) => format!("{}{} Node", first.to_uppercase(), chars.as_str()),
                    None => "Node".to_string(),
                }
            }
            NetworkKind::ExternalDaemon => format!("Daemon ({})", self.id),
        }
    }

    async fn describe(&self) -> NetworkDescriptor {
        let peer_id = self.node.peer_id().await;
        let status = if peer_id == UNKNOWN_PEER_ID {
            NetworkStatus::Connecting
        } else {
            NetworkStatus::Connected
        };
        NetworkDescriptor {
            id: self.id.clone(),
            name: self.display_name(),
            kind: self.kind,
            status,
            peer_id,
            listen_addresses: self.node.listen_addresses().await,
            peer_count: self.node.peer_count().await,
        }
    }
}

/// Insertion-ordered set of active networks
pub struct NetworkRegistry {
    entries: RwLock<Vec<NetworkEntry>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a network under a unique id
    pub async fn insert(
        &self,
        id: &str,
        kind: NetworkKind,
        node: Arc<dyn NetworkNode>,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.id == id) {
            return Err(WharfError::AlreadyExists(format!("network '{id}'")));
        }
        entries.push(NetworkEntry {
            id: id.to_string(),
            kind,
            node,
        });
        Ok(())
    }

    /// Remove and return a network's node, or `NotFound`
    pub async fn remove(&self, id: &str) -> Result<Arc<dyn NetworkNode>> {
        let mut entries = self.entries.write().await;
        match entries.iter().position(|e| e.id == id) {
            Some(idx) => Ok(entries.remove(idx).node),
            None => Err(WharfError::NotFound(format!("network '{id}'"))),
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.iter().any(|e| e.id == id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn NetworkNode>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.node.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// `(id, node)` pairs in insertion order, for discovery scans
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn NetworkNode>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| (e.id.clone(), e.node.clone()))
            .collect()
    }

    /// Uniform descriptors for every registered network, insertion order
    pub async fn descriptors(&self) -> Vec<NetworkDescriptor> {
        let entries = self.entries.read().await;
        let mut descriptors = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            descriptors.push(entry.describe().await);
        }
        descriptors
    }

    pub async fn describe(&self, id: &str) -> Option<NetworkDescriptor> {
        let entries = self.entries.read().await;
        match entries.iter().find(|e| e.id == id) {
            Some(entry) => Some(entry.describe().await),
            None => None,
        }
    }

    /// Drain every entry for shutdown, in insertion order
    pub async fn take_all(&self) -> Vec<(String, Arc<dyn NetworkNode>)> {
        self.entries
            .write()
            .await
            .drain(..)
            .map(|e| (e.id, e.node))
            .collect()
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use async_trait::async_trait;

    struct StubNode {
        peer_id: String,
    }

    #[async_trait]
    impl NetworkNode for StubNode {
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn peer_id(&self) -> String {
            self.peer_id.clone()
        }
        async fn listen_addresses(&self) -> Vec<String> {
            vec!["/ip4/127.0.0.1/tcp/4001".to_string()]
        }
        async fn peer_count(&self) -> usize {
            3
        }
        async fn open_store(&self, _name: &str) -> Result<Arc<dyn DocumentStore>> {
            Err(WharfError::Storage("stub".to_string()))
        }
    }

    fn stub(peer_id: &str) -> Arc<dyn NetworkNode> {
        Arc::new(StubNode {
            peer_id: peer_id.to_string(),
        })
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let registry = NetworkRegistry::new();
        registry
            .insert("local", NetworkKind::SelfHosted, stub("a"))
            .await
            .unwrap();
        let err = registry
            .insert("local", NetworkKind::SelfHosted, stub("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn descriptors_preserve_insertion_order() {
        let registry = NetworkRegistry::new();
        registry
            .insert("local", NetworkKind::SelfHosted, stub("p1"))
            .await
            .unwrap();
        registry
            .insert("daemon-5001", NetworkKind::ExternalDaemon, stub("p2"))
            .await
            .unwrap();

        let descriptors = registry.descriptors().await;
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].id, "local");
        assert_eq!(descriptors[0].name, "Local Node");
        assert_eq!(descriptors[0].status, NetworkStatus::Connected);
        assert_eq!(descriptors[1].name, "Daemon (daemon-5001)");
        assert_eq!(descriptors[1].peer_count, 3);
    }

    #[tokio::test]
    async fn unknown_peer_id_reads_as_connecting() {
        let registry = NetworkRegistry::new();
        registry
            .insert("warming", NetworkKind::SelfHosted, stub(UNKNOWN_PEER_ID))
            .await
            .unwrap();
        let descriptor = registry.describe("warming").await.unwrap();
        assert_eq!(descriptor.status, NetworkStatus::Connecting);
    }

    #[tokio::test]
    async fn remove_missing_network_is_not_found() {
        let registry = NetworkRegistry::new();
        assert!(matches!(
            registry.remove("ghost").await,
            Err(WharfError::NotFound(_))
        ));
    }
}
