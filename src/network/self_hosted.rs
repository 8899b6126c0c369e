//! Self-hosted network node and its file-backed document store
//!
//! A self-hosted node is the peer-to-peer node instance this workspace
//! process creates and owns. Transport binding picks a random ephemeral port
//! with a bounded number of attempts; the secondary websocket address is
//! best-effort and its failure never aborts node startup.
//!
//! The document store persists each named store as one JSON file under the
//! node's datastore directory. Store addresses are content-derived CIDs so
//! they are stable across restarts and unique across nodes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use ed25519_dalek::SigningKey;
use multihash_codetable::{Code, MultihashDigest};
use rand::rngs::OsRng;
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, WharfError};
use crate::store::{document_id, DocumentStore, NetworkNode};

/// Distinct random ports tried before node creation fails fatally
const MAX_BIND_ATTEMPTS: u32 = 5;

/// Ephemeral port range for transport binding
const PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

/// Well-known store name holding the node's addressable-entity index
pub const RESOURCE_INDEX_STORE: &str = "resources";

/// A peer-to-peer node created and owned by this workspace process
pub struct SelfHostedNode {
    data_dir: PathBuf,
    peer_id: String,
    listen_addresses: Vec<String>,
    listeners: Mutex<Vec<TcpListener>>,
    stores: RwLock<HashMap<String, Arc<FsDocumentStore>>>,
    peer_count: AtomicUsize,
    running: AtomicBool,
}

impl SelfHostedNode {
    /// Create the node: prepare its storage directories, generate its peer
    /// identity, and bind transports with bounded retry.
    pub async fn create(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir.join("blocks")).await?;
        tokio::fs::create_dir_all(data_dir.join("datastore")).await?;

        let signing_key = SigningKey::generate(&mut OsRng);
        let peer_id = bs58::encode(signing_key.verifying_key().as_bytes()).into_string();

        let mut listeners = Vec::new();
        let mut listen_addresses = Vec::new();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let port: u16 = rand::thread_rng().gen_range(PORT_RANGE);
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    listen_addresses.push(format!("/ip4/127.0.0.1/tcp/{port}"));
                    listeners.push(listener);

                    // Secondary websocket transport is best effort: a bind
                    // failure here must not abort node startup.
                    let ws_port = port.wrapping_add(1).max(*PORT_RANGE.start());
                    match TcpListener::bind(("127.0.0.1", ws_port)).await {
                        Ok(ws) => {
                            listen_addresses.push(format!("/ip4/127.0.0.1/tcp/{ws_port}/ws"));
                            listeners.push(ws);
                        }
                        Err(e) => {
                            warn!(port = ws_port, error = %e, "Websocket transport bind failed, continuing without");
                        }
                    }
                    info!(port, peer_id = %peer_id, "Self-hosted node transport bound");
                    break;
                }
                Err(e) => {
                    warn!(port, attempts, error = %e, "Transport bind failed");
                    if attempts >= MAX_BIND_ATTEMPTS {
                        return Err(WharfError::TransientNetwork(format!(
                            "failed to bind a listen port after {MAX_BIND_ATTEMPTS} attempts: {e}"
                        )));
                    }
                }
            }
        }

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            peer_id,
            listen_addresses,
            listeners: Mutex::new(listeners),
            stores: RwLock::new(HashMap::new()),
            peer_count: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        })
    }

    /// Record a newly opened store in the node's resource index so discovery
    /// scans can see it. The index itself is never self-registered.
    async fn register_in_index(&self, store: &FsDocumentStore) -> Result<()> {
        let index = self.open_store(RESOURCE_INDEX_STORE).await?;
        if index.get(&store.address()).await?.is_some() {
            return Ok(());
        }
        let now = chrono::Utc::now().to_rfc3339();
        index
            .put(json!({
                "_id": store.address(),
                "kind": "database",
                "name": store.name,
                "sizeBytes": 0,
                "createdAt": now,
                "modifiedAt": now,
            }))
            .await
    }
}

#[async_trait]
impl NetworkNode for SelfHostedNode {
    async fn start(&self) -> Result<()> {
        // Transports are bound at creation; starting an already-running node
        // is a no-op.
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for (_, store) in self.stores.write().await.drain() {
            if let Err(e) = store.close().await {
                warn!(store = %store.name, error = %e, "Error closing store during node stop");
            }
        }
        self.listeners.lock().await.clear();
        info!(peer_id = %self.peer_id, "Self-hosted node stopped");
        Ok(())
    }

    async fn peer_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn listen_addresses(&self) -> Vec<String> {
        self.listen_addresses.clone()
    }

    async fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::SeqCst)
    }

    async fn open_store(&self, name: &str) -> Result<Arc<dyn DocumentStore>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(WharfError::Storage("node is stopped".to_string()));
        }
        if let Some(store) = self.stores.read().await.get(name) {
            return Ok(store.clone());
        }

        let path = self.data_dir.join("datastore").join(format!("{name}.json"));
        let store = Arc::new(FsDocumentStore::open(name, &self.peer_id, &path).await?);
        self.stores
            .write()
            .await
            .insert(name.to_string(), store.clone());

        if name != RESOURCE_INDEX_STORE {
            if let Err(e) = self.register_in_index(&store).await {
                warn!(store = name, error = %e, "Failed to register store in resource index");
            }
        }

        debug!(store = name, address = %store.address(), "Document store opened");
        Ok(store)
    }
}

/// File-backed [`DocumentStore`]: one JSON object per store, whole-file
/// rewrite on every mutation via a temp-file rename.
pub struct FsDocumentStore {
    name: String,
    path: PathBuf,
    address: String,
    records: RwLock<BTreeMap<String, Value>>,
    closed: AtomicBool,
}

impl FsDocumentStore {
    /// Open or create the store file. The address is a CIDv1 (raw codec,
    /// sha2-256) over the owning peer id and store name.
    pub async fn open(name: &str, peer_id: &str, path: &Path) -> Result<Self> {
        let records = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| WharfError::Storage(format!("store file '{name}' corrupt: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let hash = Code::Sha2_256.digest(format!("{peer_id}/{name}").as_bytes());
        let cid = Cid::new_v1(0x55, hash); // 0x55 = raw codec

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            address: format!("/wharfdb/{cid}/{name}"),
            records: RwLock::new(records),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WharfError::Storage(format!("store '{}' closed", self.name)));
        }
        Ok(())
    }

    /// Persist the full record map: write-then-rename so a crash mid-write
    /// never leaves a truncated store file.
    async fn persist(&self, records: &BTreeMap<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check_open()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, document: Value) -> Result<()> {
        self.check_open()?;
        let key = document_id(&document)?;
        let mut records = self.records.write().await;
        records.insert(key, document);
        self.persist(&records).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check_open()?;
        let mut records = self.records.write().await;
        if records.remove(key).is_some() {
            self.persist(&records).await?;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>> {
        self.check_open()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let records = self.records.read().await;
        self.persist(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn node_binds_and_reports_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let node = SelfHostedNode::create(dir.path()).await.unwrap();

        assert_ne!(node.peer_id().await, "Unknown");
        let addrs = node.listen_addresses().await;
        assert!(!addrs.is_empty());
        assert!(addrs[0].starts_with("/ip4/127.0.0.1/tcp/"));
        assert_eq!(node.peer_count().await, 0);

        node.stop().await.unwrap();
        assert!(node.open_store("after-stop").await.is_err());
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");

        {
            let store = FsDocumentStore::open("notes", "peer", &path).await.unwrap();
            store
                .put(json!({ "_id": "a", "body": "first" }))
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let store = FsDocumentStore::open("notes", "peer", &path).await.unwrap();
        let doc = store.get("a").await.unwrap().unwrap();
        assert_eq!(doc["body"], "first");
        // Address derivation is deterministic for the same peer and name
        assert!(store.address().starts_with("/wharfdb/baf"));
        // Close flushed through the write-then-rename path, no temp left over
        assert!(!dir.path().join("notes.json.tmp").exists());
    }

    #[tokio::test]
    async fn put_is_full_record_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");
        let store = FsDocumentStore::open("docs", "peer", &path).await.unwrap();

        store
            .put(json!({ "_id": "d", "a": 1, "b": 2 }))
            .await
            .unwrap();
        store.put(json!({ "_id": "d", "a": 9 })).await.unwrap();

        let doc = store.get("d").await.unwrap().unwrap();
        assert_eq!(doc["a"], 9);
        assert!(doc.get("b").is_none());
    }

    #[tokio::test]
    async fn opened_stores_land_in_resource_index() {
        let dir = tempfile::tempdir().unwrap();
        let node = SelfHostedNode::create(dir.path()).await.unwrap();

        let notes = node.open_store("notes").await.unwrap();
        let index = node.open_store(RESOURCE_INDEX_STORE).await.unwrap();
        let entries = index.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, notes.address());
        assert_eq!(entries[0].1["kind"], "database");

        node.stop().await.unwrap();
    }
}
