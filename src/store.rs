//! Collaborator traits for the block-store/p2p node and the document store
//!
//! The workspace core never talks to a concrete networking stack or database
//! engine. It depends on these two traits; the composition root wires the
//! file-backed implementations in `network::self_hosted`, and tests wire
//! in-memory mocks. This replaces the original runtime is-it-loaded-yet
//! checks with a single injection boundary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, WharfError};

/// Placeholder peer id reported before a node's networking stack has settled
pub const UNKNOWN_PEER_ID: &str = "Unknown";

/// One peer-to-peer network attachment, self-hosted or external.
///
/// Implementations must never block indefinitely: every method either
/// completes against local state or wraps remote calls in its own timeout.
#[async_trait]
pub trait NetworkNode: Send + Sync {
    /// Bring the node's transports online. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Stop the node and release its transports. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Peer identifier, or [`UNKNOWN_PEER_ID`] until the stack is ready
    async fn peer_id(&self) -> String;

    /// Multiaddress strings the node is listening on
    async fn listen_addresses(&self) -> Vec<String>;

    /// Number of currently connected peers
    async fn peer_count(&self) -> usize;

    /// Open (or create) a named document store backed by this node's storage
    async fn open_store(&self, name: &str) -> Result<Arc<dyn DocumentStore>>;
}

/// Append-only replicated document database, keyed by an `_id` string.
///
/// `put` is a full-record replace: the underlying engine does not support
/// partial-field updates, so callers must read-modify-write whole documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stable address of this store (content-derived, `/wharfdb/...`)
    fn address(&self) -> String;

    /// Fetch a document by key
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a full document. The document must carry a non-empty string
    /// `_id` field; documents without one are rejected.
    async fn put(&self, document: Value) -> Result<()>;

    /// Delete a document by key. Deleting a missing key is a no-op.
    async fn del(&self, key: &str) -> Result<()>;

    /// Snapshot of all `(key, document)` pairs
    async fn entries(&self) -> Result<Vec<(String, Value)>>;

    /// Flush and close the store. Further operations fail with `Storage`.
    async fn close(&self) -> Result<()>;
}

/// Extract the primary key from a document, enforcing the `_id` contract
pub fn document_id(document: &Value) -> Result<String> {
    match document.get("_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(WharfError::InvalidArgument(
            "document requires a non-empty string _id field".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory document store for unit tests

    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::RwLock;

    use super::*;

    /// In-memory [`DocumentStore`] with optional scripted failures
    pub struct MemoryStore {
        name: String,
        records: RwLock<BTreeMap<String, Value>>,
        closed: AtomicBool,
        /// When true, every read errors (exercises fail-open/fail-closed paths)
        pub fail_reads: AtomicBool,
        pub put_count: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                records: RwLock::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
                fail_reads: AtomicBool::new(false),
                put_count: AtomicUsize::new(0),
            }
        }

        /// Insert a raw record bypassing `_id` validation, for corrupt-data tests
        pub async fn insert_raw(&self, key: &str, value: Value) {
            self.records.write().await.insert(key.to_string(), value);
        }

        fn check_open(&self) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(WharfError::Storage(format!("store '{}' closed", self.name)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        fn address(&self) -> String {
            format!("/wharfdb/test/{}", self.name)
        }

        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.check_open()?;
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(WharfError::Storage("scripted read failure".to_string()));
            }
            Ok(self.records.read().await.get(key).cloned())
        }

        async fn put(&self, document: Value) -> Result<()> {
            self.check_open()?;
            let key = document_id(&document)?;
            self.put_count.fetch_add(1, Ordering::SeqCst);
            self.records.write().await.insert(key, document);
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<()> {
            self.check_open()?;
            self.records.write().await.remove(key);
            Ok(())
        }

        async fn entries(&self) -> Result<Vec<(String, Value)>> {
            self.check_open()?;
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(WharfError::Storage("scripted read failure".to_string()));
            }
            Ok(self
                .records
                .read()
                .await
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn put_requires_id_field() {
        let store = MemoryStore::new("t");
        let err = store
            .put(serde_json::json!({ "name": "no id" }))
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = MemoryStore::new("t");
        store.close().await.unwrap();
        assert!(store.get("x").await.is_err());
    }
}
