//! DID identity registry
//!
//! Identity records live in a document store derived from the local network's
//! storage; the authenticated-identity set is workspace-private memory shared
//! with the permission engine. Signature verification during authentication
//! is an acknowledged stub kept behind an explicit insecure-default flag —
//! the record lookup and status checks are real, the cryptographic check of
//! the presented signature is not.

use std::collections::BTreeMap;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::AuthenticatedSet;
use crate::error::{Result, WharfError};
use crate::store::DocumentStore;

/// Maximum DID id length
pub const MAX_DID_LENGTH: usize = 100;

/// Ceiling on the total metadata payload per identity. Metadata replicates
/// with the document store, so oversized blobs are rejected at the write.
pub const METADATA_BYTE_CEILING: usize = 64 * 1024;

/// Lifecycle state of an identity record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DidStatus {
    Active,
    Revoked,
}

/// A registered decentralized identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidRecord {
    pub id: String,
    /// Credential material: base58 of the identity's Ed25519 verifying key
    pub public_key: String,
    pub status: DidStatus,
    pub created_at: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DidRecord {
    /// Full document for persistence. The store requires the primary key on
    /// every write, so `_id` is always present.
    fn to_document(&self) -> Result<Value> {
        let mut doc = serde_json::to_value(self)?;
        doc.as_object_mut()
            .ok_or_else(|| WharfError::Internal("identity record must serialize to an object".to_string()))?
            .insert("_id".to_string(), Value::String(self.id.clone()));
        Ok(doc)
    }

    fn from_document(doc: &Value) -> Result<Self> {
        serde_json::from_value(doc.clone())
            .map_err(|e| WharfError::Storage(format!("malformed identity record: {e}")))
    }
}

/// Reject ids that are empty, the literal strings "undefined"/"null", overlong,
/// or outside the alphanumeric/hyphen/underscore alphabet.
pub fn validate_did_id(id: &str) -> Result<()> {
    if id.trim().is_empty() || id == "undefined" || id == "null" {
        return Err(WharfError::InvalidArgument(format!(
            "invalid DID identifier: '{id}'"
        )));
    }
    if id.len() > MAX_DID_LENGTH {
        return Err(WharfError::InvalidArgument(format!(
            "DID id cannot exceed {MAX_DID_LENGTH} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WharfError::InvalidArgument(
            "DID id can only contain letters, numbers, hyphens, and underscores".to_string(),
        ));
    }
    Ok(())
}

fn check_metadata_ceiling(metadata: &BTreeMap<String, String>) -> Result<()> {
    let total: usize = metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
    if total > METADATA_BYTE_CEILING {
        return Err(WharfError::InvalidArgument(format!(
            "metadata payload of {total} bytes exceeds the {METADATA_BYTE_CEILING}-byte ceiling"
        )));
    }
    Ok(())
}

/// Create/authenticate/update/delete identity records
pub struct IdentityRegistry {
    store: Arc<dyn DocumentStore>,
    authenticated: AuthenticatedSet,
    admin_id: String,
    /// When false, authentication demands real signature verification, which
    /// is not implemented, so every authenticate call is refused.
    allow_unverified_signatures: bool,
}

impl IdentityRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        authenticated: AuthenticatedSet,
        admin_id: &str,
        allow_unverified_signatures: bool,
    ) -> Self {
        Self {
            store,
            authenticated,
            admin_id: admin_id.to_string(),
            allow_unverified_signatures,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Generate a credential and persist a new Active identity record
    pub async fn create_did(
        &self,
        id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<DidRecord> {
        validate_did_id(id)?;
        check_metadata_ceiling(&metadata)?;
        if self.store.get(id).await?.is_some() {
            return Err(WharfError::AlreadyExists(format!("DID '{id}'")));
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let record = DidRecord {
            id: id.to_string(),
            public_key: bs58::encode(signing_key.verifying_key().as_bytes()).into_string(),
            status: DidStatus::Active,
            created_at: chrono::Utc::now().to_rfc3339(),
            metadata,
        };
        self.store.put(record.to_document()?).await?;

        info!(did = %id, "DID created");
        Ok(record)
    }

    /// Shallow-merge new metadata over the existing map and persist the full
    /// record. Unspecified fields are preserved; `lastModified`/`modifiedBy`
    /// are stamped on every update.
    pub async fn update_did_metadata(
        &self,
        id: &str,
        partial: BTreeMap<String, String>,
    ) -> Result<DidRecord> {
        let doc = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| WharfError::NotFound(format!("DID '{id}'")))?;
        let mut record = DidRecord::from_document(&doc)?;

        for (key, value) in partial {
            record.metadata.insert(key, value);
        }
        record
            .metadata
            .insert("lastModified".to_string(), chrono::Utc::now().to_rfc3339());
        record
            .metadata
            .insert("modifiedBy".to_string(), self.admin_id.clone());
        check_metadata_ceiling(&record.metadata)?;

        self.store.put(record.to_document()?).await?;
        info!(did = %id, "DID metadata updated");
        Ok(record)
    }

    /// Authenticate an identity, adding it to the authenticated set.
    ///
    /// The presented signature is currently not verified cryptographically.
    pub async fn authenticate_did(&self, id: &str, _signature: Option<&str>) -> Result<()> {
        let doc = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| WharfError::NotFound(format!("DID '{id}'")))?;
        let record = DidRecord::from_document(&doc)?;

        if record.status != DidStatus::Active {
            return Err(WharfError::InvalidState(format!("DID '{id}' is not active")));
        }
        if !self.allow_unverified_signatures {
            return Err(WharfError::InvalidArgument(
                "signature verification is required but not implemented".to_string(),
            ));
        }

        self.authenticated.write().await.insert(id.to_string());
        info!(did = %id, "DID authenticated");
        Ok(())
    }

    /// Hard-delete an identity record and evict it from the authenticated set
    pub async fn delete_did(&self, id: &str) -> Result<()> {
        // Literal junk ids are rejected regardless of store state.
        if id.trim().is_empty() || id == "undefined" || id == "null" {
            return Err(WharfError::InvalidArgument(format!(
                "invalid DID identifier: '{id}'"
            )));
        }

        if self.store.get(id).await?.is_none() {
            return Err(WharfError::NotFound(format!("DID '{id}'")));
        }
        self.store.del(id).await?;
        self.authenticated.write().await.remove(id);

        info!(did = %id, "DID deleted");
        Ok(())
    }

    /// List every identity record. Fail-open: listing errors produce an empty
    /// list so the read path stays available. Records with junk ids are
    /// purged as a side effect (self-healing read).
    pub async fn get_all_dids(&self) -> Vec<DidRecord> {
        let entries = match self.store.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list DIDs, returning empty list");
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (key, doc) in entries {
            let id = doc.get("id").and_then(Value::as_str).unwrap_or_default();
            if id.trim().is_empty() || id == "undefined" || id == "null" {
                info!(key = %key, "Purging non-conforming DID record");
                if let Err(e) = self.store.del(&key).await {
                    warn!(key = %key, error = %e, "Failed to purge non-conforming DID record");
                }
                continue;
            }
            match DidRecord::from_document(&doc) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable DID record"),
            }
        }
        records
    }

    pub async fn is_authenticated(&self, id: &str) -> bool {
        self.authenticated.read().await.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio::sync::RwLock;

    use super::*;
    use crate::store::testing::MemoryStore;

    fn registry() -> (IdentityRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new("did-registry"));
        let authenticated: AuthenticatedSet = Arc::new(RwLock::new(HashSet::new()));
        let registry = IdentityRegistry::new(store.clone(), authenticated, "wharf-admin", true);
        (registry, store)
    }

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn created_did_round_trips_through_listing() {
        let (registry, _) = registry();
        registry
            .create_did("alice", meta(&[("displayName", "Alice")]))
            .await
            .unwrap();

        let all = registry.get_all_dids().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "alice");
        assert_eq!(all[0].status, DidStatus::Active);
        assert_eq!(all[0].metadata.get("displayName").unwrap(), "Alice");
        assert!(!all[0].public_key.is_empty());
    }

    #[tokio::test]
    async fn duplicate_and_malformed_ids_are_rejected() {
        let (registry, _) = registry();
        registry.create_did("alice", meta(&[])).await.unwrap();

        assert!(matches!(
            registry.create_did("alice", meta(&[])).await.unwrap_err(),
            WharfError::AlreadyExists(_)
        ));
        for bad in ["", "undefined", "null", "has spaces", "a@b"] {
            assert!(matches!(
                registry.create_did(bad, meta(&[])).await.unwrap_err(),
                WharfError::InvalidArgument(_)
            ));
        }
        let overlong = "x".repeat(101);
        assert!(registry.create_did(&overlong, meta(&[])).await.is_err());
    }

    #[tokio::test]
    async fn metadata_updates_merge_rather_than_replace() {
        let (registry, _) = registry();
        registry.create_did("bob", meta(&[])).await.unwrap();

        registry
            .update_did_metadata("bob", meta(&[("a", "1")]))
            .await
            .unwrap();
        let record = registry
            .update_did_metadata("bob", meta(&[("b", "2")]))
            .await
            .unwrap();

        assert_eq!(record.metadata.get("a").unwrap(), "1");
        assert_eq!(record.metadata.get("b").unwrap(), "2");
        assert!(record.metadata.contains_key("lastModified"));
        assert_eq!(record.metadata.get("modifiedBy").unwrap(), "wharf-admin");
    }

    #[tokio::test]
    async fn update_on_missing_did_is_not_found() {
        let (registry, _) = registry();
        assert!(matches!(
            registry
                .update_did_metadata("ghost", meta(&[]))
                .await
                .unwrap_err(),
            WharfError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn oversized_metadata_is_rejected() {
        let (registry, _) = registry();
        let mut big = BTreeMap::new();
        big.insert("avatar".to_string(), "x".repeat(METADATA_BYTE_CEILING + 1));
        assert!(matches!(
            registry.create_did("carol", big).await.unwrap_err(),
            WharfError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn authentication_requires_active_status() {
        let (registry, store) = registry();
        registry.create_did("dave", meta(&[])).await.unwrap();
        registry.authenticate_did("dave", None).await.unwrap();
        assert!(registry.is_authenticated("dave").await);

        // Flip the stored record to revoked; authentication must refuse it.
        let mut doc = store.get("dave").await.unwrap().unwrap();
        doc["status"] = serde_json::json!("revoked");
        store.put(doc).await.unwrap();
        assert!(matches!(
            registry.authenticate_did("dave", None).await.unwrap_err(),
            WharfError::InvalidState(_)
        ));

        assert!(matches!(
            registry.authenticate_did("ghost", None).await.unwrap_err(),
            WharfError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_rejects_literal_junk_regardless_of_store() {
        let (registry, _) = registry();
        for bad in ["", "undefined", "null"] {
            assert!(matches!(
                registry.delete_did(bad).await.unwrap_err(),
                WharfError::InvalidArgument(_)
            ));
        }
        assert!(matches!(
            registry.delete_did("ghost").await.unwrap_err(),
            WharfError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_evicts_from_authenticated_set() {
        let (registry, _) = registry();
        registry.create_did("erin", meta(&[])).await.unwrap();
        registry.authenticate_did("erin", None).await.unwrap();

        registry.delete_did("erin").await.unwrap();
        assert!(!registry.is_authenticated("erin").await);
        assert!(registry.get_all_dids().await.is_empty());
    }

    #[tokio::test]
    async fn listing_purges_corrupt_records_and_fails_open() {
        let (registry, store) = registry();
        registry.create_did("frank", meta(&[])).await.unwrap();
        store
            .insert_raw("junk", serde_json::json!({ "_id": "junk", "id": "undefined" }))
            .await;

        let all = registry.get_all_dids().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "frank");
        // Self-healing read removed the junk record.
        assert!(store.get("junk").await.unwrap().is_none());

        store
            .fail_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(registry.get_all_dids().await.is_empty());
    }

    #[tokio::test]
    async fn strict_mode_refuses_unverified_signatures() {
        let store = Arc::new(MemoryStore::new("did-registry"));
        let authenticated: AuthenticatedSet = Arc::new(RwLock::new(HashSet::new()));
        let registry = IdentityRegistry::new(store, authenticated, "wharf-admin", false);
        registry.create_did("grace", meta(&[])).await.unwrap();

        assert!(matches!(
            registry.authenticate_did("grace", Some("sig")).await.unwrap_err(),
            WharfError::InvalidArgument(_)
        ));
        assert!(!registry.is_authenticated("grace").await);
    }
}
