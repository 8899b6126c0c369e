//! Identity/permission subsystem lifecycle
//!
//! The subsystem is a small state machine:
//!
//! ```text
//! Uninitialized → Initializing → { Ready | Degraded }
//! ```
//!
//! Bootstrap opens the identity and ACL stores from the local network node's
//! storage. Because that storage may not be settled yet, bootstrap runs under
//! a bounded retry policy; exhausting the retries lands in `Degraded`, which
//! is terminal for this workspace run. In `Degraded`, mutation operations
//! fail fast with `NotInitialized` and listing operations fail open to empty
//! lists — nothing hangs, nothing crashes.

pub mod acl;
pub mod identity;

pub use acl::{AclAction, AclRule, PermissionEngine, MAX_RESOURCE_LENGTH, WILDCARD_DID};
pub use identity::{
    DidRecord, DidStatus, IdentityRegistry, MAX_DID_LENGTH, METADATA_BYTE_CEILING,
};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::{Result, WharfError};
use crate::store::{DocumentStore, NetworkNode};

/// Identity ids currently holding an authenticated session, shared between
/// the identity registry and the permission engine
pub type AuthenticatedSet = Arc<RwLock<HashSet<String>>>;

/// Store name for identity records
pub const DID_STORE: &str = "did-registry";
/// Store name for ACL rules
pub const ACL_STORE: &str = "acl-registry";

/// Lifecycle state of the subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityState {
    Uninitialized,
    Initializing,
    Ready,
    /// Terminal for this workspace run; only a restart recovers
    Degraded,
}

/// Bounded-retry schedule for bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapPolicy {
    /// Total attempts (first try plus retries)
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(3),
        }
    }
}

struct SecurityInner {
    identities: IdentityRegistry,
    permissions: PermissionEngine,
    did_store: Arc<dyn DocumentStore>,
    acl_store: Arc<dyn DocumentStore>,
}

/// The DID/ACL subsystem owner
pub struct SecuritySubsystem {
    state: RwLock<SecurityState>,
    inner: RwLock<Option<SecurityInner>>,
    admin_id: String,
    allow_unverified_signatures: bool,
}

impl SecuritySubsystem {
    pub fn new(admin_id: &str, allow_unverified_signatures: bool) -> Self {
        Self {
            state: RwLock::new(SecurityState::Uninitialized),
            inner: RwLock::new(None),
            admin_id: admin_id.to_string(),
            allow_unverified_signatures,
        }
    }

    pub async fn state(&self) -> SecurityState {
        *self.state.read().await
    }

    pub async fn is_ready(&self) -> bool {
        self.state().await == SecurityState::Ready
    }

    /// The bootstrap admin identity, which bypasses permission checks
    pub fn admin_id(&self) -> &str {
        &self.admin_id
    }

    /// One bootstrap attempt: open both stores from the node's storage and
    /// wire the registries around a shared authenticated set. The admin
    /// identity starts authenticated.
    async fn bootstrap_once(&self, node: &Arc<dyn NetworkNode>) -> Result<()> {
        let did_store = node.open_store(DID_STORE).await?;
        let acl_store = node.open_store(ACL_STORE).await?;

        let authenticated: AuthenticatedSet = Arc::new(RwLock::new(HashSet::new()));
        authenticated.write().await.insert(self.admin_id.clone());

        let identities = IdentityRegistry::new(
            did_store.clone(),
            authenticated.clone(),
            &self.admin_id,
            self.allow_unverified_signatures,
        );
        let permissions = PermissionEngine::new(acl_store.clone(), authenticated, &self.admin_id);

        *self.inner.write().await = Some(SecurityInner {
            identities,
            permissions,
            did_store,
            acl_store,
        });
        Ok(())
    }

    /// Run bootstrap under the retry policy. Returns the terminal state
    /// (`Ready` or `Degraded`); never an error — exhaustion degrades.
    pub async fn bootstrap_with_retry(
        &self,
        node: Arc<dyn NetworkNode>,
        policy: &BootstrapPolicy,
    ) -> SecurityState {
        *self.state.write().await = SecurityState::Initializing;

        for attempt in 1..=policy.max_attempts {
            match self.bootstrap_once(&node).await {
                Ok(()) => {
                    *self.state.write().await = SecurityState::Ready;
                    info!(attempt, admin = %self.admin_id, "Security subsystem ready");
                    return SecurityState::Ready;
                }
                Err(e) => {
                    error!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Security subsystem bootstrap failed"
                    );
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        *self.state.write().await = SecurityState::Degraded;
        warn!("Security subsystem degraded after exhausting bootstrap retries; identity and permission operations are unavailable until restart");
        SecurityState::Degraded
    }

    /// Close both stores. Each failure is logged and never aborts the
    /// sequence; the subsystem returns to `Uninitialized`.
    pub async fn close(&self) {
        if let Some(inner) = self.inner.write().await.take() {
            if let Err(e) = inner.did_store.close().await {
                error!(error = %e, "Error closing DID store");
            }
            if let Err(e) = inner.acl_store.close().await {
                error!(error = %e, "Error closing ACL store");
            }
        }
        *self.state.write().await = SecurityState::Uninitialized;
    }

    fn not_initialized(&self) -> WharfError {
        WharfError::NotInitialized(
            "DID/ACL subsystem is not available for this workspace run".to_string(),
        )
    }

    // --- Identity operations -------------------------------------------------

    pub async fn create_did(
        &self,
        id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<DidRecord> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => inner.identities.create_did(id, metadata).await,
            None => Err(self.not_initialized()),
        }
    }

    pub async fn update_did_metadata(
        &self,
        id: &str,
        partial: BTreeMap<String, String>,
    ) -> Result<DidRecord> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => inner.identities.update_did_metadata(id, partial).await,
            None => Err(self.not_initialized()),
        }
    }

    pub async fn authenticate_did(&self, id: &str, signature: Option<&str>) -> Result<()> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => inner.identities.authenticate_did(id, signature).await,
            None => Err(self.not_initialized()),
        }
    }

    pub async fn delete_did(&self, id: &str) -> Result<()> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => inner.identities.delete_did(id).await,
            None => Err(self.not_initialized()),
        }
    }

    /// Fail-open: an unavailable subsystem lists as empty, not as an error
    pub async fn get_all_dids(&self) -> Vec<DidRecord> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => inner.identities.get_all_dids().await,
            None => {
                warn!("DID registry not available, returning empty list");
                Vec::new()
            }
        }
    }

    // --- Permission operations -----------------------------------------------

    pub async fn check_permission(&self, did: &str, resource: &str, action: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => Ok(inner.permissions.check_permission(did, resource, action).await),
            None => Err(self.not_initialized()),
        }
    }

    pub async fn grant_permission(
        &self,
        did: &str,
        resource: &str,
        action: &str,
        granter: Option<&str>,
    ) -> Result<()> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => {
                inner
                    .permissions
                    .grant_permission(did, resource, action, granter)
                    .await
            }
            None => Err(self.not_initialized()),
        }
    }

    pub async fn revoke_permission(
        &self,
        did: &str,
        resource: &str,
        action: &str,
        revoker: Option<&str>,
    ) -> Result<()> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => {
                inner
                    .permissions
                    .revoke_permission(did, resource, action, revoker)
                    .await
            }
            None => Err(self.not_initialized()),
        }
    }

    /// Fail-open, same rationale as [`SecuritySubsystem::get_all_dids`]
    pub async fn get_all_acls(&self) -> Vec<AclRule> {
        let inner = self.inner.read().await;
        match inner.as_ref() {
            Some(inner) => inner.permissions.get_all_acls().await,
            None => {
                warn!("ACL registry not available, returning empty list");
                Vec::new()
            }
        }
    }
}
