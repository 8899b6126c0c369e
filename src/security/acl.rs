//! ACL permission engine
//!
//! Rules are keyed `resource:action` in a document store. Checks are
//! fail-closed (any lookup failure denies), listings are fail-open (errors
//! yield an empty list), and the workspace's bootstrap admin identity
//! bypasses every check. Rules are created lazily on first grant and emptied
//! by revokes, never deleted.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::AuthenticatedSet;
use crate::error::{Result, WharfError};
use crate::store::DocumentStore;

/// Maximum resource name length
pub const MAX_RESOURCE_LENGTH: usize = 200;

/// Sentinel identity granting an action to everyone in the authenticated set
pub const WILDCARD_DID: &str = "*";

/// The closed set of grantable actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Read,
    Write,
    Admin,
    Grant,
    Revoke,
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclAction::Read => write!(f, "read"),
            AclAction::Write => write!(f, "write"),
            AclAction::Admin => write!(f, "admin"),
            AclAction::Grant => write!(f, "grant"),
            AclAction::Revoke => write!(f, "revoke"),
        }
    }
}

impl FromStr for AclAction {
    type Err = WharfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(AclAction::Read),
            "write" => Ok(AclAction::Write),
            "admin" => Ok(AclAction::Admin),
            "grant" => Ok(AclAction::Grant),
            "revoke" => Ok(AclAction::Revoke),
            other => Err(WharfError::InvalidArgument(format!(
                "unknown ACL action: '{other}'"
            ))),
        }
    }
}

/// Permission grant set for one `(resource, action)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRule {
    pub resource: String,
    pub action: AclAction,
    /// Identity ids, possibly including the wildcard `"*"`. An empty set
    /// means "nobody"; the rule itself persists.
    pub allowed_dids: Vec<String>,
    pub created_at: String,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
}

impl AclRule {
    /// Composite primary key for the rule
    pub fn key(resource: &str, action: AclAction) -> String {
        format!("{resource}:{action}")
    }

    fn to_document(&self) -> Result<Value> {
        let mut doc = serde_json::to_value(self)?;
        doc.as_object_mut()
            .ok_or_else(|| WharfError::Internal("ACL rule must serialize to an object".to_string()))?
            .insert(
                "_id".to_string(),
                Value::String(Self::key(&self.resource, self.action)),
            );
        Ok(doc)
    }

    fn from_document(doc: &Value) -> Result<Self> {
        serde_json::from_value(doc.clone())
            .map_err(|e| WharfError::Storage(format!("malformed ACL rule: {e}")))
    }
}

fn validate_resource(resource: &str) -> Result<()> {
    if resource.trim().is_empty() {
        return Err(WharfError::InvalidArgument("resource is required".to_string()));
    }
    if resource.len() > MAX_RESOURCE_LENGTH {
        return Err(WharfError::InvalidArgument(format!(
            "resource cannot exceed {MAX_RESOURCE_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_grant_target(did: &str) -> Result<()> {
    if did == WILDCARD_DID {
        return Ok(());
    }
    if did.trim().is_empty() {
        return Err(WharfError::InvalidArgument("DID is required".to_string()));
    }
    if did.len() > 100 {
        return Err(WharfError::InvalidArgument(
            "DID cannot exceed 100 characters".to_string(),
        ));
    }
    Ok(())
}

/// Grant/revoke/check permission rules
pub struct PermissionEngine {
    store: Arc<dyn DocumentStore>,
    authenticated: AuthenticatedSet,
    admin_id: String,
}

impl PermissionEngine {
    pub fn new(store: Arc<dyn DocumentStore>, authenticated: AuthenticatedSet, admin_id: &str) -> Self {
        Self {
            store,
            authenticated,
            admin_id: admin_id.to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Decide whether `did` may perform `action` on `resource`.
    ///
    /// Order matters: admin bypass is unconditional, authentication precedes
    /// authorization, absent rules default-deny, and every internal failure
    /// is treated as a denial.
    pub async fn check_permission(&self, did: &str, resource: &str, action: &str) -> bool {
        if did == self.admin_id {
            return true;
        }
        let action = match action.parse::<AclAction>() {
            Ok(action) => action,
            Err(_) => return false,
        };
        if !self.authenticated.read().await.contains(did) {
            return false;
        }

        let doc = match self.store.get(&AclRule::key(resource, action)).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return false,
            Err(e) => {
                warn!(resource, %action, error = %e, "ACL lookup failed, denying");
                return false;
            }
        };
        match AclRule::from_document(&doc) {
            Ok(rule) => {
                rule.allowed_dids.iter().any(|d| d == did)
                    || rule.allowed_dids.iter().any(|d| d == WILDCARD_DID)
            }
            Err(e) => {
                warn!(resource, %action, error = %e, "Unreadable ACL rule, denying");
                false
            }
        }
    }

    /// Add `did` to the rule for `(resource, action)`, creating the rule on
    /// first grant. Idempotent: granting an existing member changes nothing.
    pub async fn grant_permission(
        &self,
        did: &str,
        resource: &str,
        action: &str,
        granter: Option<&str>,
    ) -> Result<()> {
        let action: AclAction = action.parse()?;
        validate_resource(resource)?;
        validate_grant_target(did)?;

        let granter = granter.unwrap_or(&self.admin_id).to_string();
        if granter != self.admin_id
            && !self
                .check_permission(&granter, resource, &AclAction::Grant.to_string())
                .await
        {
            return Err(WharfError::InsufficientPermission(format!(
                "'{granter}' may not grant on '{resource}'"
            )));
        }

        let key = AclRule::key(resource, action);
        let mut rule = match self.store.get(&key).await? {
            Some(doc) => AclRule::from_document(&doc)?,
            None => AclRule {
                resource: resource.to_string(),
                action,
                allowed_dids: Vec::new(),
                created_at: chrono::Utc::now().to_rfc3339(),
                created_by: granter.clone(),
                modified_at: None,
                modified_by: None,
            },
        };

        if !rule.allowed_dids.iter().any(|d| d == did) {
            rule.allowed_dids.push(did.to_string());
            rule.modified_at = Some(chrono::Utc::now().to_rfc3339());
            rule.modified_by = Some(granter.clone());
            self.store.put(rule.to_document()?).await?;
            info!(did, resource, %action, granter = %granter, "Permission granted");
        }
        Ok(())
    }

    /// Remove `did` from the rule for `(resource, action)`. Removing a
    /// non-member (or touching an absent rule) is a no-op. The wildcard is
    /// removed only as the literal `"*"` member, never as "remove everyone".
    pub async fn revoke_permission(
        &self,
        did: &str,
        resource: &str,
        action: &str,
        revoker: Option<&str>,
    ) -> Result<()> {
        let action: AclAction = action.parse()?;
        validate_resource(resource)?;
        validate_grant_target(did)?;

        let revoker = revoker.unwrap_or(&self.admin_id).to_string();
        if revoker != self.admin_id
            && !self
                .check_permission(&revoker, resource, &AclAction::Revoke.to_string())
                .await
        {
            return Err(WharfError::InsufficientPermission(format!(
                "'{revoker}' may not revoke on '{resource}'"
            )));
        }

        let key = AclRule::key(resource, action);
        let mut rule = match self.store.get(&key).await? {
            Some(doc) => AclRule::from_document(&doc)?,
            None => return Ok(()),
        };

        if rule.allowed_dids.iter().any(|d| d == did) {
            rule.allowed_dids.retain(|d| d != did);
            rule.modified_at = Some(chrono::Utc::now().to_rfc3339());
            rule.modified_by = Some(revoker.clone());
            self.store.put(rule.to_document()?).await?;
            info!(did, resource, %action, revoker = %revoker, "Permission revoked");
        }
        Ok(())
    }

    /// List every rule. Fail-open to an empty list, same rationale as the
    /// identity listing.
    pub async fn get_all_acls(&self) -> Vec<AclRule> {
        let entries = match self.store.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list ACL rules, returning empty list");
                return Vec::new();
            }
        };
        entries
            .iter()
            .filter_map(|(key, doc)| match AclRule::from_document(doc) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable ACL rule");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio::sync::RwLock;

    use super::*;
    use crate::store::testing::MemoryStore;

    const ADMIN: &str = "wharf-admin";

    async fn engine_with(authenticated: &[&str]) -> (PermissionEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new("acl-registry"));
        let set: AuthenticatedSet = Arc::new(RwLock::new(
            authenticated.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        ));
        (PermissionEngine::new(store.clone(), set, ADMIN), store)
    }

    #[tokio::test]
    async fn grant_then_check_then_revoke() {
        let (engine, _) = engine_with(&["alice"]).await;

        assert!(!engine.check_permission("alice", "files", "read").await);
        engine
            .grant_permission("alice", "files", "read", None)
            .await
            .unwrap();
        assert!(engine.check_permission("alice", "files", "read").await);

        engine
            .revoke_permission("alice", "files", "read", None)
            .await
            .unwrap();
        assert!(!engine.check_permission("alice", "files", "read").await);
    }

    #[tokio::test]
    async fn admin_bypasses_every_check() {
        let (engine, _) = engine_with(&[]).await;
        assert!(engine.check_permission(ADMIN, "anything", "admin").await);
        assert!(engine.check_permission(ADMIN, "files", "nonsense").await);
    }

    #[tokio::test]
    async fn authentication_precedes_authorization() {
        let (engine, _) = engine_with(&[]).await;
        engine
            .grant_permission("mallory", "files", "read", None)
            .await
            .unwrap();
        // Rule names mallory explicitly, but that DID is not authenticated.
        assert!(!engine.check_permission("mallory", "files", "read").await);
    }

    #[tokio::test]
    async fn wildcard_admits_any_authenticated_did() {
        let (engine, _) = engine_with(&["bob"]).await;
        engine
            .grant_permission(WILDCARD_DID, "files", "read", None)
            .await
            .unwrap();
        assert!(engine.check_permission("bob", "files", "read").await);

        // Wildcard revoke removes the literal "*" member only.
        engine
            .grant_permission("bob", "files", "read", None)
            .await
            .unwrap();
        engine
            .revoke_permission(WILDCARD_DID, "files", "read", None)
            .await
            .unwrap();
        assert!(engine.check_permission("bob", "files", "read").await);
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_and_creates_no_rule() {
        let (engine, store) = engine_with(&["alice"]).await;
        let err = engine
            .grant_permission("alice", "files", "delete", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::InvalidArgument(_)));
        assert!(store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_admin_granter_needs_grant_permission() {
        let (engine, _) = engine_with(&["delegate", "carol"]).await;

        let err = engine
            .grant_permission("carol", "files", "read", Some("delegate"))
            .await
            .unwrap_err();
        assert!(matches!(err, WharfError::InsufficientPermission(_)));

        engine
            .grant_permission("delegate", "files", "grant", None)
            .await
            .unwrap();
        engine
            .grant_permission("carol", "files", "read", Some("delegate"))
            .await
            .unwrap();
        assert!(engine.check_permission("carol", "files", "read").await);
    }

    #[tokio::test]
    async fn revoke_of_non_member_is_a_no_op() {
        let (engine, store) = engine_with(&["alice"]).await;
        engine
            .revoke_permission("alice", "files", "read", None)
            .await
            .unwrap();
        assert!(store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grant_is_idempotent_and_rules_persist_when_emptied() {
        let (engine, store) = engine_with(&["alice"]).await;
        engine
            .grant_permission("alice", "files", "write", None)
            .await
            .unwrap();
        engine
            .grant_permission("alice", "files", "write", None)
            .await
            .unwrap();

        let rules = engine.get_all_acls().await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].allowed_dids, vec!["alice".to_string()]);

        engine
            .revoke_permission("alice", "files", "write", None)
            .await
            .unwrap();
        // Emptied, not deleted.
        let rules = engine.get_all_acls().await;
        assert_eq!(rules.len(), 1);
        assert!(rules[0].allowed_dids.is_empty());
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lookup_failures_fail_closed_and_listings_fail_open() {
        let (engine, store) = engine_with(&["alice"]).await;
        engine
            .grant_permission("alice", "files", "read", None)
            .await
            .unwrap();

        store
            .fail_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(!engine.check_permission("alice", "files", "read").await);
        assert!(engine.get_all_acls().await.is_empty());
    }

    #[tokio::test]
    async fn oversized_resource_is_rejected() {
        let (engine, _) = engine_with(&["alice"]).await;
        let long = "r".repeat(MAX_RESOURCE_LENGTH + 1);
        assert!(matches!(
            engine
                .grant_permission("alice", &long, "read", None)
                .await
                .unwrap_err(),
            WharfError::InvalidArgument(_)
        ));
    }
}
