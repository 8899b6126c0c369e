//! Unified resource handles and the discovered-resource catalog
//!
//! A [`Resource`] is one handle shape for everything storable: files and
//! folders in the block store, databases in the document layer. The catalog
//! is a time-boxed cache: each discovery scan replaces it wholesale, and
//! repeat reads inside the freshness window return the cached snapshot
//! without touching any network.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::WharfError;

/// How long a completed scan satisfies non-forced discovery calls
pub const DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(30);

/// What kind of storable entity a resource handle points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Folder,
    Database,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::File => write!(f, "file"),
            ResourceKind::Folder => write!(f, "folder"),
            ResourceKind::Database => write!(f, "database"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = WharfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ResourceKind::File),
            "folder" => Ok(ResourceKind::Folder),
            "database" => Ok(ResourceKind::Database),
            other => Err(WharfError::InvalidArgument(format!(
                "unknown resource kind: {other}"
            ))),
        }
    }
}

/// A unified handle to any storable entity
///
/// Identity is `(kind, identifier)`; the identifier is a content address,
/// database address, or path, globally unique within its kind. `network_id`
/// is a weak back-reference resolved through the network registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub kind: ResourceKind,
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    pub created_at: String,
    pub modified_at: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub network_id: String,
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.identifier == other.identifier
    }
}

impl Eq for Resource {}

impl Resource {
    /// Parse a resource out of a discovery-index document.
    ///
    /// Returns `None` for documents that do not describe a resource; the
    /// discovery scan skips those rather than failing the network.
    pub fn from_document(doc: &Value, network_id: &str) -> Option<Self> {
        let identifier = doc.get("_id")?.as_str()?.to_string();
        let kind = doc.get("kind")?.as_str()?.parse().ok()?;
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unnamed Resource")
            .to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let stamp = |field: &str| {
            doc.get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| now.clone())
        };
        let tags = doc
            .get("tags")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Resource {
            kind,
            identifier,
            name,
            size_bytes: doc.get("sizeBytes").and_then(Value::as_u64).unwrap_or(0),
            created_at: stamp("createdAt"),
            modified_at: stamp("modifiedAt"),
            tags,
            network_id: network_id.to_string(),
        })
    }
}

/// AND-combined search filter over the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    pub kind: Option<ResourceKind>,
    /// Case-insensitive substring match on the resource name
    pub name: Option<String>,
    /// Every listed tag must be present
    #[serde(default)]
    pub tags: Vec<String>,
    pub network_id: Option<String>,
}

impl SearchCriteria {
    fn matches(&self, resource: &Resource) -> bool {
        if let Some(kind) = self.kind {
            if resource.kind != kind {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if !resource
                .name
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        if !self.tags.iter().all(|t| resource.tags.contains(t)) {
            return false;
        }
        if let Some(ref network_id) = self.network_id {
            if &resource.network_id != network_id {
                return false;
            }
        }
        true
    }
}

/// Discovered-resource index, replaced wholesale on every scan.
///
/// Preserves scan order so repeat reads inside the freshness window return
/// an identical snapshot.
pub struct ResourceCatalog {
    inner: RwLock<CatalogState>,
}

struct CatalogState {
    resources: Vec<Resource>,
    last_discovery: Option<Instant>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogState {
                resources: Vec::new(),
                last_discovery: None,
            }),
        }
    }

    /// Whether a scan completed within the freshness window
    pub async fn is_fresh(&self) -> bool {
        self.inner
            .read()
            .await
            .last_discovery
            .map(|t| t.elapsed() < DISCOVERY_CACHE_TTL)
            .unwrap_or(false)
    }

    /// Replace the entire catalog atomically and stamp the discovery time
    pub async fn replace_all(&self, resources: Vec<Resource>) {
        let mut inner = self.inner.write().await;
        inner.resources = resources;
        inner.last_discovery = Some(Instant::now());
    }

    pub async fn get(&self, identifier: &str) -> Option<Resource> {
        self.inner
            .read()
            .await
            .resources
            .iter()
            .find(|r| r.identifier == identifier)
            .cloned()
    }

    pub async fn all(&self) -> Vec<Resource> {
        self.inner.read().await.resources.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.resources.len()
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Vec<Resource> {
        self.inner
            .read()
            .await
            .resources
            .iter()
            .filter(|r| criteria.matches(r))
            .cloned()
            .collect()
    }

    /// Drop every resource owned by a removed network
    pub async fn remove_network(&self, network_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.resources.len();
        inner.resources.retain(|r| r.network_id != network_id);
        before - inner.resources.len()
    }

    /// Forget all resources and the discovery stamp (workspace shutdown)
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.resources.clear();
        inner.last_discovery = None;
    }
}

impl Default for ResourceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(kind: ResourceKind, id: &str, name: &str, network: &str) -> Resource {
        Resource {
            kind,
            identifier: id.to_string(),
            name: name.to_string(),
            size_bytes: 0,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            modified_at: "2026-01-01T00:00:00Z".to_string(),
            tags: BTreeSet::new(),
            network_id: network.to_string(),
        }
    }

    #[test]
    fn equality_is_kind_plus_identifier() {
        let a = resource(ResourceKind::File, "bafk1", "a.txt", "local");
        let mut b = a.clone();
        b.name = "renamed.txt".to_string();
        b.network_id = "other".to_string();
        assert_eq!(a, b);

        let c = resource(ResourceKind::Database, "bafk1", "a.txt", "local");
        assert_ne!(a, c);
    }

    #[test]
    fn from_document_requires_kind_and_id() {
        let doc = json!({ "_id": "/wharfdb/x/notes", "kind": "database", "name": "notes" });
        let r = Resource::from_document(&doc, "local").unwrap();
        assert_eq!(r.kind, ResourceKind::Database);
        assert_eq!(r.network_id, "local");

        assert!(Resource::from_document(&json!({ "_id": "x" }), "local").is_none());
        assert!(
            Resource::from_document(&json!({ "_id": "x", "kind": "nonsense" }), "local").is_none()
        );
    }

    #[tokio::test]
    async fn search_criteria_are_and_combined() {
        let catalog = ResourceCatalog::new();
        let mut tagged = resource(ResourceKind::File, "f1", "Report.pdf", "local");
        tagged.tags = ["work", "q3"].iter().map(|s| s.to_string()).collect();
        catalog
            .replace_all(vec![
                tagged,
                resource(ResourceKind::File, "f2", "report-draft", "remote"),
                resource(ResourceKind::Database, "d1", "reports-db", "local"),
            ])
            .await;

        // Name match is case-insensitive substring
        let by_name = catalog
            .search(&SearchCriteria {
                name: Some("REPORT".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_name.len(), 3);

        // All criteria must hold together
        let narrowed = catalog
            .search(&SearchCriteria {
                kind: Some(ResourceKind::File),
                name: Some("report".to_string()),
                tags: vec!["work".to_string(), "q3".to_string()],
                network_id: Some("local".to_string()),
            })
            .await;
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].identifier, "f1");

        // A missing tag excludes
        let none = catalog
            .search(&SearchCriteria {
                tags: vec!["work".to_string(), "missing".to_string()],
                ..Default::default()
            })
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn remove_network_drops_only_owned_resources() {
        let catalog = ResourceCatalog::new();
        catalog
            .replace_all(vec![
                resource(ResourceKind::File, "f1", "a", "local"),
                resource(ResourceKind::File, "f2", "b", "daemon-5001"),
            ])
            .await;

        assert_eq!(catalog.remove_network("local").await, 1);
        assert!(catalog.get("f1").await.is_none());
        assert!(catalog.get("f2").await.is_some());
    }

    #[tokio::test]
    async fn freshness_window_starts_at_replace() {
        let catalog = ResourceCatalog::new();
        assert!(!catalog.is_fresh().await);
        catalog.replace_all(Vec::new()).await;
        assert!(catalog.is_fresh().await);
        catalog.clear().await;
        assert!(!catalog.is_fresh().await);
    }
}
