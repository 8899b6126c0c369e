//! Workspace supervisor
//!
//! The workspace owns every subsystem: the network registry, the resource
//! catalog, the DID/ACL security subsystem, and the activity log. `start`
//! brings them up in a fixed order and `stop` tears them down in reverse;
//! everything in between goes through the methods here so each operation
//! lands in the activity log exactly once.
//!
//! ## Startup ordering
//!
//! 1. Create the data directory (fatal on failure)
//! 2. Auto-start: probe for external daemons (best effort), then create the
//!    local self-hosted node (fatal on failure)
//! 3. Attach pre-configured networks sequentially
//! 4. Schedule security bootstrap after a settle delay, with bounded retry
//! 5. Schedule the periodic discovery scan
//!
//! Security bootstrap is deliberately asynchronous: the workspace is usable
//! for storage and discovery while identity comes up, and a workspace whose
//! security never settles still runs, degraded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::activity::{ActivityLevel, ActivityLog, ActivityRecord, DEFAULT_PAGE_LIMIT};
use crate::error::{Result, WharfError};
use crate::network::{
    detect_daemons, ExternalDaemonNode, NetworkDescriptor, NetworkKind, NetworkRegistry,
    ProbeConfig, SelfHostedNode, RESOURCE_INDEX_STORE,
};
use crate::resources::{Resource, ResourceCatalog, SearchCriteria};
use crate::security::{
    AclRule, BootstrapPolicy, DidRecord, SecurityState, SecuritySubsystem,
};

/// Network id of the node the workspace creates for itself
pub const LOCAL_NETWORK_ID: &str = "local";

/// How one network attachment is configured
#[derive(Debug, Clone)]
pub enum NetworkConfig {
    /// A node this workspace creates and owns
    SelfHosted { data_dir: Option<PathBuf> },
    /// A daemon running in another process, reached over its HTTP API
    ExternalDaemon { api_url: String },
}

/// Everything the supervisor needs to run one workspace
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Root directory for node storage and the activity log
    pub data_dir: PathBuf,
    /// Probe for daemons and create the local node on start
    pub auto_start: bool,
    /// Networks attached on start, after auto-start networks
    pub networks: Vec<(String, NetworkConfig)>,
    pub probe: ProbeConfig,
    /// Settle delay before the first security bootstrap attempt
    pub security_bootstrap_delay: Duration,
    pub bootstrap: BootstrapPolicy,
    /// Cadence of the background discovery scan
    pub discovery_interval: Duration,
    pub allow_unverified_signatures: bool,
    /// Bootstrap admin identity, authenticated from the start
    pub admin_did: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./wharf-data"),
            auto_start: true,
            networks: Vec::new(),
            probe: ProbeConfig::default(),
            security_bootstrap_delay: Duration::from_secs(3),
            bootstrap: BootstrapPolicy::default(),
            discovery_interval: Duration::from_secs(300),
            allow_unverified_signatures: true,
            admin_did: "wharf-admin".to_string(),
        }
    }
}

/// Broadcast to subscribers as the workspace changes shape
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    Started,
    Stopped,
    NetworkAdded(String),
    NetworkRemoved(String),
    ResourcesDiscovered { count: usize },
}

/// Point-in-time snapshot for status endpoints and CLIs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub run_id: String,
    pub started: bool,
    pub security: SecurityState,
    pub networks: Vec<NetworkDescriptor>,
    pub resource_count: usize,
}

/// The workspace supervisor
pub struct Workspace {
    config: WorkspaceConfig,
    run_id: Uuid,
    started: AtomicBool,
    networks: NetworkRegistry,
    catalog: ResourceCatalog,
    security: Arc<SecuritySubsystem>,
    activity: ActivityLog,
    events: broadcast::Sender<WorkspaceEvent>,
    http: reqwest::Client,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Workspace {
    /// Open a workspace against its data directory. Nothing network-facing
    /// happens until [`Workspace::start`].
    pub async fn open(config: WorkspaceConfig) -> Result<Arc<Self>> {
        let activity = ActivityLog::open(&config.data_dir.join("activity.jsonl")).await?;
        let security = Arc::new(SecuritySubsystem::new(
            &config.admin_did,
            config.allow_unverified_signatures,
        ));
        let (events, _) = broadcast::channel(64);

        Ok(Arc::new(Self {
            config,
            run_id: Uuid::new_v4(),
            started: AtomicBool::new(false),
            networks: NetworkRegistry::new(),
            catalog: ResourceCatalog::new(),
            security,
            activity,
            events,
            http: reqwest::Client::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Ready means started with the security subsystem settled
    pub async fn is_ready(&self) -> bool {
        self.is_started() && self.security.is_ready().await
    }

    /// The network registry. Exposed so embedders can attach nodes the
    /// built-in [`NetworkConfig`] shapes do not cover.
    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorkspaceEvent) {
        // A send error only means nobody is listening.
        let _ = self.events.send(event);
    }

    // --- Lifecycle ----------------------------------------------------------

    /// Bring the workspace up. Idempotent: a second call warns and returns.
    ///
    /// A failed start rolls back: spawned tasks are aborted, attached
    /// networks are stopped and dropped, and the workspace reads as not
    /// started, so a retry runs the full sequence again.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Workspace already started");
            return Ok(());
        }

        if let Err(e) = self.start_inner().await {
            warn!(error = %e, "Workspace start failed, rolling back");
            for task in self.tasks.lock().await.drain(..) {
                task.abort();
            }
            for (id, node) in self.networks.take_all().await {
                if let Err(stop_err) = node.stop().await {
                    warn!(network_id = %id, error = %stop_err, "Network failed to stop during rollback");
                }
            }
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    async fn start_inner(self: &Arc<Self>) -> Result<()> {
        info!(run_id = %self.run_id, data_dir = %self.config.data_dir.display(), "Starting workspace");
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        if self.config.auto_start {
            self.attach_detected_daemons().await;
            self.add_network(
                LOCAL_NETWORK_ID,
                NetworkConfig::SelfHosted { data_dir: None },
            )
            .await?;
        }

        for (id, network_config) in self.config.networks.clone() {
            self.add_network(&id, network_config).await?;
        }

        self.spawn_security_bootstrap().await;
        self.spawn_discovery_loop().await;

        self.activity
            .record(
                ActivityLevel::Info,
                "Workspace started",
                json!({ "runId": self.run_id.to_string(), "networks": self.networks.len().await }),
            )
            .await;
        self.emit(WorkspaceEvent::Started);
        Ok(())
    }

    /// Tear the workspace down: security first, then every network, then the
    /// catalog. Per-network stop failures are collected, never skipped over
    /// silently, and reported once at the end.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!(run_id = %self.run_id, "Stopping workspace");

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        self.security.close().await;

        let mut failed = Vec::new();
        for (id, node) in self.networks.take_all().await {
            if let Err(e) = node.stop().await {
                warn!(network_id = %id, error = %e, "Network failed to stop");
                failed.push(id);
            }
        }

        self.catalog.clear().await;

        self.activity
            .record(
                ActivityLevel::Info,
                "Workspace stopped",
                json!({ "runId": self.run_id.to_string() }),
            )
            .await;
        self.emit(WorkspaceEvent::Stopped);

        if failed.is_empty() {
            Ok(())
        } else {
            Err(WharfError::Internal(format!(
                "networks failed to stop cleanly: {}",
                failed.join(", ")
            )))
        }
    }

    /// Probe for running daemons and attach each as a network. Best effort
    /// throughout: an unreachable daemon is simply not attached.
    async fn attach_detected_daemons(&self) {
        let found = detect_daemons(&self.http, &self.config.probe).await;
        for daemon in found {
            let id = format!("daemon-{}", daemon.port);
            let node = Arc::new(ExternalDaemonNode::from_detected(self.http.clone(), daemon));
            match self.networks.insert(&id, NetworkKind::ExternalDaemon, node).await {
                Ok(()) => {
                    self.activity
                        .record(
                            ActivityLevel::Info,
                            "Attached external daemon",
                            json!({ "networkId": id }),
                        )
                        .await;
                    self.emit(WorkspaceEvent::NetworkAdded(id));
                }
                Err(e) => warn!(network_id = %id, error = %e, "Skipping detected daemon"),
            }
        }
    }

    async fn spawn_security_bootstrap(self: &Arc<Self>) {
        let workspace = self.clone();
        let delay = self.config.security_bootstrap_delay;
        let policy = self.config.bootstrap.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // The local node carries the identity and ACL stores; fall back
            // to the first registered network when there is no local node.
            let node = match workspace.networks.get(LOCAL_NETWORK_ID).await {
                Some(node) => Some(node),
                None => workspace
                    .networks
                    .snapshot()
                    .await
                    .into_iter()
                    .next()
                    .map(|(_, node)| node),
            };
            let Some(node) = node else {
                warn!("No network available for security bootstrap");
                return;
            };

            let state = workspace
                .security
                .bootstrap_with_retry(node, &policy)
                .await;
            let level = if state == SecurityState::Ready {
                ActivityLevel::Info
            } else {
                ActivityLevel::Error
            };
            workspace
                .activity
                .record(
                    level,
                    "Security bootstrap finished",
                    json!({ "state": state }),
                )
                .await;
        });
        self.tasks.lock().await.push(handle);
    }

    async fn spawn_discovery_loop(self: &Arc<Self>) {
        let workspace = self.clone();
        let interval = self.config.discovery_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = workspace.discover_resources(true).await {
                    warn!(error = %e, "Background discovery scan failed");
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    // --- Networks -----------------------------------------------------------

    /// Attach a network under a unique id and start it
    pub async fn add_network(&self, id: &str, config: NetworkConfig) -> Result<NetworkDescriptor> {
        if self.networks.contains(id).await {
            return Err(WharfError::AlreadyExists(format!("network '{id}'")));
        }

        let (kind, node): (NetworkKind, Arc<dyn crate::store::NetworkNode>) = match config {
            NetworkConfig::SelfHosted { data_dir } => {
                let dir = data_dir
                    .unwrap_or_else(|| self.config.data_dir.join("networks").join(id));
                let node = SelfHostedNode::create(&dir).await?;
                (NetworkKind::SelfHosted, Arc::new(node))
            }
            NetworkConfig::ExternalDaemon { api_url } => {
                let node = ExternalDaemonNode::attach(
                    self.http.clone(),
                    &api_url,
                    self.config.probe.timeout,
                )
                .await?;
                (NetworkKind::ExternalDaemon, Arc::new(node))
            }
        };

        node.start().await?;
        self.networks.insert(id, kind, node).await?;

        self.activity
            .record(
                ActivityLevel::Info,
                "Network added",
                json!({ "networkId": id, "kind": kind.to_string() }),
            )
            .await;
        self.emit(WorkspaceEvent::NetworkAdded(id.to_string()));

        // Cannot miss: the entry was inserted two statements up.
        self.networks
            .describe(id)
            .await
            .ok_or_else(|| WharfError::Internal(format!("network '{id}' vanished after insert")))
    }

    /// Detach a network, stop its node, and evict its discovered resources
    pub async fn remove_network(&self, id: &str) -> Result<()> {
        let node = self.networks.remove(id).await?;
        if let Err(e) = node.stop().await {
            warn!(network_id = %id, error = %e, "Network failed to stop on removal");
        }
        let evicted = self.catalog.remove_network(id).await;

        self.activity
            .record(
                ActivityLevel::Info,
                "Network removed",
                json!({ "networkId": id, "evictedResources": evicted }),
            )
            .await;
        self.emit(WorkspaceEvent::NetworkRemoved(id.to_string()));
        Ok(())
    }

    pub async fn get_networks(&self) -> Vec<NetworkDescriptor> {
        self.networks.descriptors().await
    }

    pub async fn get_network(&self, id: &str) -> Option<NetworkDescriptor> {
        self.networks.describe(id).await
    }

    // --- Resources ----------------------------------------------------------

    /// Scan every network's resource index and replace the catalog.
    ///
    /// Unless forced, a scan inside the freshness window is skipped and the
    /// cached snapshot comes back unchanged. Per-network failures degrade
    /// that network's contribution to nothing; the scan itself still
    /// completes.
    pub async fn discover_resources(&self, force: bool) -> Result<Vec<Resource>> {
        if !force && self.catalog.is_fresh().await {
            return Ok(self.catalog.all().await);
        }

        let mut discovered = Vec::new();
        for (network_id, node) in self.networks.snapshot().await {
            let store = match node.open_store(RESOURCE_INDEX_STORE).await {
                Ok(store) => store,
                Err(e) => {
                    warn!(network_id = %network_id, error = %e, "Network has no readable resource index");
                    continue;
                }
            };
            let entries = match store.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(network_id = %network_id, error = %e, "Resource index read failed");
                    continue;
                }
            };
            for (_, doc) in entries {
                if let Some(resource) = Resource::from_document(&doc, &network_id) {
                    discovered.push(resource);
                }
            }
        }

        let count = discovered.len();
        self.catalog.replace_all(discovered.clone()).await;
        self.activity
            .record(
                ActivityLevel::Info,
                "Resource discovery completed",
                json!({ "count": count }),
            )
            .await;
        self.emit(WorkspaceEvent::ResourcesDiscovered { count });
        Ok(discovered)
    }

    pub async fn get_resource(&self, identifier: &str) -> Option<Resource> {
        self.catalog.get(identifier).await
    }

    pub async fn search_resources(&self, criteria: &SearchCriteria) -> Vec<Resource> {
        self.catalog.search(criteria).await
    }

    // --- Identity and permissions -------------------------------------------

    pub async fn create_did(
        &self,
        id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<DidRecord> {
        let record = self.security.create_did(id, metadata).await?;
        self.activity
            .record(ActivityLevel::Info, "DID created", json!({ "did": id }))
            .await;
        Ok(record)
    }

    pub async fn update_did_metadata(
        &self,
        id: &str,
        partial: BTreeMap<String, String>,
    ) -> Result<DidRecord> {
        self.security.update_did_metadata(id, partial).await
    }

    pub async fn authenticate_did(&self, id: &str, signature: Option<&str>) -> Result<()> {
        self.security.authenticate_did(id, signature).await?;
        self.activity
            .record(ActivityLevel::Info, "DID authenticated", json!({ "did": id }))
            .await;
        Ok(())
    }

    pub async fn delete_did(&self, id: &str) -> Result<()> {
        self.security.delete_did(id).await?;
        self.activity
            .record(ActivityLevel::Warn, "DID deleted", json!({ "did": id }))
            .await;
        Ok(())
    }

    pub async fn get_all_dids(&self) -> Vec<DidRecord> {
        self.security.get_all_dids().await
    }

    pub async fn check_permission(&self, did: &str, resource: &str, action: &str) -> Result<bool> {
        self.security.check_permission(did, resource, action).await
    }

    pub async fn grant_permission(
        &self,
        did: &str,
        resource: &str,
        action: &str,
        granter: Option<&str>,
    ) -> Result<()> {
        self.security
            .grant_permission(did, resource, action, granter)
            .await?;
        self.activity
            .record(
                ActivityLevel::Info,
                "Permission granted",
                json!({ "did": did, "resource": resource, "action": action }),
            )
            .await;
        Ok(())
    }

    pub async fn revoke_permission(
        &self,
        did: &str,
        resource: &str,
        action: &str,
        revoker: Option<&str>,
    ) -> Result<()> {
        self.security
            .revoke_permission(did, resource, action, revoker)
            .await?;
        self.activity
            .record(
                ActivityLevel::Warn,
                "Permission revoked",
                json!({ "did": did, "resource": resource, "action": action }),
            )
            .await;
        Ok(())
    }

    pub async fn get_all_acls(&self) -> Vec<AclRule> {
        self.security.get_all_acls().await
    }

    // --- Status and history -------------------------------------------------

    pub async fn get_status(&self) -> WorkspaceStatus {
        WorkspaceStatus {
            run_id: self.run_id.to_string(),
            started: self.is_started(),
            security: self.security.state().await,
            networks: self.networks.descriptors().await,
            resource_count: self.catalog.len().await,
        }
    }

    /// Activity history, newest first. With a cursor, records strictly older
    /// than it; with no limit, the default page size applies.
    pub async fn get_activity(
        &self,
        before: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ActivityRecord> {
        self.activity
            .older_than(before, limit.unwrap_or(DEFAULT_PAGE_LIMIT))
            .await
    }
}
