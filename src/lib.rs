//! Wharf - unified peer-to-peer storage workspace
//!
//! Wharf manages a workspace spanning one or more peer-to-peer storage
//! networks: a self-hosted node it creates itself plus any external daemons
//! it detects on the machine. On top of the networks it layers a document
//! store, a decentralized identity registry, an ACL permission engine, a
//! discovered-resource catalog, and an append-only activity log.
//!
//! ## Subsystems
//!
//! - **Workspace**: supervisor owning startup, shutdown, and every operation
//! - **Networks**: self-hosted node creation and external daemon attachment
//! - **Resources**: unified handles over files, folders, and databases
//! - **Security**: DID registry and ACL engine with bounded-retry bootstrap
//! - **Activity**: bounded in-memory buffer plus durable JSONL history

pub mod activity;
pub mod config;
pub mod error;
pub mod network;
pub mod resources;
pub mod security;
pub mod store;
pub mod workspace;

pub use config::Args;
pub use error::{Result, WharfError};
pub use resources::{Resource, ResourceKind, SearchCriteria};
pub use store::{DocumentStore, NetworkNode};
pub use workspace::{
    NetworkConfig, Workspace, WorkspaceConfig, WorkspaceEvent, WorkspaceStatus, LOCAL_NETWORK_ID,
};
