//! Configuration for Wharf
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::network::ProbeConfig;
use crate::security::BootstrapPolicy;
use crate::workspace::WorkspaceConfig;

/// Wharf - unified peer-to-peer storage workspace
#[derive(Parser, Debug, Clone)]
#[command(name = "wharf")]
#[command(about = "Workspace manager for peer-to-peer storage networks")]
pub struct Args {
    /// Root directory for node storage and the activity log
    #[arg(long, env = "WHARF_DATA_DIR", default_value = "./wharf-data")]
    pub data_dir: PathBuf,

    /// Probe for daemons and create the local node on start
    #[arg(long, env = "WHARF_AUTO_START", default_value = "true")]
    pub auto_start: bool,

    /// Bootstrap admin identity, authenticated from the start
    #[arg(long, env = "WHARF_ADMIN_DID", default_value = "wharf-admin")]
    pub admin_did: String,

    /// Comma-separated local API ports probed for running daemons
    #[arg(long, env = "WHARF_PROBE_PORTS", default_value = "5001,5002,5003,5004,5005")]
    pub probe_ports: String,

    /// Per-probe timeout in milliseconds
    #[arg(long, env = "WHARF_PROBE_TIMEOUT_MS", default_value = "2000")]
    pub probe_timeout_ms: u64,

    /// Cadence of the background resource discovery scan in seconds
    #[arg(long, env = "WHARF_DISCOVERY_INTERVAL_SECS", default_value = "300")]
    pub discovery_interval_secs: u64,

    /// Settle delay before the first security bootstrap attempt in seconds
    #[arg(long, env = "WHARF_BOOTSTRAP_DELAY_SECS", default_value = "3")]
    pub bootstrap_delay_secs: u64,

    /// Accept DID authentication without a signature (development only)
    #[arg(long, env = "WHARF_ALLOW_UNVERIFIED_SIGNATURES", default_value = "true")]
    pub allow_unverified_signatures: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Parse the comma-separated probe port list
    pub fn probe_port_list(&self) -> Result<Vec<u16>, String> {
        self.probe_ports
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|_| format!("invalid probe port: {s}"))
            })
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.admin_did.trim().is_empty() {
            return Err("WHARF_ADMIN_DID must not be empty".to_string());
        }
        if self.probe_timeout_ms == 0 {
            return Err("WHARF_PROBE_TIMEOUT_MS must be positive".to_string());
        }
        if self.discovery_interval_secs == 0 {
            return Err("WHARF_DISCOVERY_INTERVAL_SECS must be positive".to_string());
        }
        self.probe_port_list()?;
        Ok(())
    }

    /// Build the workspace configuration from the parsed arguments
    pub fn workspace_config(&self) -> Result<WorkspaceConfig, String> {
        Ok(WorkspaceConfig {
            data_dir: self.data_dir.clone(),
            auto_start: self.auto_start,
            networks: Vec::new(),
            probe: ProbeConfig {
                ports: self.probe_port_list()?,
                timeout: Duration::from_millis(self.probe_timeout_ms),
                ..ProbeConfig::default()
            },
            security_bootstrap_delay: Duration::from_secs(self.bootstrap_delay_secs),
            bootstrap: BootstrapPolicy::default(),
            discovery_interval: Duration::from_secs(self.discovery_interval_secs),
            allow_unverified_signatures: self.allow_unverified_signatures,
            admin_did: self.admin_did.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from(["wharf"])
    }

    #[test]
    fn defaults_are_valid() {
        let args = args();
        args.validate().unwrap();
        assert_eq!(args.probe_port_list().unwrap(), vec![5001, 5002, 5003, 5004, 5005]);
    }

    #[test]
    fn malformed_probe_ports_are_rejected() {
        let mut args = args();
        args.probe_ports = "5001,abc".to_string();
        assert!(args.validate().is_err());
    }

    #[test]
    fn workspace_config_carries_timings() {
        let mut args = args();
        args.probe_timeout_ms = 500;
        args.discovery_interval_secs = 60;
        let config = args.workspace_config().unwrap();
        assert_eq!(config.probe.timeout, Duration::from_millis(500));
        assert_eq!(config.discovery_interval, Duration::from_secs(60));
    }
}
