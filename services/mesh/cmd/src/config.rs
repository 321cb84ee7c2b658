//! Configuration for the mesh node.
//!
//! Read from a YAML file, then overridden by environment variables, with
//! sensible defaults underneath. The static routing table and the static
//! neighbor list live here; the core never reads configuration on its own.

use anyhow::Result;
use mesh_routing::{FloodPolicy, StaticRoute};
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// A neighbor known at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticNeighbor {
    /// The neighbor's mesh address
    pub address: Ipv6Addr,
    /// Opaque transport identifier of the neighbor's radio
    pub device_id: String,
}

/// Mesh node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Path of the packet driver device
    pub device_path: String,
    /// This node's link-local address
    pub local_address: Ipv6Addr,
    /// Listen requests kept outstanding against the driver
    pub outstanding_listens: usize,
    /// Spacing between the initial batch of listen requests (ms)
    pub listen_spacing_ms: u64,
    /// Bound on one listen wait before it is retried (seconds)
    pub listen_timeout_secs: u64,
    /// Bound on one transmission attempt (seconds)
    pub attempt_timeout_secs: u64,
    /// Pause between flood attempts (ms)
    pub settle_interval_ms: u64,
    /// Grace period for the loop to drain on shutdown (seconds)
    pub shutdown_grace_secs: u64,
    /// Which neighbors a flood targets
    pub flood_policy: FloodPolicy,
    /// Static routing table: destination -> path from the border router
    pub routes: Vec<StaticRoute>,
    /// Neighbors known at startup
    pub neighbors: Vec<StaticNeighbor>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            device_path: "ipv6-mesh0".to_string(),
            local_address: "fe80::1".parse().unwrap(),
            outstanding_listens: 10,
            listen_spacing_ms: 100,
            listen_timeout_secs: 10,
            attempt_timeout_secs: 5,
            settle_interval_ms: 100,
            shutdown_grace_secs: 3,
            flood_policy: FloodPolicy::default(),
            routes: Vec::new(),
            neighbors: Vec::new(),
        }
    }
}

impl MeshConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides. A missing or unparseable file falls back to defaults.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<MeshConfig>(&content) {
                Ok(parsed) => {
                    config = parsed;
                    info!("loaded configuration from {:?}", config_path.as_ref());
                }
                Err(err) => {
                    warn!(
                        "failed to parse config file {:?} ({err}), using defaults",
                        config_path.as_ref()
                    );
                }
            }
        } else {
            warn!(
                "config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_environment_overrides();

        info!(
            "final mesh configuration: device={}, local={}, routes={}, neighbors={}",
            config.device_path,
            config.local_address,
            config.routes.len(),
            config.neighbors.len()
        );

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_environment_overrides(&mut self) {
        if let Ok(device_path) = std::env::var("MESH_DEVICE_PATH") {
            self.device_path = device_path;
            info!("device path overridden by environment: {}", self.device_path);
        }

        if let Ok(address) = std::env::var("MESH_LOCAL_ADDRESS") {
            if let Ok(address) = address.parse::<Ipv6Addr>() {
                self.local_address = address;
                info!("local address overridden by environment: {}", address);
            }
        }

        if let Ok(policy) = std::env::var("MESH_FLOOD_POLICY") {
            match policy.as_str() {
                "all-neighbors" => self.flood_policy = FloodPolicy::AllNeighbors,
                "qualified-only" => self.flood_policy = FloodPolicy::QualifiedOnly,
                other => warn!("unknown MESH_FLOOD_POLICY value {other:?}, keeping configured"),
            }
        }

        if let Ok(timeout) = std::env::var("MESH_LISTEN_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.listen_timeout_secs = timeout;
            }
        }
    }

    /// Bound on one listen wait.
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    /// Bound on one transmission attempt.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Pause between flood attempts.
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    /// Spacing between the initial listen requests.
    pub fn listen_spacing(&self) -> Duration {
        Duration::from_millis(self.listen_spacing_ms)
    }

    /// Grace period for shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert_eq!(config.device_path, "ipv6-mesh0");
        assert_eq!(config.outstanding_listens, 10);
        assert_eq!(config.listen_timeout_secs, 10);
        assert_eq!(config.attempt_timeout_secs, 5);
        assert_eq!(config.flood_policy, FloodPolicy::AllNeighbors);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
device_path: ipv6-mesh1
local_address: "fe80::b826:1c8b:ccbb:32f0"
flood_policy: qualified-only
attempt_timeout_secs: 7

routes:
  - destination: "fe80::291:a8ff:feeb:27b8"
    path:
      - "fe80::b826:1c8b:ccbb:32f0"
      - "fe80::291:a8ff:feeb:27b8"
  - destination: "fe80::3ff8:d2ff:feeb:27b8"
    path:
      - "fe80::b826:1c8b:ccbb:32f0"
      - "fe80::291:a8ff:feeb:27b8"
      - "fe80::3ff8:d2ff:feeb:27b8"

neighbors:
  - address: "fe80::291:a8ff:feeb:27b8"
    device_id: "radio:pi-1"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = MeshConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.device_path, "ipv6-mesh1");
        assert_eq!(
            config.local_address,
            "fe80::b826:1c8b:ccbb:32f0".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(config.flood_policy, FloodPolicy::QualifiedOnly);
        assert_eq!(config.attempt_timeout(), Duration::from_secs(7));
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].path.len(), 3);
        assert_eq!(config.neighbors[0].device_id, "radio:pi-1");

        // Unspecified fields keep their defaults.
        assert_eq!(config.outstanding_listens, 10);
        assert_eq!(config.listen_timeout_secs, 10);
    }
}
