//! Node configuration
//!
//! Loaded once at startup from an optional TOML file, then overridden from
//! `SIPMESH_*` environment variables, then validated. Immutable afterwards.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sipmesh_media_core::dtmf::DEFAULT_DTMF_PAYLOAD_TYPE;
use sipmesh_media_core::CodecType;

use crate::error::{CallEngineError, Result};

/// Top-level node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub signaling: SignalingConfig,
    pub cluster: ClusterConfig,
    pub media: MediaConfig,
    pub sessions: SessionsConfig,
    pub logging: LogConfig,
}

/// Signaling listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// UDP address the SIP listener binds
    pub listen_addr: SocketAddr,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5060)),
        }
    }
}

/// Cluster membership as seen by this node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// This node's instance id
    pub instance_id: String,
    /// Every instance of the cluster, this one included
    pub instances: Vec<String>,
    /// Hash ring points per instance
    pub virtual_nodes: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            instance_id: "instance1".to_string(),
            instances: vec![
                "instance1".to_string(),
                "instance2".to_string(),
                "instance3".to_string(),
            ],
            virtual_nodes: 100,
        }
    }
}

/// Media pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Address RTP sockets bind on
    pub rtp_bind_ip: IpAddr,
    /// RFC 4733 telephone-event payload type
    pub dtmf_payload_type: u8,
    /// Outbound queue capacity per conference participant
    pub participant_queue_capacity: usize,
    /// Codec name of conference audio
    pub conference_codec: String,
    /// Received RTP packets buffered between the media sockets and the router
    pub rtp_queue_capacity: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            rtp_bind_ip: IpAddr::from([0, 0, 0, 0]),
            dtmf_payload_type: DEFAULT_DTMF_PAYLOAD_TYPE,
            participant_queue_capacity: 100,
            conference_codec: "PCMU".to_string(),
            rtp_queue_capacity: 1024,
        }
    }
}

impl MediaConfig {
    pub fn conference_codec(&self) -> Result<CodecType> {
        self.conference_codec
            .parse()
            .map_err(|e| CallEngineError::config(format!("media.conference_codec: {}", e)))
    }
}

/// Session lifecycle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Session retention from creation, in seconds
    pub retention_secs: u64,
    /// Cleanup sweep period, in seconds
    pub cleanup_interval_secs: u64,
    /// Time allowed for in-flight requests at shutdown, in seconds
    pub shutdown_grace_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 60 * 60,
            cleanup_interval_secs: 5 * 60,
            shutdown_grace_secs: 30,
        }
    }
}

impl SessionsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Logging output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level directive (`RUST_LOG` still applies on top)
    pub level: String,
    pub json: bool,
    pub file_info: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

impl NodeConfig {
    /// Read a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CallEngineError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CallEngineError::config(format!("invalid TOML: {}", e)))
    }

    /// Apply `SIPMESH_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SIPMESH_LISTEN_ADDR") {
            self.signaling.listen_addr = parse_env("SIPMESH_LISTEN_ADDR", &addr)?;
        }
        if let Some(id) = lookup("SIPMESH_INSTANCE_ID") {
            self.cluster.instance_id = id.trim().to_string();
        }
        if let Some(list) = lookup("SIPMESH_INSTANCES") {
            self.cluster.instances = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(count) = lookup("SIPMESH_VIRTUAL_NODES") {
            self.cluster.virtual_nodes = parse_env("SIPMESH_VIRTUAL_NODES", &count)?;
        }
        if let Some(pt) = lookup("SIPMESH_DTMF_PAYLOAD_TYPE") {
            self.media.dtmf_payload_type = parse_env("SIPMESH_DTMF_PAYLOAD_TYPE", &pt)?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster.instance_id.is_empty() {
            return Err(CallEngineError::config("cluster.instance_id cannot be empty"));
        }
        if self.cluster.instances.is_empty() {
            return Err(CallEngineError::config("cluster.instances cannot be empty"));
        }
        if !self.cluster.instances.contains(&self.cluster.instance_id) {
            return Err(CallEngineError::config(format!(
                "cluster.instance_id {} is not listed in cluster.instances",
                self.cluster.instance_id
            )));
        }
        if self.cluster.virtual_nodes == 0 {
            return Err(CallEngineError::config("cluster.virtual_nodes must be greater than 0"));
        }
        if self.media.dtmf_payload_type > 127 {
            return Err(CallEngineError::config("media.dtmf_payload_type must fit in 7 bits"));
        }
        if self.media.participant_queue_capacity == 0 {
            return Err(CallEngineError::config(
                "media.participant_queue_capacity must be greater than 0",
            ));
        }
        if self.media.rtp_queue_capacity == 0 {
            return Err(CallEngineError::config("media.rtp_queue_capacity must be greater than 0"));
        }
        self.media.conference_codec()?;
        if self.sessions.cleanup_interval_secs == 0 {
            return Err(CallEngineError::config("sessions.cleanup_interval_secs must be greater than 0"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CallEngineError::config(format!("{}={:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.signaling.listen_addr.port(), 5060);
        assert_eq!(config.cluster.virtual_nodes, 100);
        assert_eq!(config.media.dtmf_payload_type, 101);
        assert_eq!(config.sessions.retention(), Duration::from_secs(86400));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            [cluster]
            instance_id = "b"
            instances = ["a", "b"]

            [media]
            dtmf_payload_type = 96
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.cluster.instance_id, "b");
        assert_eq!(config.cluster.virtual_nodes, 100);
        assert_eq!(config.media.dtmf_payload_type, 96);
        assert_eq!(config.media.conference_codec, "PCMU");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = NodeConfig::from_toml("[cluster\n").unwrap_err();
        assert!(matches!(err, CallEngineError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SIPMESH_LISTEN_ADDR", "127.0.0.1:5070"),
            ("SIPMESH_INSTANCE_ID", "node-b"),
            ("SIPMESH_INSTANCES", "node-a, node-b ,node-c"),
            ("SIPMESH_VIRTUAL_NODES", "50"),
            ("SIPMESH_DTMF_PAYLOAD_TYPE", "96"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.signaling.listen_addr, "127.0.0.1:5070".parse().unwrap());
        assert_eq!(config.cluster.instances, vec!["node-a", "node-b", "node-c"]);
        assert_eq!(config.cluster.virtual_nodes, 50);
        assert_eq!(config.media.dtmf_payload_type, 96);
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = NodeConfig::default();
        let err = config
            .apply_overrides(|key| (key == "SIPMESH_VIRTUAL_NODES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, CallEngineError::Config(_)));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = NodeConfig::default();
        config.cluster.instance_id = "elsewhere".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.cluster.virtual_nodes = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.media.conference_codec = "G729".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.media.rtp_queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
