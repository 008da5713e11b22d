//! Core types for KubeGrid discovery

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Standard port a grid member listens on
pub const DEFAULT_GRID_PORT: u16 = 5701;

/// Per-address metadata key whose value overrides the default port
pub const SERVICE_PORT_KEY: &str = "kubegrid-service-port";

/// Opaque per-node metadata, passed through verbatim from the backing source
pub type NodeMetadata = HashMap<String, Value>;

/// A candidate cluster peer produced by one discovery round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredNode {
    /// Resolved address; `None` when resolution failed and the node must be skipped
    address: Option<IpAddr>,
    port: u16,
    metadata: NodeMetadata,
}

impl DiscoveredNode {
    pub fn new(address: Option<IpAddr>, port: u16, metadata: NodeMetadata) -> Self {
        Self {
            address,
            port,
            metadata,
        }
    }

    /// Node on the default grid port with no metadata
    pub fn with_default_port(address: IpAddr) -> Self {
        Self::new(Some(address), DEFAULT_GRID_PORT, NodeMetadata::new())
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// Socket address to connect to, if the node is usable
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address.map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for DiscoveredNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket_addr() {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "<unresolved>:{}", self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_node() {
        let node = DiscoveredNode::with_default_port("10.0.0.1".parse().unwrap());
        assert_eq!(node.port(), 5701);
        assert!(node.metadata().is_empty());
        assert_eq!(node.socket_addr(), Some("10.0.0.1:5701".parse().unwrap()));
    }

    #[test]
    fn test_unresolved_node_has_no_socket_addr() {
        let node = DiscoveredNode::new(None, 5702, NodeMetadata::new());
        assert_eq!(node.socket_addr(), None);
        assert_eq!(node.to_string(), "<unresolved>:5702");
    }
}
