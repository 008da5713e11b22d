//! DNS-based endpoint resolution
//!
//! Resolves a headless service name to every pod IP bound to it. Each address becomes one
//! node on the default grid port.

use crate::address::{HostResolver, SystemHostResolver};
use kubegrid_core::{DiscoveredNode, Result};

pub struct DnsEndpointResolver<R = SystemHostResolver> {
    service_dns: String,
    resolver: R,
}

impl<R: HostResolver> DnsEndpointResolver<R> {
    pub fn new(service_dns: impl Into<String>, resolver: R) -> Self {
        Self {
            service_dns: service_dns.into(),
            resolver,
        }
    }

    pub fn service_dns(&self) -> &str {
        &self.service_dns
    }

    /// Resolve the service name once.
    ///
    /// A name that cannot be resolved yields an empty round; the engine retries on its
    /// own schedule.
    pub async fn resolve(&self) -> Result<Vec<DiscoveredNode>> {
        match self.resolver.lookup_ips(&self.service_dns).await {
            Ok(ips) => {
                tracing::debug!(
                    service_dns = %self.service_dns,
                    count = ips.len(),
                    "Resolved service DNS"
                );
                Ok(ips.into_iter().map(DiscoveredNode::with_default_port).collect())
            }
            Err(e) => {
                tracing::warn!(
                    service_dns = %self.service_dns,
                    error = %e,
                    "Service DNS could not be resolved"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubegrid_core::DEFAULT_GRID_PORT;
    use std::io;
    use std::net::IpAddr;

    struct FixedRecords(io::Result<Vec<IpAddr>>);

    impl HostResolver for FixedRecords {
        async fn lookup_ips(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            match &self.0 {
                Ok(ips) => Ok(ips.clone()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_one_node_per_record() {
        let records: Vec<IpAddr> = vec![
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
        ];
        let resolver = DnsEndpointResolver::new(
            "hz-headless.default.svc.cluster.local",
            FixedRecords(Ok(records.clone())),
        );

        let nodes = resolver.resolve().await.unwrap();
        assert_eq!(nodes.len(), 3);
        for (node, ip) in nodes.iter().zip(&records) {
            assert_eq!(node.address(), Some(*ip));
            assert_eq!(node.port(), DEFAULT_GRID_PORT);
            assert!(node.metadata().is_empty());
        }
    }

    #[tokio::test]
    async fn test_no_records_is_empty() {
        let resolver = DnsEndpointResolver::new("hz-headless", FixedRecords(Ok(Vec::new())));
        assert!(resolver.resolve().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_is_empty() {
        let resolver = DnsEndpointResolver::new(
            "hz-headless",
            FixedRecords(Err(io::Error::new(io::ErrorKind::NotFound, "NXDOMAIN"))),
        );
        assert!(resolver.resolve().await.unwrap().is_empty());
    }
}
