//! Host name resolution and address mapping

use std::future::Future;
use std::io;
use std::net::IpAddr;

/// Resolves a host name to the IP addresses currently bound to it
pub trait HostResolver: Send + Sync {
    fn lookup_ips(&self, host: &str) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send;
}

/// Resolver using the operating system's name service (`getaddrinfo`)
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHostResolver;

impl HostResolver for SystemHostResolver {
    async fn lookup_ips(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Turns textual addresses into IPs, never failing the caller
#[derive(Clone, Debug, Default)]
pub struct AddressMapper<R = SystemHostResolver> {
    resolver: R,
}

impl<R: HostResolver> AddressMapper<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Map an IP literal or host name to an address.
    ///
    /// Empty input yields `None` silently; a name that cannot be resolved is logged and
    /// yields `None`. Callers skip the node in both cases.
    pub async fn map_address(&self, address: Option<&str>) -> Option<IpAddr> {
        let address = address.filter(|a| !a.is_empty())?;

        if let Ok(ip) = address.parse::<IpAddr>() {
            return Some(ip);
        }

        match self.resolver.lookup_ips(address).await {
            Ok(ips) => {
                let ip = ips.into_iter().next();
                if ip.is_none() {
                    tracing::warn!(address, "Address could not be resolved: no records");
                }
                ip
            }
            Err(e) => {
                tracing::warn!(address, error = %e, "Address could not be resolved");
                None
            }
        }
    }
}
