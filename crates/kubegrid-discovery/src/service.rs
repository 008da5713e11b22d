//! Service endpoint resolution through the Kubernetes API

use crate::address::{AddressMapper, HostResolver, SystemHostResolver};
use crate::api::{EndpointsApi, HttpEndpointsClient};
use kubegrid_core::{
    DiscoveredNode, DiscoveryError, NodeMetadata, Result, DEFAULT_GRID_PORT, SERVICE_PORT_KEY,
};
use serde_json::Value;

/// Service coordinates for API-based discovery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_name: String,
    pub namespace: String,
    pub master_url: String,
}

/// Resolves a service's ready endpoint addresses.
///
/// The API client is owned exclusively by the resolver: created at construction and
/// released in [`destroy`](Self::destroy).
pub struct ServiceEndpointResolver<C = HttpEndpointsClient, R = SystemHostResolver> {
    service_name: String,
    namespace: String,
    client: Option<C>,
    mapper: AddressMapper<R>,
}

impl ServiceEndpointResolver {
    /// Resolver authenticated with the pod's service account token.
    ///
    /// Fails immediately if the token file cannot be read.
    pub fn in_cluster(config: &ServiceConfig) -> Result<Self> {
        tracing::info!(master_url = %config.master_url, "Kubernetes Master");
        let client = HttpEndpointsClient::in_cluster(&config.master_url)?;
        Ok(Self::new(config, client, SystemHostResolver))
    }
}

impl<C: EndpointsApi, R: HostResolver> ServiceEndpointResolver<C, R> {
    pub fn new(config: &ServiceConfig, client: C, resolver: R) -> Self {
        Self {
            service_name: config.service_name.clone(),
            namespace: config.namespace.clone(),
            client: Some(client),
            mapper: AddressMapper::new(resolver),
        }
    }

    /// One node per ready address across all subsets.
    ///
    /// A missing endpoints object is an empty round. API failures propagate. Addresses that
    /// cannot be mapped are left out of the round.
    pub async fn resolve(&self) -> Result<Vec<DiscoveredNode>> {
        let client = self.client.as_ref().ok_or(DiscoveryError::Destroyed)?;

        let Some(endpoints) = client
            .get_endpoints(&self.namespace, &self.service_name)
            .await?
        else {
            tracing::debug!(
                namespace = %self.namespace,
                service_name = %self.service_name,
                "No endpoints for service"
            );
            return Ok(Vec::new());
        };

        let mut nodes = Vec::new();
        for subset in endpoints.subsets() {
            for endpoint in subset.addresses() {
                let Some(address) = self.mapper.map_address(endpoint.ip.as_deref()).await else {
                    continue;
                };

                let port = service_port(&endpoint.metadata);
                nodes.push(DiscoveredNode::new(
                    Some(address),
                    port,
                    endpoint.metadata.clone(),
                ));
            }
        }

        tracing::debug!(
            namespace = %self.namespace,
            service_name = %self.service_name,
            count = nodes.len(),
            "Resolved service endpoints"
        );
        Ok(nodes)
    }

    /// Close the API client. Later calls are no-ops.
    pub fn destroy(&mut self) {
        if let Some(client) = self.client.take() {
            client.close();
        }
    }
}

/// Port from the service-port metadata key, else the default grid port
pub fn service_port(metadata: &NodeMetadata) -> u16 {
    let Some(value) = metadata.get(SERVICE_PORT_KEY) else {
        return DEFAULT_GRID_PORT;
    };

    let port = match value {
        Value::String(s) => s.trim().parse::<u16>().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    };

    match port.filter(|p| *p != 0) {
        Some(port) => port,
        None => {
            tracing::warn!(%value, "Ignoring invalid {}, using default port", SERVICE_PORT_KEY);
            DEFAULT_GRID_PORT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoints;
    use serde_json::json;
    use std::io;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Reply {
        Found(Value),
        Missing,
        Unavailable,
    }

    struct FakeApi {
        reply: Reply,
        closed: Arc<AtomicUsize>,
    }

    impl EndpointsApi for FakeApi {
        async fn get_endpoints(&self, _namespace: &str, _service_name: &str) -> Result<Option<Endpoints>> {
            match &self.reply {
                Reply::Found(body) => Ok(Some(serde_json::from_value(body.clone()).unwrap())),
                Reply::Missing => Ok(None),
                Reply::Unavailable => Err(DiscoveryError::BackingSource("connection refused".into())),
            }
        }

        fn close(self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoDns;

    impl HostResolver for NoDns {
        async fn lookup_ips(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no dns in tests"))
        }
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            service_name: "hz".into(),
            namespace: "default".into(),
            master_url: "https://kubernetes.default.svc".into(),
        }
    }

    fn resolver(reply: Reply) -> (ServiceEndpointResolver<FakeApi, NoDns>, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let api = FakeApi {
            reply,
            closed: closed.clone(),
        };
        (ServiceEndpointResolver::new(&config(), api, NoDns), closed)
    }

    #[tokio::test]
    async fn test_port_override_from_metadata() {
        let (resolver, _) = resolver(Reply::Found(json!({
            "subsets": [{
                "addresses": [
                    {"ip": "10.0.0.1"},
                    {"ip": "10.0.0.2", "kubegrid-service-port": "5702"}
                ]
            }]
        })));

        let nodes = resolver.resolve().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].socket_addr(), Some("10.0.0.1:5701".parse().unwrap()));
        assert!(nodes[0].metadata().is_empty());
        assert_eq!(nodes[1].socket_addr(), Some("10.0.0.2:5702".parse().unwrap()));
        assert_eq!(
            nodes[1].metadata().get(SERVICE_PORT_KEY),
            Some(&json!("5702"))
        );
    }

    #[tokio::test]
    async fn test_counts_addresses_across_subsets() {
        let (resolver, _) = resolver(Reply::Found(json!({
            "subsets": [
                {"addresses": [{"ip": "10.0.0.1"}, {"ip": "10.0.0.2"}]},
                {"addresses": [{"ip": "10.0.1.1"}]},
                {"notReadyAddresses": [{"ip": "10.0.2.1"}]}
            ]
        })));

        assert_eq!(resolver.resolve().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unmappable_address_is_skipped() {
        let (resolver, _) = resolver(Reply::Found(json!({
            "subsets": [{
                "addresses": [
                    {"ip": "pod.unresolvable.invalid"},
                    {"hostname": "no-ip"},
                    {"ip": "10.0.0.3", "targetRef": {"kind": "Pod", "name": "hz-2"}}
                ]
            }]
        })));

        let nodes = resolver.resolve().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].address(), Some("10.0.0.3".parse().unwrap()));
        assert_eq!(
            nodes[0].metadata().get("targetRef"),
            Some(&json!({"kind": "Pod", "name": "hz-2"}))
        );
    }

    #[tokio::test]
    async fn test_missing_endpoints_is_empty() {
        let (resolver, _) = resolver(Reply::Missing);
        assert!(resolver.resolve().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_api_outage_propagates() {
        let (resolver, _) = resolver(Reply::Unavailable);
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::BackingSource(_)));
    }

    #[tokio::test]
    async fn test_destroy_closes_client_once() {
        let (mut resolver, closed) = resolver(Reply::Missing);
        resolver.destroy();
        resolver.destroy();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(matches!(resolver.resolve().await, Err(DiscoveryError::Destroyed)));
    }

    #[test]
    fn test_service_port_values() {
        let port_of = |value: Value| {
            let mut metadata = NodeMetadata::new();
            metadata.insert(SERVICE_PORT_KEY.to_string(), value);
            service_port(&metadata)
        };

        assert_eq!(service_port(&NodeMetadata::new()), DEFAULT_GRID_PORT);
        assert_eq!(port_of(json!("5710")), 5710);
        assert_eq!(port_of(json!(5711)), 5711);
        assert_eq!(port_of(json!("abc")), DEFAULT_GRID_PORT);
        assert_eq!(port_of(json!("0")), DEFAULT_GRID_PORT);
        assert_eq!(port_of(json!(70000)), DEFAULT_GRID_PORT);
        assert_eq!(port_of(json!(true)), DEFAULT_GRID_PORT);
    }

    #[test]
    fn test_missing_token_is_fatal() {
        // Outside a pod the service account token is not mounted.
        if std::path::Path::new(crate::api::SERVICE_ACCOUNT_TOKEN_PATH).exists() {
            return;
        }
        let err = ServiceEndpointResolver::in_cluster(&config()).err().unwrap();
        assert!(matches!(err, DiscoveryError::Credential { .. }));
    }
}
