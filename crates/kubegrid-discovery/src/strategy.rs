//! Kubernetes discovery strategy
//!
//! The membership engine drives a strategy through a strict lifecycle:
//! `start`, zero or more `discover_nodes` rounds, then `destroy`. Rounds are expected to be
//! issued one at a time; the strategy does no internal locking.

use crate::address::{HostResolver, SystemHostResolver};
use crate::api::{EndpointsApi, HttpEndpointsClient};
use crate::dns::DnsEndpointResolver;
use crate::service::{ServiceConfig, ServiceEndpointResolver};
use kubegrid_core::{
    DiscoveredNode, DiscoveryError, PropertyMap, PropertyResolver, Result, CONFIGURATION_PROPERTIES,
    DEFAULT_KUBERNETES_MASTER, KUBERNETES_MASTER_URL, KUBERNETES_SYSTEM_PREFIX, NAMESPACE,
    SERVICE_DNS, SERVICE_NAME,
};

/// Which backing source a strategy resolves against, decided once at construction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolverConfig {
    Dns { service_dns: String },
    Service(ServiceConfig),
}

impl ResolverConfig {
    /// Read the discovery properties and pick a resolver shape.
    ///
    /// `service-dns` takes precedence over `service-name` + `namespace`.
    pub fn from_properties(resolver: &PropertyResolver, properties: &PropertyMap) -> Result<Self> {
        let prefix = Some(KUBERNETES_SYSTEM_PREFIX);
        let service_dns = resolver.get_or_none(properties, prefix, Some(&SERVICE_DNS))?;
        let service_name = resolver.get_or_none(properties, prefix, Some(&SERVICE_NAME))?;
        let namespace = resolver.get_or_none(properties, prefix, Some(&NAMESPACE))?;
        let master_url = resolver.get_or_default(
            properties,
            prefix,
            Some(&KUBERNETES_MASTER_URL),
            DEFAULT_KUBERNETES_MASTER.to_string(),
        )?;

        tracing::info!(
            service_dns = ?service_dns,
            service_name = ?service_name,
            namespace = ?namespace,
            kubernetes_master = %master_url,
            "Kubernetes Discovery properties"
        );

        match (service_dns, service_name, namespace) {
            (Some(service_dns), _, _) => Ok(Self::Dns { service_dns }),
            (None, Some(service_name), Some(namespace)) => Ok(Self::Service(ServiceConfig {
                service_name,
                namespace,
                master_url,
            })),
            _ => Err(DiscoveryError::Configuration(
                "For kubernetes discovery either 'service-dns' or 'service-name' and 'namespace' must be set"
                    .to_string(),
            )),
        }
    }
}

/// The resolver selected for a strategy
pub enum EndpointResolver<C = HttpEndpointsClient, R = SystemHostResolver> {
    Dns(DnsEndpointResolver<R>),
    Service(ServiceEndpointResolver<C, R>),
}

impl<C: EndpointsApi, R: HostResolver> EndpointResolver<C, R> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dns(_) => "DnsEndpointResolver",
            Self::Service(_) => "ServiceEndpointResolver",
        }
    }

    /// Nothing is acquired at start; clients are created with the resolver
    pub fn start(&mut self) {}

    pub async fn resolve(&self) -> Result<Vec<DiscoveredNode>> {
        match self {
            Self::Dns(resolver) => resolver.resolve().await,
            Self::Service(resolver) => resolver.resolve().await,
        }
    }

    pub fn destroy(&mut self) {
        match self {
            Self::Dns(_) => {}
            Self::Service(resolver) => resolver.destroy(),
        }
    }
}

/// Discovery strategy handed to the membership engine
pub struct KubernetesDiscoveryStrategy<C = HttpEndpointsClient, R = SystemHostResolver> {
    resolver: EndpointResolver<C, R>,
    destroyed: bool,
}

impl KubernetesDiscoveryStrategy {
    /// Strategy reading overrides from the process environment
    pub fn new(properties: &PropertyMap) -> Result<Self> {
        Self::with_property_resolver(&PropertyResolver::default(), properties)
    }

    pub fn with_property_resolver(resolver: &PropertyResolver, properties: &PropertyMap) -> Result<Self> {
        let config = ResolverConfig::from_properties(resolver, properties)?;
        Self::from_config(config, SystemHostResolver, |service| {
            HttpEndpointsClient::in_cluster(&service.master_url)
        })
    }
}

impl<C: EndpointsApi, R: HostResolver> KubernetesDiscoveryStrategy<C, R> {
    /// Build the resolver for `config`; `connect` is only called for service discovery
    pub fn from_config<F>(config: ResolverConfig, host_resolver: R, connect: F) -> Result<Self>
    where
        F: FnOnce(&ServiceConfig) -> Result<C>,
    {
        let resolver = match config {
            ResolverConfig::Dns { service_dns } => {
                EndpointResolver::Dns(DnsEndpointResolver::new(service_dns, host_resolver))
            }
            ResolverConfig::Service(service) => {
                let client = connect(&service)?;
                EndpointResolver::Service(ServiceEndpointResolver::new(&service, client, host_resolver))
            }
        };

        tracing::info!(resolver = resolver.name(), "Kubernetes Discovery activated resolver");

        Ok(Self {
            resolver,
            destroyed: false,
        })
    }

    pub fn resolver_name(&self) -> &'static str {
        self.resolver.name()
    }

    pub fn start(&mut self) {
        self.resolver.start();
    }

    /// Run one discovery round
    pub async fn discover_nodes(&self) -> Result<Vec<DiscoveredNode>> {
        if self.destroyed {
            return Err(DiscoveryError::Destroyed);
        }
        self.resolver.resolve().await
    }

    /// Release held resources. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.resolver.destroy();
        tracing::info!(resolver = self.resolver.name(), "Kubernetes Discovery destroyed");
    }
}

/// Creates strategies and advertises the properties they understand
#[derive(Clone, Debug, Default)]
pub struct KubernetesDiscoveryStrategyFactory {
    property_resolver: PropertyResolver,
}

impl KubernetesDiscoveryStrategyFactory {
    pub fn new(property_resolver: PropertyResolver) -> Self {
        Self { property_resolver }
    }

    pub fn configuration_properties(&self) -> &'static [&'static str] {
        &CONFIGURATION_PROPERTIES
    }

    pub fn new_strategy(&self, properties: &PropertyMap) -> Result<KubernetesDiscoveryStrategy> {
        KubernetesDiscoveryStrategy::with_property_resolver(&self.property_resolver, properties)
    }
}
