//! Kubernetes API access for service endpoints

use kubegrid_core::{DiscoveryError, NodeMetadata, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Certificate, Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;

/// Bearer token mounted into every pod by the service account admission controller
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// CA bundle for the in-cluster API server certificate
pub const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Endpoints object of a service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsets: Option<Vec<EndpointSubset>>,
}

impl Endpoints {
    pub fn subsets(&self) -> &[EndpointSubset] {
        self.subsets.as_deref().unwrap_or_default()
    }
}

/// Addresses sharing the same ports and readiness
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EndpointSubset {
    /// Ready addresses only; not-ready ones are never discovered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<EndpointAddress>>,
}

impl EndpointSubset {
    pub fn addresses(&self) -> &[EndpointAddress] {
        self.addresses.as_deref().unwrap_or_default()
    }
}

/// One backing address of a service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EndpointAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Every other field attached by the platform, kept verbatim
    #[serde(flatten)]
    pub metadata: NodeMetadata,
}

/// Fetches the endpoints of a service
pub trait EndpointsApi: Send + Sync {
    /// `Ok(None)` when the endpoints object does not exist
    fn get_endpoints(
        &self,
        namespace: &str,
        service_name: &str,
    ) -> impl Future<Output = Result<Option<Endpoints>>> + Send;

    /// Release the client; called once at shutdown
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Authenticated HTTP client for the Kubernetes API server
pub struct HttpEndpointsClient {
    client: Client,
    master_url: Url,
}

impl HttpEndpointsClient {
    /// Client authenticated with the pod's service account
    pub fn in_cluster(master_url: &str) -> Result<Self> {
        Self::from_token_file(
            master_url,
            Path::new(SERVICE_ACCOUNT_TOKEN_PATH),
            Path::new(SERVICE_ACCOUNT_CA_PATH),
        )
    }

    /// Client authenticated with the token in `token_path`.
    ///
    /// A missing CA bundle is tolerated; the system roots are used instead.
    pub fn from_token_file(master_url: &str, token_path: &Path, ca_path: &Path) -> Result<Self> {
        let token = read_account_token(token_path)?;
        let ca = load_ca_certificates(ca_path)?;
        Self::connect(master_url, &token, ca)
    }

    pub fn connect(master_url: &str, token: &str, ca: Vec<Certificate>) -> Result<Self> {
        let master_url = Url::parse(master_url).map_err(|e| {
            DiscoveryError::Configuration(format!("invalid kubernetes-master {:?}: {}", master_url, e))
        })?;
        if master_url.cannot_be_a_base() {
            return Err(DiscoveryError::Configuration(format!(
                "invalid kubernetes-master {:?}: not a base URL",
                master_url.as_str()
            )));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| DiscoveryError::InvalidCredential(e.to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let mut builder = Client::builder().default_headers(headers).no_proxy();
        for cert in ca {
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| DiscoveryError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        tracing::info!(master_url = %master_url, token_len = token.len(), "Kubernetes API client created");

        Ok(Self { client, master_url })
    }

    pub fn master_url(&self) -> &str {
        self.master_url.as_str()
    }

    /// Build URL for the endpoints object of a service.
    ///
    /// Names are percent-encoded as single path segments.
    fn url(&self, namespace: &str, service_name: &str) -> Url {
        let mut url = self.master_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "v1", "namespaces", namespace, "endpoints", service_name]);
        }
        url
    }
}

impl EndpointsApi for HttpEndpointsClient {
    async fn get_endpoints(&self, namespace: &str, service_name: &str) -> Result<Option<Endpoints>> {
        let url = self.url(namespace, service_name);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DiscoveryError::BackingSource(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(namespace, service_name, "Endpoints not found");
            return Ok(None);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::BackingSource(format!(
                "GET {}: HTTP {}: {}",
                url, status, text
            )));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| DiscoveryError::BackingSource(format!("GET {}: invalid body: {}", url, e)))
    }

    fn close(self) {
        tracing::debug!(master_url = %self.master_url, "Kubernetes API client closed");
    }
}

/// Read the bearer token, dropping trailing whitespace such as the newline many secret
/// mounts end with.
pub fn read_account_token(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Credential {
        path: path.to_path_buf(),
        source,
    })?;

    let token = raw.trim_end();
    if token.is_empty() {
        return Err(DiscoveryError::InvalidCredential(format!(
            "token file {:?} is empty",
            path
        )));
    }
    Ok(token.to_string())
}

/// Every certificate in the CA bundle; a rotating cluster mounts more than one
fn load_ca_certificates(path: &Path) -> Result<Vec<Certificate>> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No CA bundle, using system roots");
        return Ok(Vec::new());
    }

    let pem = std::fs::read(path)?;
    Certificate::from_pem_bundle(&pem)
        .map_err(|e| DiscoveryError::Configuration(format!("invalid CA bundle {:?}: {}", path, e)))
}
