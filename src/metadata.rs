//! Metadata Source
//!
//! Flat service-discovery records and the client that fetches them from the
//! platform's metadata endpoint. The endpoint exposes one JSON collection per
//! entity type plus the identity of the container this process runs in and an
//! opaque version token that changes whenever the discovery data changes.

use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A host as reported by the metadata endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostRecord {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A stack (named grouping of services) as reported by the metadata endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StackRecord {
    pub uuid: String,
    pub name: String,
}

/// A service as reported by the metadata endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceRecord {
    pub uuid: String,
    pub name: String,
    pub stack_name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub ports: Vec<String>,
    /// Name of the primary service in this service's deployment.
    #[serde(default)]
    pub primary_service_name: String,
    /// Sidekick service names declared by a primary service.
    #[serde(default)]
    pub sidekicks: Vec<String>,
}

/// A container as reported by the metadata endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerRecord {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub stack_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub host_uuid: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub health_state: String,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<String>,
}

/// The ambient identity of the container this process runs in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelfRecord {
    pub uuid: String,
    #[serde(default)]
    pub stack_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub host_uuid: String,
}

/// Supplies flat discovery records and a change token.
///
/// Implemented over HTTP for production use; tests substitute an in-memory
/// source.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn get_hosts(&self) -> Result<Vec<HostRecord>, FetchError>;
    async fn get_stacks(&self) -> Result<Vec<StackRecord>, FetchError>;
    async fn get_services(&self) -> Result<Vec<ServiceRecord>, FetchError>;
    async fn get_containers(&self) -> Result<Vec<ContainerRecord>, FetchError>;
    async fn get_self_container(&self) -> Result<SelfRecord, FetchError>;

    /// Opaque token that changes whenever the discovery data changes.
    async fn get_version(&self) -> Result<String, FetchError>;
}

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait between startup probes of the metadata endpoint.
const WAIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// HTTP client for the metadata endpoint.
pub struct HttpMetadataSource {
    client: Client,
    base_url: String,
}

impl HttpMetadataSource {
    /// Create a client for the given endpoint and API version.
    ///
    /// The version becomes a path segment, so `http://metadata` with version
    /// `latest` queries `http://metadata/latest/...`.
    pub fn new(metadata_url: &str, metadata_version: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;

        let base_url = format!(
            "{}/{}",
            metadata_url.trim_end_matches('/'),
            metadata_version.trim_matches('/')
        );

        Ok(Self { client, base_url })
    }

    /// Create a client and block until the endpoint answers a version probe.
    pub async fn connect_and_wait(
        metadata_url: &str,
        metadata_version: &str,
        max_attempts: usize,
    ) -> Result<Self, FetchError> {
        let source = Self::new(metadata_url, metadata_version)?;

        info!(url = %source.base_url, "Connecting to metadata endpoint");

        for attempt in 1..=max_attempts {
            match source.get_version().await {
                Ok(version) => {
                    info!(%version, "Metadata endpoint is ready");
                    return Ok(source);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, "Metadata endpoint not ready: {}", e);
                }
            }
            tokio::time::sleep(WAIT_RETRY_DELAY).await;
        }

        Err(FetchError::Unavailable {
            url: source.base_url,
            attempts: max_attempts,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "Fetching metadata");

        let response = self.client.get(&url).send().await?.error_for_status()?;

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Malformed(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn get_hosts(&self) -> Result<Vec<HostRecord>, FetchError> {
        self.get_json("hosts").await
    }

    async fn get_stacks(&self) -> Result<Vec<StackRecord>, FetchError> {
        self.get_json("stacks").await
    }

    async fn get_services(&self) -> Result<Vec<ServiceRecord>, FetchError> {
        self.get_json("services").await
    }

    async fn get_containers(&self) -> Result<Vec<ContainerRecord>, FetchError> {
        self.get_json("containers").await
    }

    async fn get_self_container(&self) -> Result<SelfRecord, FetchError> {
        self.get_json("self/container").await
    }

    async fn get_version(&self) -> Result<String, FetchError> {
        self.get_json("version").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_joins_version_segment() {
        let source = HttpMetadataSource::new("http://metadata.internal/", "latest").unwrap();
        assert_eq!(source.base_url, "http://metadata.internal/latest");

        let source = HttpMetadataSource::new("http://metadata.internal", "2015-12-19").unwrap();
        assert_eq!(source.base_url, "http://metadata.internal/2015-12-19");
    }

    #[test]
    fn test_container_record_defaults() {
        let record: ContainerRecord = serde_json::from_str(
            r#"{"uuid": "c1", "name": "app-1"}"#,
        )
        .unwrap();
        assert_eq!(record.uuid, "c1");
        assert_eq!(record.create_index, 0);
        assert!(record.labels.is_empty());
        assert!(record.ports.is_empty());
    }

    #[test]
    fn test_service_record_metadata_is_arbitrary_json() {
        let record: ServiceRecord = serde_json::from_str(
            r#"{
                "uuid": "s1",
                "name": "app",
                "stack_name": "web",
                "metadata": {"replicas": 3, "flags": ["a", "b"]}
            }"#,
        )
        .unwrap();
        assert_eq!(record.metadata["replicas"], serde_json::json!(3));
        assert_eq!(record.metadata["flags"], serde_json::json!(["a", "b"]));
    }
}
