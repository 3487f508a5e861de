//! Thin REST client for the serving platform API.
//!
//! One client per region, matching the platform's regional endpoints.
//! Every call is a single HTTP/1 request with a hard timeout; connection
//! setup failures, timeouts, and 5xx responses all surface as
//! [`StoreError::Transient`] so the next sweep retries.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tracing::debug;

use crate::service::Service;
use crate::store::{ServiceStore, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const API_PREFIX: &str = "/apis/serving.ramp.dev/v1";

/// REST client for one region of the serving platform.
#[derive(Debug, Clone)]
pub struct ServingClient {
    /// `host:port` of the platform API endpoint.
    authority: String,
    region: String,
}

#[derive(Deserialize)]
struct ServiceList {
    #[serde(default)]
    items: Vec<Service>,
}

#[derive(Deserialize)]
struct RegionList {
    #[serde(default)]
    regions: Vec<String>,
}

impl ServingClient {
    /// Create a client for `region` against the given API endpoint.
    pub fn new(authority: &str, region: &str) -> Self {
        Self {
            authority: authority.to_string(),
            region: region.to_string(),
        }
    }

    /// A client for the same endpoint scoped to another region.
    pub fn for_region(&self, region: &str) -> Self {
        Self::new(&self.authority, region)
    }

    /// A client for discovery calls only (`list_services`,
    /// `list_regions`), which carry their region explicitly. Scope it
    /// with [`for_region`](Self::for_region) before any per-service call.
    pub fn discovery(authority: &str) -> Self {
        Self::new(authority, "")
    }

    fn service_path(&self, region: &str, project: &str, name: &str) -> String {
        format!("{API_PREFIX}/regions/{region}/projects/{project}/services/{name}")
    }

    fn list_path(&self, region: &str, project: &str, label_selector: &str) -> String {
        format!(
            "{API_PREFIX}/regions/{region}/projects/{project}/services?labelSelector={}",
            urlencoding::encode(label_selector)
        )
    }

    fn regions_path(&self, project: &str) -> String {
        format!("{API_PREFIX}/projects/{project}/regions")
    }

    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Bytes,
    ) -> Result<(StatusCode, Bytes), StoreError> {
        debug!(authority = %self.authority, %method, path = %path_and_query, "serving API request");

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.authority)
                .await
                .map_err(|e| {
                    StoreError::Transient(format!("connect {}: {e}", self.authority))
                })?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
                .await
                .map_err(|e| StoreError::Transient(format!("handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method(method)
                .uri(path_and_query)
                .header(http::header::HOST, &self.authority)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Full::new(body))
                .map_err(|e| StoreError::Transient(format!("build request: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| StoreError::Transient(format!("send request: {e}")))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| StoreError::Transient(format!("read response: {e}")))?
                .to_bytes();
            Ok((status, bytes))
        };

        match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "request to {} timed out",
                self.authority
            ))),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &Bytes) -> Result<T, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

fn check_status(status: StatusCode, subject: &str) -> Result<(), StoreError> {
    match status {
        StatusCode::NOT_FOUND => Err(StoreError::NotFound(subject.to_string())),
        StatusCode::CONFLICT => Err(StoreError::Conflict(subject.to_string())),
        s if s.is_success() => Ok(()),
        s => Err(StoreError::Transient(format!(
            "serving API returned {s} for {subject}"
        ))),
    }
}

#[async_trait]
impl ServiceStore for ServingClient {
    async fn get_service(&self, project: &str, name: &str) -> Result<Service, StoreError> {
        let path = self.service_path(&self.region, project, name);
        let (status, body) = self.request(Method::GET, &path, Bytes::new()).await?;
        check_status(status, name)?;
        Self::decode(&body)
    }

    async fn replace_service(
        &self,
        project: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, StoreError> {
        let path = self.service_path(&self.region, project, name);
        let payload = serde_json::to_vec(service)
            .map_err(|e| StoreError::Decode(format!("encode service: {e}")))?;
        let (status, body) = self
            .request(Method::PUT, &path, Bytes::from(payload))
            .await?;
        check_status(status, name)?;
        Self::decode(&body)
    }

    async fn list_services(
        &self,
        project: &str,
        region: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, StoreError> {
        let path = self.list_path(region, project, label_selector);
        let (status, body) = self.request(Method::GET, &path, Bytes::new()).await?;
        check_status(status, project)?;
        let list: ServiceList = Self::decode(&body)?;
        Ok(list.items)
    }

    async fn list_regions(&self, project: &str) -> Result<Vec<String>, StoreError> {
        let path = self.regions_path(project);
        let (status, body) = self.request(Method::GET, &path, Bytes::new()).await?;
        check_status(status, project)?;
        let list: RegionList = Self::decode(&body)?;
        Ok(list.regions)
    }
}
