//! Tenant control endpoint — the remote commands a swap issues.
//!
//! Wire format of [`HttpTenantControl`]:
//!
//! | Command | Request | Response |
//! |---|---|---|
//! | pull | `POST /update/pull {"version"}` | 2xx |
//! | prepare | `POST /update/prepare {"timeout_secs"}` | `{"drained", "in_flight"}` |
//! | checkpoint | `POST /update/checkpoint` | `{"checkpoint"}` |
//! | swap | `POST /update/swap {"version"}` | 2xx |
//! | health | `GET /health` | 2xx when healthy |

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::checker::ProbeResult;
use crate::error::{ControlError, ControlResult};

/// Reply to `prepare_for_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// The agent stopped accepting work and finished everything in flight.
    pub drained: bool,
    /// Operations still running when the agent replied.
    #[serde(default)]
    pub in_flight: u64,
}

/// Commands a worker issues against one tenant's runtime.
pub trait TenantControl: Send + Sync {
    /// Fetch the image for `version` without starting it.
    fn pull_image(&self, tenant: &str, version: &str)
    -> impl Future<Output = ControlResult<()>> + Send;

    /// Stop taking new work and finish in-flight work within `timeout`.
    fn prepare_for_update(
        &self,
        tenant: &str,
        timeout: Duration,
    ) -> impl Future<Output = ControlResult<DrainReport>> + Send;

    /// Persist resumable state; returns where it was written.
    fn save_checkpoint(&self, tenant: &str) -> impl Future<Output = ControlResult<String>> + Send;

    /// Stop the running instance and start `version`.
    fn swap_to(&self, tenant: &str, version: &str)
    -> impl Future<Output = ControlResult<()>> + Send;

    fn poll_health(&self, tenant: &str) -> impl Future<Output = ProbeResult> + Send;
}

/// HTTP/1.1 client for per-tenant control endpoints.
#[derive(Debug, Clone)]
pub struct HttpTenantControl {
    /// Base URL with a `{tenant}` placeholder.
    endpoint_template: String,
    request_timeout: Duration,
}

impl HttpTenantControl {
    pub fn new(endpoint_template: &str, request_timeout: Duration) -> Self {
        Self {
            endpoint_template: endpoint_template.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// Base URL for a tenant.
    pub fn endpoint_for(&self, tenant: &str) -> String {
        self.endpoint_template.replace("{tenant}", tenant)
    }

    /// `host:port` to dial for a tenant.
    fn address_for(&self, tenant: &str) -> ControlResult<String> {
        let base = self.endpoint_for(tenant);
        let uri: http::Uri = base
            .parse()
            .map_err(|_| ControlError::InvalidEndpoint(base.clone()))?;
        let host = uri
            .host()
            .ok_or_else(|| ControlError::InvalidEndpoint(base.clone()))?;
        Ok(format!("{host}:{}", uri.port_u16().unwrap_or(80)))
    }

    /// Send one request and return the response status and body.
    async fn send(
        &self,
        tenant: &str,
        method: http::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ControlResult<(http::StatusCode, Bytes)> {
        let address = self.address_for(tenant)?;
        let uri = format!("{}{path}", self.endpoint_for(tenant));

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .map_err(|e| ControlError::Connect {
                    address: address.clone(),
                    reason: e.to_string(),
                })?;
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ControlError::Connect {
                    address: address.clone(),
                    reason: e.to_string(),
                })?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let payload = match &body {
                Some(v) => Bytes::from(v.to_string()),
                None => Bytes::new(),
            };
            let req = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", &address)
                .header("user-agent", "fleet-sidecar/0.1")
                .header("content-type", "application/json")
                .body(Full::new(payload))
                .map_err(|e| ControlError::Request {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ControlError::Request {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ControlError::Request {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?
                .to_bytes();
            Ok((status, bytes))
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%uri, "control request timed out");
                Err(ControlError::Timeout {
                    path: path.to_string(),
                })
            }
        }
    }

    /// POST and require a 2xx.
    async fn post(
        &self,
        tenant: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ControlResult<Bytes> {
        let (status, bytes) = self.send(tenant, http::Method::POST, path, body).await?;
        if !status.is_success() {
            return Err(ControlError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, bytes: &[u8]) -> ControlResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ControlError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Deserialize)]
struct CheckpointReply {
    checkpoint: String,
}

impl TenantControl for HttpTenantControl {
    async fn pull_image(&self, tenant: &str, version: &str) -> ControlResult<()> {
        self.post(tenant, "/update/pull", Some(json!({ "version": version })))
            .await
            .map(|_| ())
    }

    async fn prepare_for_update(&self, tenant: &str, timeout: Duration) -> ControlResult<DrainReport> {
        let path = "/update/prepare";
        let bytes = self
            .post(tenant, path, Some(json!({ "timeout_secs": timeout.as_secs() })))
            .await?;
        decode(path, &bytes)
    }

    async fn save_checkpoint(&self, tenant: &str) -> ControlResult<String> {
        let path = "/update/checkpoint";
        let bytes = self.post(tenant, path, None).await?;
        Ok(decode::<CheckpointReply>(path, &bytes)?.checkpoint)
    }

    async fn swap_to(&self, tenant: &str, version: &str) -> ControlResult<()> {
        self.post(tenant, "/update/swap", Some(json!({ "version": version })))
            .await
            .map(|_| ())
    }

    async fn poll_health(&self, tenant: &str) -> ProbeResult {
        match self.send(tenant, http::Method::GET, "/health", None).await {
            Ok((status, _)) if status.is_success() => ProbeResult::Healthy,
            Ok((status, _)) => {
                debug!(%tenant, %status, "health probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(%tenant, error = %e, "health probe failed");
                ProbeResult::Failed
            }
        }
    }
}
