//! VM control
//!
//! Thin client for the three compute operations the gate exposes. Start and
//! power-off are long-running on the Azure side; the gate reports that the
//! request was accepted and does not poll the operation to completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::credential::TokenProvider;
use crate::error::{Error, Result};

/// Azure Resource Manager endpoint
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";

/// Compute API version
pub const COMPUTE_API_VERSION: &str = "2023-09-01";

/// Timeout for a single management call
pub const COMPUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations on the managed VM
///
/// Payloads are passed through to the caller unchanged.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VmControl: Send + Sync {
    /// Request the VM to start
    async fn start(&self) -> Result<serde_json::Value>;

    /// Request the VM to power off
    async fn power_off(&self) -> Result<serde_json::Value>;

    /// Read the VM instance view
    async fn instance_view(&self) -> Result<serde_json::Value>;
}

/// Subscription / resource group / VM name triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmTarget {
    /// Azure subscription id
    pub subscription_id: String,
    /// Resource group holding the VM
    pub resource_group: String,
    /// VM name
    pub vm_name: String,
}

/// One entry of `instanceView.statuses`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Status code, e.g. `PowerState/running`
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable status, e.g. `VM running`
    #[serde(default)]
    pub display_status: Option<String>,
    /// Timestamp of the status, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceStatus>,
}

/// Display status of the first `PowerState/*` entry, or `"Unknown"`
pub fn power_state(statuses: &[InstanceStatus]) -> String {
    statuses
        .iter()
        .find(|s| {
            s.code
                .as_deref()
                .is_some_and(|c| c.to_ascii_lowercase().starts_with("powerstate/"))
        })
        .and_then(|s| s.display_status.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// VM control through Azure Resource Manager
pub struct ArmComputeClient {
    target: VmTarget,
    tokens: Arc<dyn TokenProvider>,
    base_url: Url,
    http_client: reqwest::Client,
}

impl ArmComputeClient {
    /// Create a client against the public management endpoint
    pub fn new(target: VmTarget, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::with_base_url(target, tokens, DEFAULT_MANAGEMENT_URL)
    }

    /// Create a client against a specific management endpoint
    pub fn with_base_url(
        target: VmTarget,
        tokens: Arc<dyn TokenProvider>,
        base_url: &str,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid management URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Management URL cannot be a base: {}",
                base_url
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(COMPUTE_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            target,
            tokens,
            base_url,
            http_client,
        })
    }

    fn vm_url(&self, operation: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("subscriptions")
                .push(&self.target.subscription_id)
                .push("resourceGroups")
                .push(&self.target.resource_group)
                .extend(["providers", "Microsoft.Compute", "virtualMachines"])
                .push(&self.target.vm_name)
                .push(operation);
        }
        url.query_pairs_mut()
            .append_pair("api-version", COMPUTE_API_VERSION);
        url
    }

    async fn call(&self, method: Method, operation: &str) -> Result<(u16, String)> {
        let token = self.tokens.token().await?;
        let url = self.vm_url(operation);

        debug!(method = %method, operation = %operation, vm = %self.target.vm_name, "Calling compute API");

        let mut request = self.http_client.request(method.clone(), url).bearer_auth(token);
        if method == Method::POST {
            request = request.header(reqwest::header::CONTENT_LENGTH, "0");
        }

        let response = request.send().await.map_err(|e| Error::UpstreamControl {
            status: 0,
            body: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::UpstreamControl {
                status: status.as_u16(),
                body,
            });
        }
        Ok((status.as_u16(), body))
    }

    async fn lifecycle(&self, operation: &str, verb: &str) -> Result<serde_json::Value> {
        let (status, _) = self.call(Method::POST, operation).await?;
        let vm = &self.target.vm_name;
        info!(vm = %vm, operation = %operation, status = status, "VM request accepted");
        Ok(json!({
            "vm": vm,
            "message": format!("VM '{}' {} request sent.", vm, verb),
            "statusCode": status,
        }))
    }
}

#[async_trait]
impl VmControl for ArmComputeClient {
    async fn start(&self) -> Result<serde_json::Value> {
        self.lifecycle("start", "start").await
    }

    async fn power_off(&self) -> Result<serde_json::Value> {
        self.lifecycle("powerOff", "stop").await
    }

    async fn instance_view(&self) -> Result<serde_json::Value> {
        let (_, body) = self.call(Method::GET, "instanceView").await?;
        let view: InstanceView = serde_json::from_str(&body).map_err(|e| Error::UpstreamControl {
            status: 200,
            body: format!("invalid instance view: {}", e),
        })?;

        Ok(json!({
            "vm": self.target.vm_name,
            "powerState": power_state(&view.statuses),
            "statuses": view.statuses,
        }))
    }
}
