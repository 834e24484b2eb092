//! Blocking HIL client acting with one user's credentials.

use bmi_core::config::BmiConfig;
use bmi_core::error::{BmiError, BmiResult};
use bmi_core::orchestrator::{FabricFactory, Session, SharedFabric};
use bmi_provider::FabricClient;
use log::{debug, info};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNic {
    #[serde(default)]
    pub label: String,
    pub macaddr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub nics: Vec<NodeNic>,
}

#[derive(Clone)]
pub struct HilClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HilClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> BmiResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BmiError::InvalidConfig("fabric.url must not be empty".into()));
        }
        // Ambient proxy settings are ignored.
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(timeout.min(Duration::from_secs(15)))
            .timeout(timeout)
            .build()
            .map_err(|err| BmiError::Fabric(format!("unable to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn node(&self, node: &str) -> BmiResult<NodeInfo> {
        let path = format!("/node/{node}");
        let response = self.send("GET", &path, self.http.get(self.url(&path)))?;
        response
            .json()
            .map_err(|err| BmiError::Fabric(format!("GET {path}: unreadable node record: {err}")))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        request: RequestBuilder,
    ) -> BmiResult<reqwest::blocking::Response> {
        debug!("HIL {method} {path}");
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(|err| BmiError::Fabric(format!("{method} {path}: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        let detail = if body.trim().is_empty() {
            status.to_string()
        } else {
            format!("{status}: {}", body.trim())
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BmiError::Authorization(
                format!("{method} {path} rejected for {}: {detail}", self.username),
            )),
            _ => Err(BmiError::Fabric(format!("{method} {path} returned {detail}"))),
        }
    }

    fn post_network(&self, node: &str, nic: &str, action: &str, network: &str) -> BmiResult<()> {
        let path = format!("/node/{node}/nic/{nic}/{action}");
        let request = self
            .http
            .post(self.url(&path))
            .json(&json!({ "network": network }));
        self.send("POST", &path, request)?;
        Ok(())
    }
}

impl std::fmt::Debug for HilClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HilClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl FabricClient for HilClient {
    type Error = BmiError;

    fn attach_node(&self, node: &str, network: &str, nic: &str) -> BmiResult<()> {
        self.post_network(node, nic, "connect_network", network)?;
        info!("attached {node}/{nic} to {network}");
        Ok(())
    }

    fn detach_node(&self, node: &str, network: &str, nic: &str) -> BmiResult<()> {
        self.post_network(node, nic, "detach_network", network)?;
        info!("detached {node}/{nic} from {network}");
        Ok(())
    }

    /// MAC of the node's first interface, which is the one it PXE boots from.
    fn node_mac_addr(&self, node: &str) -> BmiResult<String> {
        self.node(node)?
            .nics
            .into_iter()
            .next()
            .map(|nic| nic.macaddr)
            .ok_or_else(|| BmiError::Fabric(format!("node {node} has no network interfaces")))
    }

    fn validate_project(&self, project: &str) -> BmiResult<()> {
        let path = format!("/project/{project}/nodes");
        self.send("GET", &path, self.http.get(self.url(&path)))?;
        Ok(())
    }
}

/// Builds a `HilClient` per session, acting with the caller's credentials.
pub fn session_factory(config: &BmiConfig) -> FabricFactory {
    let base_url = config.fabric.url.clone();
    let timeout = Duration::from_secs(config.fabric.timeout_secs);
    Arc::new(move |session: &Session| -> BmiResult<SharedFabric> {
        let client = HilClient::new(&base_url, &session.username, &session.password, timeout)?;
        Ok(Arc::new(client))
    })
}
