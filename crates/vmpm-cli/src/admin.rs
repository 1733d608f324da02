use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use vmpm_core::VmpmError;

/// The node's admin API. Connection failures surface as
/// [`VmpmError::Unreachable`] so callers can defer the work.
pub trait AdminClient {
    fn load_vms(&self) -> Result<()>;
    fn whitelist_chain(&self, chain_id: &str) -> Result<()>;
}

/// JSON-RPC 2.0 client over blocking HTTP.
#[derive(Debug, Clone)]
pub struct HttpAdminClient {
    url: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl HttpAdminClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("vmpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<()> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        debug!(url = %self.url, method, "calling admin api");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .map_err(|err| {
                if err.is_connect() {
                    anyhow::Error::new(VmpmError::Unreachable(self.url.clone()))
                } else {
                    anyhow::Error::new(err).context(format!("admin api call {method} failed"))
                }
            })?
            .error_for_status()
            .with_context(|| format!("admin api call {method} failed"))?;

        let bytes = response
            .bytes()
            .with_context(|| format!("failed reading {method} response"))?;
        let decoded: RpcResponse = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed decoding {method} response"))?;
        if let Some(error) = decoded.error {
            anyhow::bail!(
                "admin api call {method} failed: {} (code {})",
                error.message,
                error.code
            );
        }
        Ok(())
    }
}

impl AdminClient for HttpAdminClient {
    fn load_vms(&self) -> Result<()> {
        self.call("admin.loadVMs", json!({}))
    }

    fn whitelist_chain(&self, chain_id: &str) -> Result<()> {
        self.call("admin.whitelistChain", json!({ "chainID": chain_id }))
    }
}
