use anyhow::{Context, Result};
use vmpm_core::VmpmError;

/// Downloads plugin binaries.
pub trait UrlClient {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct HttpUrlClient {
    client: reqwest::blocking::Client,
}

impl HttpUrlClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("vmpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl UrlClient for HttpUrlClient {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().map_err(|err| {
            if err.is_connect() {
                anyhow::Error::new(VmpmError::Unreachable(url.to_string()))
            } else {
                anyhow::Error::new(err).context(format!("failed to download {url}"))
            }
        })?;
        let response = response
            .error_for_status()
            .with_context(|| format!("failed to download {url}"))?;
        let bytes = response
            .bytes()
            .with_context(|| format!("failed reading response body from {url}"))?;
        Ok(bytes.to_vec())
    }
}
