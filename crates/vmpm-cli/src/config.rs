use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use vmpm_installer::default_state_dir;
use vmpm_registry::GitCredentials;

pub const CORE_ALIAS: &str = "luxdefi/plugins-core";
pub const CORE_URL: &str = "https://github.com/luxdefi/plugins-core.git";
pub const CORE_BRANCH: &str = "master";
pub const DEFAULT_ADMIN_API_ENDPOINT: &str = "127.0.0.1:9650/ext/admin";
pub const DEFAULT_NETWORK: &str = "testnet";

/// The source registered on first run; it can never be removed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoreSource {
    pub alias: String,
    pub url: String,
    pub branch: String,
}

impl Default for CoreSource {
    fn default() -> Self {
        Self {
            alias: CORE_ALIAS.to_string(),
            url: CORE_URL.to_string(),
            branch: CORE_BRANCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub state_dir: PathBuf,
    pub plugin_dir: PathBuf,
    pub admin_api_endpoint: String,
    pub network: String,
    pub core_source: CoreSource,
    pub credentials: Option<GitCredentials>,
}

impl ManagerConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            plugin_dir: state_dir.join("plugins"),
            state_dir,
            admin_api_endpoint: DEFAULT_ADMIN_API_ENDPOINT.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            core_source: CoreSource::default(),
            credentials: None,
        }
    }

    /// Base URL of the node's admin API.
    pub fn admin_api_url(&self) -> String {
        if self.admin_api_endpoint.contains("://") {
            self.admin_api_endpoint.clone()
        } else {
            format!("http://{}", self.admin_api_endpoint)
        }
    }
}

/// On-disk configuration; every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    pub state_dir: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    pub admin_api_endpoint: Option<String>,
    pub network: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub core: Option<CoreSource>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed parsing config file: {}", path.display()))
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub state_dir: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    pub admin_api_endpoint: Option<String>,
    pub network: Option<String>,
    pub credentials_file: Option<PathBuf>,
}

/// Overrides win over the config file, which wins over defaults.
pub fn resolve_config(overrides: ConfigOverrides, file: ConfigFile) -> Result<ManagerConfig> {
    let state_dir = match overrides.state_dir.or(file.state_dir) {
        Some(dir) => expand_home(&dir)?,
        None => default_state_dir()?,
    };
    let mut config = ManagerConfig::new(state_dir);

    if let Some(dir) = overrides.plugin_dir.or(file.plugin_dir) {
        config.plugin_dir = expand_home(&dir)?;
    }
    if let Some(endpoint) = overrides.admin_api_endpoint.or(file.admin_api_endpoint) {
        config.admin_api_endpoint = endpoint;
    }
    if let Some(network) = overrides.network.or(file.network) {
        config.network = network;
    }
    if let Some(core) = file.core {
        config.core_source = core;
    }
    if let Some(path) = overrides.credentials_file.or(file.credentials_file) {
        config.credentials = Some(load_credentials(&expand_home(&path)?)?);
    }
    Ok(config)
}

/// Reads a YAML `{ username, password }` credentials file.
pub fn load_credentials(path: &Path) -> Result<GitCredentials> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading credentials file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed parsing credentials file: {}", path.display()))
}

/// Replaces a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .context("HOME is not set; cannot expand '~'")?;
    Ok(PathBuf::from(home).join(rest))
}
