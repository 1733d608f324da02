use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vmpm_core::parse_qualified;
use vmpm_registry::SourceInfo;

use crate::fs_utils::write_atomic;

/// One installed plugin, keyed by its qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallInfo {
    pub id: String,
    /// Source watermark at the time of installation.
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default = "state_file_version")]
    pub version: u32,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceInfo>,
    #[serde(default)]
    pub installed: BTreeMap<String, InstallInfo>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: state_file_version(),
            sources: BTreeMap::new(),
            installed: BTreeMap::new(),
        }
    }
}

impl StateFile {
    /// Qualified names of the plugins installed from `alias`.
    pub fn installed_from(&self, alias: &str) -> Vec<String> {
        self.installed
            .keys()
            .filter(|name| {
                parse_qualified(name)
                    .map(|(source, _)| source == alias)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// True when an install other than `name` is recorded under `plugin_id`.
    pub fn plugin_id_shared(&self, name: &str, plugin_id: &str) -> bool {
        self.installed
            .iter()
            .any(|(other, info)| other != name && info.id == plugin_id)
    }
}

pub(crate) fn parse_state_file(content: &str) -> Result<StateFile> {
    let state: StateFile = toml::from_str(content).context("failed parsing state file")?;
    let expected = state_file_version();
    if state.version != expected {
        anyhow::bail!(
            "unsupported state file version {} (expected {}): remove state.toml to rebuild it",
            state.version,
            expected
        );
    }

    for name in state.installed.keys() {
        let (alias, _) = parse_qualified(name)
            .with_context(|| format!("invalid installed plugin name '{name}' in state file"))?;
        if !state.sources.contains_key(alias) {
            anyhow::bail!(
                "installed plugin '{name}' references untracked source '{alias}' in state file"
            );
        }
    }

    Ok(state)
}

pub(crate) fn state_file_version() -> u32 {
    1
}

/// The persisted aggregate: loaded once on open, written only by [`StateStore::commit`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: StateFile,
}

impl StateStore {
    /// Loads `path`, or starts from empty mappings when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => parse_state_file(&content)
                .with_context(|| format!("failed parsing state: {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file yet, starting empty");
                StateFile::default()
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading state: {}", path.display()));
            }
        };
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateFile {
        &mut self.state
    }

    /// Serializes the whole aggregate and atomically replaces the state file.
    ///
    /// A failure leaves the in-memory state untouched.
    pub fn commit(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating state dir: {}", parent.display()))?;
        }
        let content = toml::to_string(&self.state)
            .with_context(|| format!("failed serializing state: {}", self.path.display()))?;
        write_atomic(&self.path, content.as_bytes())?;
        debug!(
            path = %self.path.display(),
            sources = self.state.sources.len(),
            installed = self.state.installed.len(),
            "committed state"
        );
        Ok(())
    }
}
