use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use vmpm_core::VmpmError;

/// Files and directories the manager keeps under its state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.root.join("state.toml")
    }

    pub fn repositories_dir(&self) -> PathBuf {
        self.root.join("repositories")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("vmpm.lock")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.repositories_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// The node's plugin directory; binaries live in `current/<plugin-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDir {
    root: PathBuf,
}

impl PluginDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn current_dir(&self) -> PathBuf {
        self.root.join("current")
    }

    /// Fails with `InvalidName` unless `plugin_id` is a single file name.
    pub fn plugin_path(&self, plugin_id: &str) -> Result<PathBuf> {
        validate_plugin_id(plugin_id)?;
        Ok(self.current_dir().join(plugin_id))
    }

    pub fn ensure_current_dir(&self) -> Result<PathBuf> {
        let dir = self.current_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create plugin directory {}", dir.display()))?;
        Ok(dir)
    }
}

/// Plugin ids come from definitions and become file names under `current/`.
pub(crate) fn validate_plugin_id(plugin_id: &str) -> Result<()> {
    let mut components = Path::new(plugin_id).components();
    let bare = match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => part.to_str() == Some(plugin_id),
        _ => false,
    };
    if bare && !plugin_id.contains(['/', '\\']) {
        return Ok(());
    }
    Err(VmpmError::InvalidName {
        name: plugin_id.to_string(),
        reason: "plugin id must be a single file name".to_string(),
    }
    .into())
}

/// `$HOME/.vmpm`, or `%LOCALAPPDATA%\Vmpm` on Windows.
pub fn default_state_dir() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve the state directory")?;
        return Ok(PathBuf::from(app_data).join("Vmpm"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve the state directory")?;
    Ok(PathBuf::from(home).join(".vmpm"))
}
