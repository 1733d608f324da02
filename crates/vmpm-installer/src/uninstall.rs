use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::fs_utils::remove_file_if_exists;
use crate::{PluginDir, StateFile, Workflow};

/// Removes an installed plugin binary and its record; not installed is a no-op.
pub struct Uninstall<'a> {
    name: String,
    plugin_dir: &'a PluginDir,
}

impl<'a> Uninstall<'a> {
    pub fn new(name: impl Into<String>, plugin_dir: &'a PluginDir) -> Self {
        Self {
            name: name.into(),
            plugin_dir,
        }
    }
}

impl Workflow for Uninstall<'_> {
    fn name(&self) -> &'static str {
        "uninstall"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        let Some(info) = state.installed.get(&self.name) else {
            info!(name = %self.name, "not installed, nothing to do");
            return Ok(());
        };

        let binary = self.plugin_dir.plugin_path(&info.id)?;
        if state.plugin_id_shared(&self.name, &info.id) {
            debug!(path = %binary.display(), "plugin binary still used by another install, keeping it");
        } else {
            let removed = remove_file_if_exists(&binary)
                .with_context(|| format!("failed to remove {}", binary.display()))?;
            if !removed {
                debug!(path = %binary.display(), "plugin binary was already gone");
            }
        }
        state.installed.remove(&self.name);
        info!(name = %self.name, "uninstalled");
        Ok(())
    }
}
