use anyhow::{Context, Result};
use tracing::{debug, info};
use vmpm_core::{parse_qualified, VmpmError};
use vmpm_registry::{Repository, RepositoryFactory};

use crate::fs_utils::remove_file_if_exists;
use crate::{InstallInfo, PluginDir, StateFile, VmInstaller, Workflow};

/// Reinstalls one plugin when its source watermark has moved past the
/// commit it was installed at.
pub struct UpgradeVm<'a> {
    name: String,
    repositories: &'a RepositoryFactory<'a>,
    installer: &'a VmInstaller<'a>,
    plugin_dir: &'a PluginDir,
}

impl<'a> UpgradeVm<'a> {
    pub fn new(
        name: impl Into<String>,
        repositories: &'a RepositoryFactory<'a>,
        installer: &'a VmInstaller<'a>,
        plugin_dir: &'a PluginDir,
    ) -> Self {
        Self {
            name: name.into(),
            repositories,
            installer,
            plugin_dir,
        }
    }
}

impl Workflow for UpgradeVm<'_> {
    fn name(&self) -> &'static str {
        "upgrade-vm"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        upgrade_one(
            state,
            &self.name,
            self.repositories,
            self.installer,
            self.plugin_dir,
        )
    }
}

/// Upgrades every installed plugin in name order; the first failure stops.
pub struct Upgrade<'a> {
    repositories: &'a RepositoryFactory<'a>,
    installer: &'a VmInstaller<'a>,
    plugin_dir: &'a PluginDir,
}

impl<'a> Upgrade<'a> {
    pub fn new(
        repositories: &'a RepositoryFactory<'a>,
        installer: &'a VmInstaller<'a>,
        plugin_dir: &'a PluginDir,
    ) -> Self {
        Self {
            repositories,
            installer,
            plugin_dir,
        }
    }
}

impl Workflow for Upgrade<'_> {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        let names = state.installed.keys().cloned().collect::<Vec<_>>();
        for name in names {
            upgrade_one(
                state,
                &name,
                self.repositories,
                self.installer,
                self.plugin_dir,
            )?;
        }
        Ok(())
    }
}

fn upgrade_one(
    state: &mut StateFile,
    name: &str,
    repositories: &RepositoryFactory<'_>,
    installer: &VmInstaller<'_>,
    plugin_dir: &PluginDir,
) -> Result<()> {
    let info = state
        .installed
        .get(name)
        .cloned()
        .ok_or_else(|| VmpmError::NotFound(format!("installed plugin {name}")))?;
    let (alias, plugin) = parse_qualified(name)?;
    let source_commit = state
        .sources
        .get(alias)
        .map(|source| source.commit.clone())
        .ok_or_else(|| VmpmError::NotFound(format!("repository {alias}")))?;

    if source_commit == info.commit {
        debug!(%name, commit = %info.commit, "already at the latest commit");
        return Ok(());
    }

    let definition = repositories.repository(alias)?.vm(plugin)?;
    let plugin_id = installer.install(name, &definition.definition)?;
    if plugin_id != info.id && !state.plugin_id_shared(name, &info.id) {
        let stale = plugin_dir.plugin_path(&info.id)?;
        remove_file_if_exists(&stale)
            .with_context(|| format!("failed to remove {}", stale.display()))?;
    }

    info!(%name, from = %info.commit, to = %source_commit, "upgraded");
    state.installed.insert(
        name.to_string(),
        InstallInfo {
            id: plugin_id,
            commit: source_commit,
        },
    );
    Ok(())
}

/// True when `name` is installed at an older commit than its source watermark.
pub fn is_outdated(state: &StateFile, name: &str) -> bool {
    let Some(info) = state.installed.get(name) else {
        return false;
    };
    parse_qualified(name)
        .ok()
        .and_then(|(alias, _)| state.sources.get(alias))
        .map(|source| source.commit != info.commit)
        .unwrap_or(false)
}
