use anyhow::{Context, Result};
use tracing::{debug, info};
use vmpm_core::{parse_qualified, VmDefinition, VmpmError};
use vmpm_registry::{Repository, RepositoryFactory};
use vmpm_security::{compute_plugin_id, sha256_hex, verify_sha256};

use crate::fs_utils::{make_executable, write_atomic};
use crate::layout::validate_plugin_id;
use crate::{InstallInfo, PluginDir, StateFile, UrlClient, Workflow};

/// Downloads, verifies and places a VM binary in the plugin directory.
pub struct VmInstaller<'a> {
    plugin_dir: &'a PluginDir,
    url_client: &'a dyn UrlClient,
}

impl<'a> VmInstaller<'a> {
    pub fn new(plugin_dir: &'a PluginDir, url_client: &'a dyn UrlClient) -> Self {
        Self {
            plugin_dir,
            url_client,
        }
    }

    /// Returns the plugin id the binary was installed under. Nothing is
    /// written when the checksum does not match.
    pub fn install(&self, name: &str, vm: &VmDefinition) -> Result<String> {
        let plugin_id = plugin_id_for(vm)?;
        if vm.url.is_empty() {
            return Err(VmpmError::NotFound(format!("download url for {name}")).into());
        }

        debug!(%name, url = %vm.url, "downloading plugin binary");
        let bytes = self
            .url_client
            .fetch(&vm.url)
            .with_context(|| format!("failed to download {name}"))?;
        if !verify_sha256(&bytes, &vm.sha256) {
            return Err(VmpmError::ChecksumMismatch {
                name: name.to_string(),
                expected: vm.sha256.clone(),
                actual: sha256_hex(&bytes),
            }
            .into());
        }

        self.plugin_dir.ensure_current_dir()?;
        let destination = self.plugin_dir.plugin_path(&plugin_id)?;
        write_atomic(&destination, &bytes)?;
        make_executable(&destination)?;
        info!(%name, plugin_id = %plugin_id, path = %destination.display(), "installed plugin binary");
        Ok(plugin_id)
    }
}

/// The definition's declared id, or the id derived from its alias.
pub fn plugin_id_for(vm: &VmDefinition) -> Result<String> {
    let declared = vm.id.trim();
    if declared.is_empty() {
        return compute_plugin_id(&vm.alias);
    }
    validate_plugin_id(declared)?;
    Ok(declared.to_string())
}

/// Installs one VM by qualified name; already installed is a no-op.
pub struct Install<'a> {
    name: String,
    repositories: &'a RepositoryFactory<'a>,
    installer: &'a VmInstaller<'a>,
}

impl<'a> Install<'a> {
    pub fn new(
        name: impl Into<String>,
        repositories: &'a RepositoryFactory<'a>,
        installer: &'a VmInstaller<'a>,
    ) -> Self {
        Self {
            name: name.into(),
            repositories,
            installer,
        }
    }
}

impl Workflow for Install<'_> {
    fn name(&self) -> &'static str {
        "install"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        if state.installed.contains_key(&self.name) {
            info!(name = %self.name, "already installed, skipping");
            return Ok(());
        }

        let (alias, plugin) = parse_qualified(&self.name)?;
        let source = state
            .sources
            .get(alias)
            .ok_or_else(|| VmpmError::NotFound(format!("repository {alias}")))?;
        let repository = self.repositories.repository(alias)?;
        let definition = repository.vm(plugin)?;

        let plugin_id = self.installer.install(&self.name, &definition.definition)?;
        let commit = source.commit.clone();
        state.installed.insert(
            self.name.clone(),
            InstallInfo {
                id: plugin_id,
                commit,
            },
        );
        Ok(())
    }
}
