use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use vmpm_core::VmpmError;
use vmpm_security::compute_plugin_id;

use crate::fs_utils::{is_executable, remove_file_if_exists, symlink_file};
use crate::PluginDir;

pub const DEFAULT_LINK_VERSION: &str = "v0.0.0-local";

/// What [`Link`] put in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub package: String,
    pub vm_name: String,
    pub plugin_id: String,
    pub binary: PathBuf,
    pub symlink: PathBuf,
}

/// Points `<plugin_dir>/current/<plugin-id>` at a locally built binary.
///
/// Links are not install records; the state is never touched.
pub struct Link<'a> {
    organization: String,
    name: String,
    version: String,
    binary: PathBuf,
    plugin_dir: &'a PluginDir,
}

impl<'a> Link<'a> {
    pub fn new(
        organization: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        binary: impl Into<PathBuf>,
        plugin_dir: &'a PluginDir,
    ) -> Self {
        Self {
            organization: organization.into(),
            name: name.into(),
            version: version.into(),
            binary: binary.into(),
            plugin_dir,
        }
    }

    /// The name the plugin id is derived from.
    pub fn vm_name(&self) -> &str {
        canonical_vm_name(&self.organization, &self.name)
    }

    pub fn link(&self) -> Result<LinkReport> {
        validate_binary(&self.binary)?;

        let vm_name = self.vm_name().to_string();
        let plugin_id = compute_plugin_id(&vm_name)?;
        self.plugin_dir.ensure_current_dir()?;
        let symlink = self.plugin_dir.plugin_path(&plugin_id)?;

        remove_file_if_exists(&symlink)
            .with_context(|| format!("failed to remove existing link {}", symlink.display()))?;
        symlink_file(&self.binary, &symlink).with_context(|| {
            format!(
                "failed to link {} to {}",
                symlink.display(),
                self.binary.display()
            )
        })?;

        info!(plugin_id = %plugin_id, binary = %self.binary.display(), "linked development binary");
        Ok(LinkReport {
            package: format!("{}/{}@{}", self.organization, self.name, self.version),
            vm_name,
            plugin_id,
            binary: self.binary.clone(),
            symlink,
        })
    }
}

/// `luxfi/evm` registers under its historical VM name.
pub fn canonical_vm_name<'n>(organization: &str, name: &'n str) -> &'n str {
    if organization == "luxfi" && name == "evm" {
        "Lux EVM"
    } else {
        name
    }
}

fn validate_binary(path: &Path) -> Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(VmpmError::NotFound(format!("binary {}", path.display())).into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to inspect {}", path.display()));
        }
    };
    if metadata.is_dir() {
        anyhow::bail!("path is a directory, not a file: {}", path.display());
    }
    if !metadata.is_file() {
        anyhow::bail!("path is not a regular file: {}", path.display());
    }
    if !is_executable(&metadata) {
        anyhow::bail!("binary is not executable: {}", path.display());
    }
    Ok(())
}
