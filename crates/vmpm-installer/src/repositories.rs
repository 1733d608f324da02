use std::fs;
use std::io;

use anyhow::{Context, Result};
use tracing::{debug, info};
use vmpm_core::{validate_alias, VmpmError};
use vmpm_registry::{RepositoryFactory, SourceInfo};

use crate::{StateFile, Workflow};

/// Starts tracking a source at the zero watermark.
pub struct AddRepository {
    alias: String,
    url: String,
    branch: String,
}

impl AddRepository {
    pub fn new(alias: impl Into<String>, url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            url: url.into(),
            branch: branch.into(),
        }
    }
}

impl Workflow for AddRepository {
    fn name(&self) -> &'static str {
        "add-repository"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        validate_alias(&self.alias)?;
        if state.sources.contains_key(&self.alias) {
            return Err(VmpmError::AlreadyExists(format!("repository {}", self.alias)).into());
        }
        let source = SourceInfo::unsynced(self.url.clone(), &self.branch);
        info!(alias = %self.alias, url = %source.url, branch = %source.branch, "tracking repository");
        state.sources.insert(self.alias.clone(), source);
        Ok(())
    }
}

/// Stops tracking a source and deletes its local mirror.
pub struct RemoveRepository<'a> {
    alias: String,
    core_alias: &'a str,
    repositories: &'a RepositoryFactory<'a>,
}

impl<'a> RemoveRepository<'a> {
    pub fn new(
        alias: impl Into<String>,
        core_alias: &'a str,
        repositories: &'a RepositoryFactory<'a>,
    ) -> Self {
        Self {
            alias: alias.into(),
            core_alias,
            repositories,
        }
    }
}

impl Workflow for RemoveRepository<'_> {
    fn name(&self) -> &'static str {
        "remove-repository"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        if self.alias == self.core_alias {
            return Err(VmpmError::Protected(self.alias.clone()).into());
        }
        if !state.sources.contains_key(&self.alias) {
            return Err(VmpmError::NotFound(format!("repository {}", self.alias)).into());
        }
        let installed = state.installed_from(&self.alias);
        if !installed.is_empty() {
            return Err(VmpmError::InUse {
                alias: self.alias.clone(),
                installed,
            }
            .into());
        }

        state.sources.remove(&self.alias);
        let mirror = self.repositories.mirror_path(&self.alias)?;
        match fs::remove_dir_all(&mirror) {
            Ok(()) => debug!(path = %mirror.display(), "removed repository mirror"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to remove mirror {}", mirror.display()));
            }
        }
        info!(alias = %self.alias, "stopped tracking repository");
        Ok(())
    }
}
