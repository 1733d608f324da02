use anyhow::{Context, Result};
use tracing::{debug, info};
use vmpm_registry::{GitClient, GitCredentials, RepositoryFactory};

use crate::{StateFile, Workflow};

/// Advances each source's watermark to its remote head.
///
/// Sources are synced in alias order. The first failure stops the loop;
/// sources already advanced keep their new watermark once the engine commits.
pub struct Update<'a> {
    repositories: &'a RepositoryFactory<'a>,
    git: &'a dyn GitClient,
    credentials: Option<&'a GitCredentials>,
}

impl<'a> Update<'a> {
    pub fn new(
        repositories: &'a RepositoryFactory<'a>,
        git: &'a dyn GitClient,
        credentials: Option<&'a GitCredentials>,
    ) -> Self {
        Self {
            repositories,
            git,
            credentials,
        }
    }
}

impl Workflow for Update<'_> {
    fn name(&self) -> &'static str {
        "update"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        for (alias, source) in state.sources.iter_mut() {
            let mirror = self.repositories.mirror_path(alias)?;
            let head = self
                .git
                .head(&source.url, &mirror, &source.branch, self.credentials)
                .with_context(|| format!("failed to update repository {alias}"))?;

            if head == source.commit {
                debug!(source = %alias, commit = %head, "already up to date");
                continue;
            }
            info!(source = %alias, from = %source.commit, to = %head, "advanced repository");
            source.commit = head;
        }
        Ok(())
    }
}
