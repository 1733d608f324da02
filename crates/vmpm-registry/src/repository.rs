use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use vmpm_core::{
    parse_alias, ChainDefinition, Definition, DefinitionKind, PluginDescriptor, VmDefinition,
    VmpmError,
};

use crate::GitClient;

const DEFINITION_EXTENSION: &str = "yaml";

/// Read access to the definitions of one tracked source.
pub trait Repository {
    fn has_definition(&self, kind: DefinitionKind, name: &str) -> bool;
    fn vm(&self, name: &str) -> Result<Definition<VmDefinition>>;
    fn chain(&self, name: &str) -> Result<Definition<ChainDefinition>>;
}

/// A source mirror checked out on disk.
pub struct DiskRepository<'a> {
    alias: String,
    path: PathBuf,
    git: &'a dyn GitClient,
}

impl<'a> DiskRepository<'a> {
    pub fn new(alias: impl Into<String>, path: impl Into<PathBuf>, git: &'a dyn GitClient) -> Self {
        Self {
            alias: alias.into(),
            path: path.into(),
            git,
        }
    }

    fn relative_definition_path(kind: DefinitionKind, name: &str) -> PathBuf {
        Path::new(kind.dir_name()).join(format!("{name}.{DEFINITION_EXTENSION}"))
    }

    fn get<T: PluginDescriptor>(&self, name: &str) -> Result<Definition<T>> {
        let relative = Self::relative_definition_path(T::KIND, name);
        let absolute = self.path.join(&relative);
        let content = match fs::read_to_string(&absolute) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VmpmError::NotFound(format!(
                    "{} '{}' in {}",
                    T::KIND.as_str(),
                    name,
                    self.alias
                ))
                .into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading definition: {}", absolute.display()));
            }
        };

        let commit = self.git.last_modified(&self.path, &relative)?;
        Definition::from_yaml_str(&content, commit)
            .with_context(|| format!("failed decoding definition: {}", absolute.display()))
    }
}

impl Repository for DiskRepository<'_> {
    fn has_definition(&self, kind: DefinitionKind, name: &str) -> bool {
        self.path
            .join(Self::relative_definition_path(kind, name))
            .is_file()
    }

    fn vm(&self, name: &str) -> Result<Definition<VmDefinition>> {
        self.get(name)
    }

    fn chain(&self, name: &str) -> Result<Definition<ChainDefinition>> {
        self.get(name)
    }
}

/// Maps source aliases to their mirrors under a repositories directory.
pub struct RepositoryFactory<'a> {
    repositories_path: PathBuf,
    git: &'a dyn GitClient,
}

impl<'a> RepositoryFactory<'a> {
    pub fn new(repositories_path: impl Into<PathBuf>, git: &'a dyn GitClient) -> Self {
        Self {
            repositories_path: repositories_path.into(),
            git,
        }
    }

    /// Local mirror directory for `alias` (`<repositories>/<org>/<repo>`).
    pub fn mirror_path(&self, alias: &str) -> Result<PathBuf> {
        let (organization, repository) = parse_alias(alias)?;
        Ok(self.repositories_path.join(organization).join(repository))
    }

    pub fn repository(&self, alias: &str) -> Result<DiskRepository<'a>> {
        let path = self.mirror_path(alias)?;
        if !path.is_dir() {
            return Err(VmpmError::NotFound(format!("repository {alias}")).into());
        }
        Ok(DiskRepository::new(alias, path, self.git))
    }
}
