use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{info, warn};
use vmpm_core::{
    parse_qualified, qualify, validate_alias, Definition, DefinitionKind, VmDefinition, VmpmError,
};
use vmpm_installer::{
    is_outdated, with_state_lock, AddRepository, Install, InstallInfo, PluginDir,
    RemoveRepository, StateFile, StateLayout, StateStore, Uninstall, Update, Upgrade, UpgradeVm,
    UrlClient, VmInstaller, WorkflowEngine,
};
use vmpm_registry::{GitClient, Repository, RepositoryFactory, SourceInfo};
use vmpm_resolver::resolve_name;

use crate::admin::AdminClient;
use crate::config::ManagerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Skipped,
    Warning,
}

/// One line of user-facing output for a finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub status: Status,
    pub message: String,
}

impl StatusLine {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: Status::Skipped,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warning,
            message: message.into(),
        }
    }
}

pub type Report = Vec<StatusLine>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRow {
    pub name: String,
    pub info: InstallInfo,
    pub outdated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub name: String,
    pub definition: Definition<VmDefinition>,
    pub installed: Option<InstallInfo>,
    pub outdated: bool,
}

/// Composes the state store, name resolution, workflows and the node's admin
/// API into the user-facing operations. Every operation holds the state lock
/// for its whole duration.
pub struct Manager<'a> {
    config: ManagerConfig,
    layout: StateLayout,
    plugin_dir: PluginDir,
    git: &'a dyn GitClient,
    urls: &'a dyn UrlClient,
    admin: &'a dyn AdminClient,
    bootstrap_report: Report,
}

impl<'a> Manager<'a> {
    /// Opens the state directory, registering and syncing the core source
    /// on first use.
    pub fn open(
        config: ManagerConfig,
        git: &'a dyn GitClient,
        urls: &'a dyn UrlClient,
        admin: &'a dyn AdminClient,
    ) -> Result<Self> {
        let mut manager = Self {
            layout: StateLayout::new(&config.state_dir),
            plugin_dir: PluginDir::new(&config.plugin_dir),
            config,
            git,
            urls,
            admin,
            bootstrap_report: Vec::new(),
        };
        manager.bootstrap_report = manager.bootstrap()?;
        Ok(manager)
    }

    pub fn bootstrap_report(&self) -> &[StatusLine] {
        &self.bootstrap_report
    }

    fn bootstrap(&self) -> Result<Report> {
        self.layout.ensure_base_dirs()?;
        self.locked(|engine| {
            let core = &self.config.core_source;
            if !engine.state().sources.contains_key(&core.alias) {
                engine.execute(&AddRepository::new(&core.alias, &core.url, &core.branch))?;
            }

            let synced = engine
                .state()
                .sources
                .get(&core.alias)
                .is_some_and(SourceInfo::is_synced);
            if synced {
                return Ok(Vec::new());
            }

            info!(source = %core.alias, "bootstrap not detected, bootstrapping");
            let repositories = self.repositories();
            engine.execute(&Update::new(
                &repositories,
                self.git,
                self.config.credentials.as_ref(),
            ))?;
            Ok(vec![StatusLine::ok("finished bootstrapping")])
        })
    }

    pub fn install(&self, name: &str) -> Result<Report> {
        self.locked(|engine| {
            let repositories = self.repositories();
            let name = resolve(engine.state(), &repositories, name, DefinitionKind::Vm)?;
            Ok(vec![self.install_resolved(engine, &repositories, &name)?])
        })
    }

    pub fn uninstall(&self, name: &str) -> Result<Report> {
        self.locked(|engine| {
            let repositories = self.repositories();
            let state = engine.state();
            let name = resolve_name(
                name,
                DefinitionKind::Vm,
                state.sources.keys().map(String::as_str),
                |alias, plugin| {
                    if state.installed.contains_key(&qualify(alias, plugin)) {
                        return Ok(true);
                    }
                    source_defines(&repositories, DefinitionKind::Vm, alias, plugin)
                },
            )?;

            if !engine.state().installed.contains_key(&name) {
                return Ok(vec![StatusLine::skipped(format!(
                    "VM {name} is not installed, nothing to do"
                ))]);
            }
            engine.execute(&Uninstall::new(&name, &self.plugin_dir))?;
            Ok(vec![StatusLine::ok(format!("uninstalled {name}"))])
        })
    }

    /// Installs every VM a chain needs, then asks the node to load them and
    /// whitelist the chain. An offline node defers both calls.
    pub fn join_chain(&self, name: &str) -> Result<Report> {
        self.locked(|engine| {
            let repositories = self.repositories();
            let name = resolve(engine.state(), &repositories, name, DefinitionKind::Chain)?;
            let (alias, plugin) = parse_qualified(&name)?;
            let chain = repositories.repository(alias)?.chain(plugin)?.definition;
            let network = &self.config.network;
            let chain_id = chain
                .id_for(network)
                .ok_or_else(|| {
                    VmpmError::NotFound(format!("chain id of {name} for network {network}"))
                })?
                .to_string();

            info!(chain = %name, chain_id = %chain_id, vms = chain.vms.len(), "joining chain");
            let mut report = Vec::new();
            for vm in &chain.vms {
                let vm_name = qualify(alias, vm);
                report.push(self.install_resolved(engine, &repositories, &vm_name)?);
            }

            let endpoint = &self.config.admin_api_endpoint;
            match self.admin.load_vms() {
                Ok(()) => report.push(StatusLine::ok("loaded virtual machines")),
                Err(err) if VmpmError::is_unreachable(&err) => {
                    warn!(%endpoint, "node offline, deferring loadVMs");
                    report.push(StatusLine::warning(format!(
                        "node at {endpoint} was offline; virtual machines will be available upon node startup"
                    )));
                }
                Err(err) => return Err(err),
            }

            match self.admin.whitelist_chain(&chain_id) {
                Ok(()) => report.push(StatusLine::ok(format!("whitelisted chain {chain_id}"))),
                Err(err) if VmpmError::is_unreachable(&err) => {
                    warn!(%endpoint, "node offline, deferring whitelistChain");
                    report.push(StatusLine::warning(format!(
                        "node at {endpoint} was offline; whitelist chain {chain_id} upon node restart"
                    )));
                }
                Err(err) => return Err(err),
            }

            report.push(StatusLine::ok(format!(
                "finished installing virtual machines for chain {chain_id}"
            )));
            Ok(report)
        })
    }

    pub fn update(&self) -> Result<Report> {
        self.locked(|engine| {
            let before = engine.state().sources.clone();
            let repositories = self.repositories();
            engine.execute(&Update::new(
                &repositories,
                self.git,
                self.config.credentials.as_ref(),
            ))?;

            let state = engine.state();
            let mut report = source_changes(&before, &state.sources);
            let outdated = state
                .installed
                .keys()
                .filter(|name| is_outdated(state, name))
                .count();
            if outdated > 0 {
                report.push(StatusLine::warning(format!(
                    "{outdated} installed plugin(s) can be upgraded with `vmpm upgrade`"
                )));
            }
            Ok(report)
        })
    }

    /// Upgrades one VM, or every installed VM when `name` is `None`.
    pub fn upgrade(&self, name: Option<&str>) -> Result<Report> {
        self.locked(|engine| {
            let before = engine.state().installed.clone();
            let repositories = self.repositories();
            let installer = self.installer();
            match name {
                Some(name) => {
                    let name = resolve(engine.state(), &repositories, name, DefinitionKind::Vm)?;
                    engine.execute(&UpgradeVm::new(
                        name,
                        &repositories,
                        &installer,
                        &self.plugin_dir,
                    ))?;
                }
                None => {
                    engine.execute(&Upgrade::new(&repositories, &installer, &self.plugin_dir))?;
                }
            }

            let after = &engine.state().installed;
            let mut report = Vec::new();
            for (name, previous) in &before {
                let Some(current) = after.get(name) else {
                    continue;
                };
                if current.commit != previous.commit {
                    report.push(StatusLine::ok(format!(
                        "upgraded {name} ({} -> {})",
                        short_commit(&previous.commit),
                        short_commit(&current.commit)
                    )));
                }
            }
            if report.is_empty() {
                report.push(StatusLine::skipped("already at the latest commit"));
            }
            Ok(report)
        })
    }

    pub fn add_repository(&self, alias: &str, url: &str, branch: &str) -> Result<Report> {
        validate_alias(alias)?;
        self.locked(|engine| {
            match engine.execute(&AddRepository::new(alias, url, branch)) {
                Ok(()) => Ok(vec![StatusLine::ok(format!(
                    "added repository {alias}; run `vmpm update` to sync it"
                ))]),
                Err(err) if matches!(VmpmError::kind_of(&err), Some(VmpmError::AlreadyExists(_))) => {
                    Ok(vec![StatusLine::skipped(format!(
                        "repository {alias} is already tracked"
                    ))])
                }
                Err(err) => Err(err),
            }
        })
    }

    pub fn remove_repository(&self, alias: &str) -> Result<Report> {
        self.locked(|engine| {
            let repositories = self.repositories();
            engine.execute(&RemoveRepository::new(
                alias,
                &self.config.core_source.alias,
                &repositories,
            ))?;
            Ok(vec![StatusLine::ok(format!("removed repository {alias}"))])
        })
    }

    pub fn list_repositories(&self) -> Result<Vec<(String, SourceInfo)>> {
        self.locked(|engine| {
            Ok(engine
                .state()
                .sources
                .iter()
                .map(|(alias, source)| (alias.clone(), source.clone()))
                .collect())
        })
    }

    pub fn list_installed(&self) -> Result<Vec<InstalledRow>> {
        self.locked(|engine| {
            let state = engine.state();
            Ok(state
                .installed
                .iter()
                .map(|(name, info)| InstalledRow {
                    name: name.clone(),
                    info: info.clone(),
                    outdated: is_outdated(state, name),
                })
                .collect())
        })
    }

    pub fn info(&self, name: &str) -> Result<VmInfo> {
        self.locked(|engine| {
            let repositories = self.repositories();
            let state = engine.state();
            let name = resolve(state, &repositories, name, DefinitionKind::Vm)?;
            let (alias, plugin) = parse_qualified(&name)?;
            let definition = repositories.repository(alias)?.vm(plugin)?;
            Ok(VmInfo {
                installed: state.installed.get(&name).cloned(),
                outdated: is_outdated(state, &name),
                name,
                definition,
            })
        })
    }

    fn install_resolved(
        &self,
        engine: &mut WorkflowEngine,
        repositories: &RepositoryFactory<'_>,
        name: &str,
    ) -> Result<StatusLine> {
        if engine.state().installed.contains_key(name) {
            return Ok(StatusLine::skipped(format!(
                "VM {name} is already installed, skipping"
            )));
        }
        let installer = self.installer();
        engine.execute(&Install::new(name, repositories, &installer))?;
        let plugin_id = engine
            .state()
            .installed
            .get(name)
            .map(|info| info.id.clone())
            .unwrap_or_default();
        Ok(StatusLine::ok(format!("installed {name} ({plugin_id})")))
    }

    fn locked<T>(&self, run: impl FnOnce(&mut WorkflowEngine) -> Result<T>) -> Result<T> {
        with_state_lock(&self.layout.lock_path(), || {
            let store = StateStore::open(self.layout.state_file_path())?;
            let mut engine = WorkflowEngine::new(store);
            run(&mut engine)
        })
    }

    fn repositories(&self) -> RepositoryFactory<'a> {
        RepositoryFactory::new(self.layout.repositories_dir(), self.git)
    }

    fn installer(&self) -> VmInstaller<'_> {
        VmInstaller::new(&self.plugin_dir, self.urls)
    }
}

fn resolve(
    state: &StateFile,
    repositories: &RepositoryFactory<'_>,
    name: &str,
    kind: DefinitionKind,
) -> Result<String> {
    resolve_name(
        name,
        kind,
        state.sources.keys().map(String::as_str),
        |alias, plugin| source_defines(repositories, kind, alias, plugin),
    )
}

/// A source whose mirror has not been synced yet defines nothing.
fn source_defines(
    repositories: &RepositoryFactory<'_>,
    kind: DefinitionKind,
    alias: &str,
    plugin: &str,
) -> Result<bool> {
    match repositories.repository(alias) {
        Ok(repository) => Ok(repository.has_definition(kind, plugin)),
        Err(err) if matches!(VmpmError::kind_of(&err), Some(VmpmError::NotFound(_))) => Ok(false),
        Err(err) => Err(err),
    }
}

fn source_changes(
    before: &BTreeMap<String, SourceInfo>,
    after: &BTreeMap<String, SourceInfo>,
) -> Report {
    after
        .iter()
        .map(|(alias, source)| {
            let previous = before.get(alias).map(|source| source.commit.as_str());
            if previous == Some(source.commit.as_str()) {
                StatusLine::skipped(format!(
                    "{alias}: up-to-date ({})",
                    short_commit(&source.commit)
                ))
            } else {
                StatusLine::ok(format!(
                    "{alias}: updated ({} -> {})",
                    short_commit(previous.unwrap_or_default()),
                    short_commit(&source.commit)
                ))
            }
        })
        .collect()
}

pub fn short_commit(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}
