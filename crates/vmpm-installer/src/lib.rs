mod fetch;
mod fs_utils;
mod install;
mod layout;
mod link;
mod lock;
mod repositories;
mod state;
mod uninstall;
mod update;
mod upgrade;
mod workflow;

pub use fetch::{HttpUrlClient, UrlClient};
pub use install::{plugin_id_for, Install, VmInstaller};
pub use layout::{default_state_dir, PluginDir, StateLayout};
pub use link::{canonical_vm_name, Link, LinkReport, DEFAULT_LINK_VERSION};
pub use lock::with_state_lock;
pub use repositories::{AddRepository, RemoveRepository};
pub use state::{InstallInfo, StateFile, StateStore};
pub use uninstall::Uninstall;
pub use update::Update;
pub use upgrade::{is_outdated, Upgrade, UpgradeVm};
pub use workflow::{Workflow, WorkflowEngine};

#[cfg(test)]
mod tests;
