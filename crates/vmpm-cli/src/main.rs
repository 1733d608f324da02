mod admin;
mod config;
mod manager;
mod render;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;
use vmpm_installer::{HttpUrlClient, Link, PluginDir, DEFAULT_LINK_VERSION};
use vmpm_registry::GitCli;

use crate::admin::HttpAdminClient;
use crate::config::{expand_home, resolve_config, ConfigFile, ConfigOverrides, ManagerConfig};
use crate::manager::Manager;
use crate::render::{
    current_output_style, format_info_lines, format_installed_lines, format_link_lines,
    format_repository_lines, print_report,
};

#[derive(Parser, Debug)]
#[command(name = "vmpm", version)]
#[command(about = "Plugin manager for virtual machines and chains", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "VMPM_CONFIG_FILE")]
    config_file: Option<PathBuf>,
    /// Directory holding the state file, lock and repository mirrors.
    #[arg(long, global = true, env = "VMPM_HOME")]
    state_dir: Option<PathBuf>,
    /// The node's plugin directory.
    #[arg(long, global = true, env = "VMPM_PLUGIN_DIR")]
    plugin_dir: Option<PathBuf>,
    /// host:port/path of the node's admin API.
    #[arg(long, global = true, env = "VMPM_ADMIN_API_ENDPOINT")]
    admin_api_endpoint: Option<String>,
    /// Network whose chain ids are used when joining chains.
    #[arg(long, global = true)]
    network: Option<String>,
    /// YAML file with git credentials for private repositories.
    #[arg(long, global = true, env = "VMPM_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a virtual machine by alias.
    Install { name: String },
    /// Remove an installed virtual machine.
    Uninstall { name: String },
    /// Install the virtual machines of a chain and whitelist it on the node.
    JoinChain { name: String },
    /// Sync every tracked repository.
    Update,
    /// Reinstall virtual machines whose repository has moved on.
    Upgrade {
        /// Only upgrade this virtual machine.
        #[arg(long)]
        vm: Option<String>,
    },
    ListRepositories,
    ListInstalled,
    /// Start tracking a repository (organization/repository).
    AddRepository {
        alias: String,
        url: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    RemoveRepository { alias: String },
    /// Show a virtual machine definition and its install status.
    Info { name: String },
    /// Symlink a locally built binary into the plugin directory.
    Link {
        /// organization/name, e.g. luxfi/evm.
        package: String,
        path: PathBuf,
        #[arg(long)]
        version: Option<String>,
    },
    /// Print a shell completion script.
    Completions { shell: Shell },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    run_cli(cli)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("VMPM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_cli(cli: Cli) -> Result<()> {
    let style = current_output_style();

    match &cli.command {
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(*shell, &mut command, "vmpm", &mut io::stdout());
            return Ok(());
        }
        Commands::Link {
            package,
            path,
            version,
        } => {
            let config = load_config(&cli)?;
            let (organization, name) = package
                .split_once('/')
                .filter(|(organization, name)| !organization.is_empty() && !name.is_empty())
                .with_context(|| {
                    format!("invalid package reference: {package} (expected org/name)")
                })?;
            let binary = absolute_path(&expand_home(path)?)?;
            let plugin_dir = PluginDir::new(&config.plugin_dir);
            let report = Link::new(
                organization,
                name,
                version.as_deref().unwrap_or(DEFAULT_LINK_VERSION),
                binary,
                &plugin_dir,
            )
            .link()?;
            for line in format_link_lines(&report) {
                println!("{line}");
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let git = GitCli;
    let urls = HttpUrlClient::new()?;
    let admin = HttpAdminClient::new(config.admin_api_url())?;
    let manager = Manager::open(config, &git, &urls, &admin)?;
    print_report(style, manager.bootstrap_report());

    match cli.command {
        Commands::Install { name } => print_report(style, &manager.install(&name)?),
        Commands::Uninstall { name } => print_report(style, &manager.uninstall(&name)?),
        Commands::JoinChain { name } => print_report(style, &manager.join_chain(&name)?),
        Commands::Update => print_report(style, &manager.update()?),
        Commands::Upgrade { vm } => print_report(style, &manager.upgrade(vm.as_deref())?),
        Commands::ListRepositories => {
            for line in format_repository_lines(&manager.list_repositories()?) {
                println!("{line}");
            }
        }
        Commands::ListInstalled => {
            for line in format_installed_lines(&manager.list_installed()?) {
                println!("{line}");
            }
        }
        Commands::AddRepository { alias, url, branch } => {
            print_report(style, &manager.add_repository(&alias, &url, &branch)?)
        }
        Commands::RemoveRepository { alias } => {
            print_report(style, &manager.remove_repository(&alias)?)
        }
        Commands::Info { name } => {
            for line in format_info_lines(&manager.info(&name)?) {
                println!("{line}");
            }
        }
        Commands::Completions { .. } | Commands::Link { .. } => {}
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<ManagerConfig> {
    let file = match &cli.config_file {
        Some(path) => ConfigFile::load(&expand_home(path)?)?,
        None => ConfigFile::default(),
    };
    resolve_config(
        ConfigOverrides {
            state_dir: cli.state_dir.clone(),
            plugin_dir: cli.plugin_dir.clone(),
            admin_api_endpoint: cli.admin_api_endpoint.clone(),
            network: cli.network.clone(),
            credentials_file: cli.credentials_file.clone(),
        },
        file,
    )
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve the current directory")?;
    Ok(cwd.join(path))
}
