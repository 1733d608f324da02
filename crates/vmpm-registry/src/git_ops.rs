use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;
use vmpm_core::VmpmError;

/// The git operations the manager consumes.
pub trait GitClient {
    /// Makes `local_path` a mirror of `branch_ref` at `remote_url` (cloning or
    /// fetching as needed) and returns the resulting head commit.
    fn head(
        &self,
        remote_url: &str,
        local_path: &Path,
        branch_ref: &str,
        auth: Option<&GitCredentials>,
    ) -> Result<String>;

    /// Returns the commit that last modified `relative_path` inside `repo_path`.
    fn last_modified(&self, repo_path: &Path, relative_path: &Path) -> Result<String>;
}

/// HTTP basic credentials for private sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GitCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl GitCredentials {
    fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }

    fn authorization_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("http.extraHeader=Authorization: Basic {token}")
    }
}

/// [`GitClient`] backed by the `git` executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl GitClient for GitCli {
    fn head(
        &self,
        remote_url: &str,
        local_path: &Path,
        branch_ref: &str,
        auth: Option<&GitCredentials>,
    ) -> Result<String> {
        let auth = auth.filter(|credentials| !credentials.is_empty());
        if local_path.join(".git").is_dir() {
            debug!(path = %local_path.display(), branch = branch_ref, "fetching source mirror");
            let mut fetch = authenticated_git_command(auth);
            fetch
                .args(["fetch", "--prune", "--", remote_url, branch_ref])
                .current_dir(local_path);
            run_git(fetch, remote_url, "fetch")?;
            run_git_command(local_path, &["reset", "--hard", "FETCH_HEAD"], remote_url)?;
        } else {
            debug!(path = %local_path.display(), branch = branch_ref, "cloning source mirror");
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed creating repositories dir: {}", parent.display())
                })?;
            }
            let mut clone = authenticated_git_command(auth);
            clone
                .arg("clone")
                .arg("--branch")
                .arg(branch_short_name(branch_ref))
                .arg("--")
                .arg(remote_url)
                .arg(local_path);
            run_git(clone, remote_url, "clone")?;
        }

        let output = run_git_command(local_path, &["rev-parse", "HEAD"], remote_url)?;
        parse_commit(&output.stdout).with_context(|| {
            format!("source-sync-failed: source '{remote_url}' git rev-parse returned invalid HEAD")
        })
    }

    fn last_modified(&self, repo_path: &Path, relative_path: &Path) -> Result<String> {
        let relative = relative_path.to_string_lossy().into_owned();
        let output = run_git_command(
            repo_path,
            &["log", "-1", "--format=%H", "--", relative.as_str()],
            &repo_path.display().to_string(),
        )?;
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(VmpmError::NotFound(format!(
                "commit history for {} in {}",
                relative,
                repo_path.display()
            ))
            .into());
        }
        parse_commit(&output.stdout)
            .with_context(|| format!("git log returned invalid commit for {relative}"))
    }
}

pub(crate) fn base_git_command() -> Command {
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg("core.autocrlf=false")
        .arg("-c")
        .arg("core.eol=lf");
    if cfg!(windows) {
        command.arg("-c").arg("core.longpaths=true");
    }
    command
}

fn authenticated_git_command(auth: Option<&GitCredentials>) -> Command {
    let mut command = base_git_command();
    if let Some(credentials) = auth {
        command.arg("-c").arg(credentials.authorization_header());
    }
    command
}

pub(crate) fn run_git_command(repo_root: &Path, args: &[&str], source: &str) -> Result<Output> {
    let mut command = base_git_command();
    command.args(args).current_dir(repo_root);
    run_git(command, source, &args.join(" "))
}

fn run_git(mut command: Command, source: &str, action: &str) -> Result<Output> {
    let output = command.output().with_context(|| {
        format!("source-sync-failed: source '{source}' failed launching git {action}")
    })?;
    if !output.status.success() {
        anyhow::bail!(
            "source-sync-failed: source '{}' git {} failed: {}",
            source,
            action,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

pub(crate) fn branch_short_name(branch_ref: &str) -> &str {
    branch_ref.strip_prefix("refs/heads/").unwrap_or(branch_ref)
}

pub(crate) fn parse_commit(raw: &[u8]) -> Result<String> {
    let commit = String::from_utf8(raw.to_vec())
        .context("git produced non-UTF-8 output")?
        .trim()
        .to_string();
    if !matches!(commit.len(), 40 | 64) || !commit.chars().all(|ch| ch.is_ascii_hexdigit()) {
        anyhow::bail!("not a full commit sha: '{commit}'");
    }
    Ok(commit)
}
