mod git_ops;
mod repository;
mod source_types;

pub use git_ops::{GitCli, GitClient, GitCredentials};
pub use repository::{DiskRepository, Repository, RepositoryFactory};
pub use source_types::{branch_reference, SourceInfo, ZERO_COMMIT};
