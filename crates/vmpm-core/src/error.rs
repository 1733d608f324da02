use thiserror::Error;

/// Classified failures that callers branch on.
///
/// These travel inside `anyhow::Error`; anything that is not one of these
/// kinds is an I/O or serialization failure and is fatal to the operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmpmError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(
        "more than one match found for '{name}': specify the fully qualified name (matches: {})",
        .matches.join(", ")
    )]
    Ambiguous { name: String, matches: Vec<String> },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("'{0}' is not a valid alias (must be in the form of organization/repository)")]
    InvalidAlias(String),

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("state directory is locked by another process: {0}")]
    Busy(String),

    #[error("{0} is unreachable")]
    Unreachable(String),

    #[error("can't remove {0} (required repository)")]
    Protected(String),

    #[error("{alias} still has installed plugins: {}", .installed.join(", "))]
    InUse {
        alias: String,
        installed: Vec<String>,
    },
}

impl VmpmError {
    /// Returns the classified kind carried by `err`, if any.
    pub fn kind_of(err: &anyhow::Error) -> Option<&VmpmError> {
        err.downcast_ref::<VmpmError>()
            .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<VmpmError>()))
    }

    pub fn is_unreachable(err: &anyhow::Error) -> bool {
        matches!(Self::kind_of(err), Some(VmpmError::Unreachable(_)))
    }
}
