use std::path::PathBuf;

/// Failures surfaced by the rules core. The `Display` text of each variant is
/// what ends up in the `error` field of a response.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("No such folder.")]
    NotFound,
    #[error("Access denied.")]
    AccessDenied,
    #[error("Unable to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Document {} is {size} bytes, limit is {max}", path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },
    #[error("Can't write to {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to load file {}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("No authenticated user found.")]
    NoUser,
    #[error("No users found.")]
    NoUsers,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RulesError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = RulesError> = std::result::Result<T, E>;
