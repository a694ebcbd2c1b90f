use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONTROL_FILE: &str = ".htaccess";
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Settings shared by every component of a [`RulesHub`](crate::RulesHub).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    /// Directory every request path is resolved under.
    pub data_root: PathBuf,
    /// Per-directory file holding the `Require user` allow-list.
    pub control_file: String,
    /// Documents larger than this are never parsed or rewritten.
    pub max_document_bytes: u64,
    /// Unix permission bits for newly created documents. Rewrites keep the
    /// mode of the file they replace.
    pub file_mode: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            control_file: DEFAULT_CONTROL_FILE.to_string(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl HubConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }
}
