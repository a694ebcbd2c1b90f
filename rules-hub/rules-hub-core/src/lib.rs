//! Rule documents spread over a directory tree: cascading access control,
//! bounded-depth discovery with folder overlays, and structural JSON edits.

pub mod access;
pub mod auth;
pub mod config;
pub mod edit;
pub mod error;
pub mod hub;
pub mod patch;
pub mod store;
pub mod users;
pub mod walker;

pub use access::AccessGate;
pub use config::HubConfig;
pub use edit::{EditOp, EditOutcome, EditRequest, Editor};
pub use error::RulesError;
pub use hub::RulesHub;
pub use store::DocumentStore;
pub use walker::{FolderNode, RuleTreeWalker, WalkRequest};
