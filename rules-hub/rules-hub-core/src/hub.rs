use crate::access::AccessGate;
use crate::config::HubConfig;
use crate::edit::{EditOutcome, EditRequest, Editor};
use crate::error::{Result, RulesError};
use crate::store::{clean_relative, DocumentStore};
use crate::users;
use crate::walker::{FolderNode, RuleTreeWalker, WalkRequest};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Single handle over the store, access gate, walker and editor sharing one
/// data root.
pub struct RulesHub {
    config: HubConfig,
    store: DocumentStore,
    gate: AccessGate,
    walker: RuleTreeWalker,
    editor: Editor,
}

impl RulesHub {
    pub fn new(config: HubConfig) -> Self {
        let store = DocumentStore::new(&config.data_root, config.max_document_bytes)
            .with_file_mode(config.file_mode);
        let gate = AccessGate::new(&config.data_root, config.control_file.clone());
        let walker = RuleTreeWalker::new(store.clone(), gate.clone());
        let editor = Editor::new(store.clone(), gate.clone());
        Self {
            config,
            store,
            gate,
            walker,
            editor,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn walk(
        &self,
        root: &Path,
        request: &WalkRequest,
        user: Option<&str>,
    ) -> Result<FolderNode> {
        self.walker.walk(root, request, user)
    }

    /// Walk every root in order; a failing root yields `{"error": ...}` in its
    /// slot without affecting the others.
    pub fn walk_all(
        &self,
        roots: &[PathBuf],
        request: &WalkRequest,
        user: Option<&str>,
    ) -> Vec<Value> {
        roots
            .iter()
            .map(|root| match self.walk(root, request, user) {
                Ok(node) => serde_json::to_value(node)
                    .unwrap_or_else(|e| json!({ "error": e.to_string() })),
                Err(e) => json!({ "error": e.to_string() }),
            })
            .collect()
    }

    pub fn edit(&self, request: &EditRequest, user: Option<&str>) -> EditOutcome {
        let result = self.editor.apply(request, user);
        if let Err(e) = &result {
            tracing::warn!(target_file = %request.target.display(), error = %e, "edit failed");
        }
        result.into()
    }

    /// Read one document as `user` would see it.
    pub fn read(&self, path: &Path, user: Option<&str>) -> Result<Value> {
        let relative = clean_relative(path);
        if let Some(dir) = relative.parent() {
            if !self.gate.allowed(dir, user) {
                return Err(RulesError::AccessDenied);
            }
        }
        // Report the path the caller asked for, not where it lives on disk.
        self.store
            .load(&self.store.root().join(&relative))
            .map_err(|e| match e {
                RulesError::Load { source, .. } => RulesError::Load {
                    path: relative,
                    source,
                },
                other => other,
            })
    }

    pub fn list_users(&self) -> Result<BTreeMap<String, Value>> {
        users::list_users(&self.store)
    }

    pub fn publish_news(&self, sender: Option<&str>, news: Value) -> Result<Vec<String>> {
        users::publish_news(&self.store, &self.editor, sender, news)
    }

    /// Write raw bytes to `path`, creating missing directories. Returns the
    /// path relative to the data root.
    pub fn save(&self, path: &Path, data: &[u8], user: Option<&str>) -> Result<PathBuf> {
        let relative = clean_relative(path);
        if relative.as_os_str().is_empty() {
            return Err(RulesError::InvalidRequest("empty target path".into()));
        }
        if let Some(dir) = relative.parent() {
            if !self.gate.allowed(dir, user) {
                return Err(RulesError::AccessDenied);
            }
        }
        self.store.write_bytes(&self.store.root().join(&relative), data)?;
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::EditOp;

    #[test]
    fn walk_all_keeps_order_and_isolates_errors() {
        let tempdir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tempdir.path().join("a")).unwrap();
        let hub = RulesHub::new(HubConfig::new(tempdir.path()));
        let results = hub.walk_all(
            &[PathBuf::from("missing"), PathBuf::from("a")],
            &WalkRequest::new(0),
            None,
        );
        assert_eq!(results[0], json!({"error": "No such folder."}));
        assert_eq!(results[1], json!({"files": [], "folders": []}));
    }

    #[test]
    fn edit_then_read() {
        let tempdir = tempfile::tempdir().unwrap();
        let hub = RulesHub::new(HubConfig::new(tempdir.path()));
        let outcome = hub.edit(
            &EditRequest::new("docs/a.json", EditOp::Merge(json!({"id": 1}))),
            None,
        );
        assert_eq!(serde_json::to_value(outcome).unwrap(), json!({"status": "success"}));
        assert_eq!(hub.read(Path::new("docs/a.json"), None).unwrap(), json!({"id": 1}));
        assert!(hub.read(Path::new("docs/none.json"), None).is_err());
    }

    #[test]
    fn save_writes_under_root() {
        let tempdir = tempfile::tempdir().unwrap();
        let hub = RulesHub::new(HubConfig::new(tempdir.path()));
        let saved = hub.save(Path::new("../up/img.bin"), b"\x00\x01", None).unwrap();
        assert_eq!(saved, PathBuf::from("up/img.bin"));
        assert_eq!(std::fs::read(tempdir.path().join("up/img.bin")).unwrap(), b"\x00\x01");
    }
}
