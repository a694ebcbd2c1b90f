//! Bounded-depth directory walk collecting files, rule documents and
//! lookahead overlays.

use crate::access::AccessGate;
use crate::error::{Result, RulesError};
use crate::patch;
use crate::store::{clean_relative, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Overlay keys that would clash with the node's own fields.
const RESERVED_FIELDS: &[&str] = &["name", "files", "folders", "ruleFiles", "rules", "error"];

/// Parameters of one walk.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalkRequest {
    #[serde(default, alias = "depth")]
    pub max_depth: u32,
    /// Subfolder name holding rule documents.
    #[serde(default, alias = "rufolder")]
    pub rule_folder_name: Option<String>,
    /// Only `*.json` rule files starting with one of these are parsed.
    #[serde(default, alias = "rufiles")]
    pub rule_name_prefixes: Vec<String>,
    /// Rule documents merged onto every child folder that has them.
    #[serde(default, alias = "lookahead")]
    pub lookahead_names: Vec<String>,
}

impl WalkRequest {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    pub fn with_rules(mut self, folder: impl Into<String>, prefixes: &[&str]) -> Self {
        self.rule_folder_name = Some(folder.into());
        self.rule_name_prefixes = prefixes.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_lookahead(mut self, names: &[&str]) -> Self {
        self.lookahead_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// The rule folder name, unless it could point outside the folder it is
    /// looked up in.
    pub fn rule_folder(&self) -> Option<&str> {
        self.rule_folder_name
            .as_deref()
            .filter(|name| is_plain_name(name))
    }
}

/// A single path component naming an entry of the directory it is joined to.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// One directory in the walk result.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<FolderNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fields acquired from lookahead rule documents.
    #[serde(flatten)]
    pub overlay: Map<String, Value>,
}

impl FolderNode {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Child folder by name.
    pub fn folder(&self, name: &str) -> Option<&FolderNode> {
        self.folders
            .as_ref()?
            .iter()
            .find(|f| f.name.as_deref() == Some(name))
    }
}

#[derive(Clone, Debug)]
pub struct RuleTreeWalker {
    store: DocumentStore,
    gate: AccessGate,
}

impl RuleTreeWalker {
    pub fn new(store: DocumentStore, gate: AccessGate) -> Self {
        Self { store, gate }
    }

    /// Walk `root` (relative to the data root) as seen by `user`.
    pub fn walk(
        &self,
        root: &Path,
        request: &WalkRequest,
        user: Option<&str>,
    ) -> Result<FolderNode> {
        let root = clean_relative(root);
        let mut node = FolderNode::default();
        let mut ancestors = Vec::new();
        self.walk_dir(&root, request, user, 0, &mut ancestors, &mut node)?;
        Ok(node)
    }

    fn walk_dir(
        &self,
        dir: &Path,
        request: &WalkRequest,
        user: Option<&str>,
        depth: u32,
        ancestors: &mut Vec<PathBuf>,
        out: &mut FolderNode,
    ) -> Result<()> {
        if depth > request.max_depth {
            return Ok(());
        }
        let abs = self.store.root().join(dir);
        if !abs.is_dir() {
            return Err(RulesError::NotFound);
        }
        if !self.gate.allowed(dir, user) {
            return Err(RulesError::AccessDenied);
        }
        ancestors.push(abs.canonicalize().unwrap_or_else(|_| abs.clone()));
        self.list_dir(dir, &abs, request, user, depth, ancestors, out);
        ancestors.pop();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn list_dir(
        &self,
        dir: &Path,
        abs: &Path,
        request: &WalkRequest,
        user: Option<&str>,
        depth: u32,
        ancestors: &mut Vec<PathBuf>,
        out: &mut FolderNode,
    ) {
        let mut files = Vec::new();
        let mut folders = Vec::new();

        for entry in WalkDir::new(abs).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = %abs.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if !path.is_dir() {
                files.push(name);
                continue;
            }

            if request.rule_folder() == Some(name.as_str()) {
                let (rule_files, rules) = self.collect_rules(path, request);
                out.rule_files = Some(rule_files);
                out.rules = Some(rules);
            }

            let child_dir = dir.join(&name);
            if !self.gate.allowed_dir(&child_dir, user) {
                continue;
            }

            let mut child = FolderNode::named(name);
            self.overlay_lookahead(path, request, &mut child);

            if depth < request.max_depth {
                let target = path.canonicalize().ok();
                if target.as_ref().is_some_and(|t| ancestors.contains(t)) {
                    tracing::warn!(dir = %path.display(), "symlink cycle, not descending");
                } else if let Err(e) =
                    self.walk_dir(&child_dir, request, user, depth + 1, ancestors, &mut child)
                {
                    child.error = Some(e.to_string());
                }
            }

            folders.push(child);
        }

        files.sort();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        out.files = Some(files);
        out.folders = Some(folders);
    }

    /// List every entry of a rule folder and parse the requested rule files.
    fn collect_rules(
        &self,
        dir: &Path,
        request: &WalkRequest,
    ) -> (Vec<String>, BTreeMap<String, Value>) {
        let mut rule_files = Vec::new();
        let mut rules = BTreeMap::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let wanted = name.ends_with(".json")
                && request
                    .rule_name_prefixes
                    .iter()
                    .any(|p| name.starts_with(p.as_str()));
            if wanted {
                if let Some(doc) = self.store.read(entry.path()) {
                    rules.insert(name.clone(), doc);
                }
            }
            rule_files.push(name);
        }
        rule_files.sort();
        (rule_files, rules)
    }

    fn overlay_lookahead(&self, dir: &Path, request: &WalkRequest, node: &mut FolderNode) {
        let Some(rule_folder) = request.rule_folder() else {
            return;
        };
        if request.lookahead_names.is_empty() {
            return;
        }
        let mut overlay = Value::Object(Map::new());
        for name in &request.lookahead_names {
            if !is_plain_name(name) {
                continue;
            }
            let path = dir.join(rule_folder).join(format!("{name}.json"));
            if let Some(doc) = self.store.read(&path) {
                patch::merge(&mut overlay, &doc);
            }
        }
        if let Value::Object(mut fields) = overlay {
            fields.retain(|key, _| !RESERVED_FIELDS.contains(&key.as_str()));
            node.overlay = fields;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn walker(root: &Path) -> RuleTreeWalker {
        RuleTreeWalker::new(
            DocumentStore::new(root, 1024 * 1024),
            AccessGate::new(root, ".htaccess"),
        )
    }

    fn touch(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn depth_zero_lists_only_immediate_entries() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        touch(&root.join("proj/f.txt"), "x");
        touch(&root.join("proj/sub/deep.txt"), "x");

        let node = walker(root).walk(Path::new("proj"), &WalkRequest::new(0), None).unwrap();
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"files": ["f.txt"], "folders": [{"name": "sub"}]})
        );
    }

    #[test]
    fn recursion_populates_child_nodes_and_sorts() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        touch(&root.join("proj/b.txt"), "");
        touch(&root.join("proj/a.txt"), "");
        touch(&root.join("proj/zeta/z.txt"), "");
        touch(&root.join("proj/alpha/inner/i.txt"), "");

        let node = walker(root).walk(Path::new("proj"), &WalkRequest::new(1), None).unwrap();
        assert_eq!(node.files, Some(vec!["a.txt".to_string(), "b.txt".to_string()]));
        let names: Vec<_> = node
            .folders
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| f.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        let alpha = node.folder("alpha").unwrap();
        assert_eq!(alpha.files, Some(vec![]));
        // depth 1 is the limit: inner is listed but not expanded
        let inner = alpha.folder("inner").unwrap();
        assert!(inner.files.is_none());
        assert_eq!(node.folder("zeta").unwrap().files, Some(vec!["z.txt".to_string()]));
    }

    #[test]
    fn missing_root_is_not_found() {
        let tempdir = tempfile::tempdir().unwrap();
        let err = walker(tempdir.path())
            .walk(Path::new("nope"), &WalkRequest::new(0), None)
            .unwrap_err();
        assert_eq!(err.to_string(), "No such folder.");
    }

    #[test]
    fn denied_root_and_denied_child() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        touch(&root.join("proj/open/o.txt"), "");
        touch(&root.join("proj/secret/.htaccess"), "Require user bob\n");
        touch(&root.join("locked/.htaccess"), "Require user bob\n");
        let walker = walker(root);

        let err = walker
            .walk(Path::new("locked"), &WalkRequest::new(0), Some("alice"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Access denied.");

        let node = walker
            .walk(Path::new("proj"), &WalkRequest::new(1), Some("alice"))
            .unwrap();
        assert!(node.folder("secret").is_none());
        assert!(node.folder("open").is_some());

        let node = walker
            .walk(Path::new("proj"), &WalkRequest::new(1), Some("bob"))
            .unwrap();
        assert!(node.folder("secret").is_some());
    }

    #[test]
    fn rule_folder_is_indexed_with_prefix_filter() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        touch(&root.join("proj/rules/rules.shot.json"), r#"{"fps": 24}"#);
        touch(&root.join("proj/rules/rules.broken.json"), "{oops");
        touch(&root.join("proj/rules/other.json"), r#"{"x": 1}"#);
        touch(&root.join("proj/rules/notes.txt"), "");

        let request = WalkRequest::new(0).with_rules("rules", &["rules"]);
        let node = walker(root).walk(Path::new("proj"), &request, None).unwrap();
        assert_eq!(
            node.rule_files,
            Some(vec![
                "notes.txt".to_string(),
                "other.json".to_string(),
                "rules.broken.json".to_string(),
                "rules.shot.json".to_string(),
            ])
        );
        let rules = node.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules["rules.shot.json"], json!({"fps": 24}));
        // the rule folder itself is still an ordinary child
        assert!(node.folders.unwrap().iter().any(|f| f.name.as_deref() == Some("rules")));
    }

    #[test]
    fn lookahead_overlays_child_folders() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        touch(&root.join("proj/shotA/rules/base.json"), r#"{"color": "red"}"#);
        touch(
            &root.join("proj/shotA/rules/status.json"),
            r#"{"status": {"done": true}, "name": "ignored"}"#,
        );
        std::fs::create_dir_all(root.join("proj/shotB")).unwrap();

        let request = WalkRequest::new(0)
            .with_rules("rules", &[])
            .with_lookahead(&["base", "status"]);
        let node = walker(root).walk(Path::new("proj"), &request, None).unwrap();
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(
            value["folders"],
            json!([
                {"name": "shotA", "color": "red", "status": {"done": true}},
                {"name": "shotB"}
            ])
        );
    }

    #[test]
    fn root_path_cannot_escape_data_root() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path().join("data");
        touch(&root.join("proj/in.txt"), "");
        let node = walker(&root)
            .walk(Path::new("../../proj"), &WalkRequest::new(0), None)
            .unwrap();
        assert_eq!(node.files, Some(vec!["in.txt".to_string()]));
    }

    #[test]
    fn rule_folder_must_be_a_plain_name() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        touch(&root.join("private/.htaccess"), "Require user bob\n");
        touch(&root.join("private/secret.json"), r#"{"password": "hunter2"}"#);
        std::fs::create_dir_all(root.join("proj/shotA")).unwrap();

        for folder in ["../../private", "..", ".", "a/b", ""] {
            let request = WalkRequest::new(0)
                .with_rules(folder, &["secret"])
                .with_lookahead(&["secret"]);
            assert_eq!(request.rule_folder(), None);
            let node = walker(root)
                .walk(Path::new("proj"), &request, Some("alice"))
                .unwrap();
            let shot = node.folder("shotA").unwrap();
            assert!(shot.overlay.is_empty(), "{folder} leaked {:?}", shot.overlay);
            assert!(node.rules.is_none());
        }
        assert_eq!(
            WalkRequest::new(0).with_rules("rules", &[]).rule_folder(),
            Some("rules")
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_are_not_followed() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        touch(&root.join("proj/a/file.txt"), "");
        std::os::unix::fs::symlink(root.join("proj"), root.join("proj/a/loop")).unwrap();

        let node = walker(root).walk(Path::new("proj"), &WalkRequest::new(10), None).unwrap();
        let a = node.folder("a").unwrap();
        let looped = a.folder("loop").unwrap();
        assert!(looped.folders.is_none());
        assert!(looped.error.is_none());
    }
}
