//! Durable edits: decode an instruction, lock the target, load, patch and
//! rewrite it.

use crate::access::AccessGate;
use crate::error::{Result, RulesError};
use crate::patch;
use crate::store::{clean_relative, DocumentStore};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One structural mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum EditOp {
    Merge(Value),
    ArrayAppend {
        id: Value,
        array: String,
        items: Vec<Value>,
    },
    Replace(Vec<Value>),
    Delete(Vec<Value>),
}

impl EditOp {
    pub fn apply(&self, doc: &mut Value) {
        match self {
            EditOp::Merge(src) => patch::merge(doc, src),
            EditOp::ArrayAppend { id, array, items } => patch::array_append(doc, id, array, items),
            EditOp::Replace(patches) => {
                for p in patches {
                    patch::replace(doc, p);
                }
            }
            EditOp::Delete(patterns) => {
                for p in patterns {
                    patch::delete(doc, p);
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EditKind {
    Merge,
    ArrayAppend,
    Replace,
    Delete,
}

/// Wire form of an edit. Accepts both the flag style
/// (`{"file", "add": true, "object"}`, `{"pusharray", "id", "objects"}`,
/// `{"replace": true, "objects"}`, `{"delobj": true, "objects"}`) and the
/// explicit `{"targetFile", "kind", "payload"}` style.
#[derive(Debug, Deserialize)]
struct RawEdit {
    #[serde(alias = "targetFile")]
    file: Option<PathBuf>,
    #[serde(default)]
    add: bool,
    object: Option<Value>,
    pusharray: Option<String>,
    id: Option<Value>,
    objects: Option<Vec<Value>>,
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    delobj: bool,
    kind: Option<EditKind>,
    payload: Option<Value>,
}

fn into_list(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

impl RawEdit {
    fn explicit_op(kind: EditKind, payload: Option<Value>) -> Result<EditOp> {
        Ok(match kind {
            EditKind::Merge => EditOp::Merge(payload.unwrap_or(Value::Null)),
            EditKind::ArrayAppend => {
                let mut payload = payload.unwrap_or(Value::Null);
                let array = payload
                    .get("array")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RulesError::InvalidRequest("arrayAppend needs an array name".into())
                    })?
                    .to_string();
                let id = payload.get_mut("id").map(Value::take).unwrap_or(Value::Null);
                let items = into_list(payload.get_mut("items").map(Value::take));
                EditOp::ArrayAppend { id, array, items }
            }
            EditKind::Replace => EditOp::Replace(into_list(payload)),
            EditKind::Delete => EditOp::Delete(into_list(payload)),
        })
    }
}

/// A decoded edit instruction against one document.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawEdit")]
pub struct EditRequest {
    pub target: PathBuf,
    pub op: EditOp,
}

impl TryFrom<RawEdit> for EditRequest {
    type Error = RulesError;

    fn try_from(raw: RawEdit) -> Result<Self> {
        let target = raw
            .file
            .ok_or_else(|| RulesError::InvalidRequest("missing target file".into()))?;
        let op = if let Some(kind) = raw.kind {
            RawEdit::explicit_op(kind, raw.payload)?
        } else if raw.add {
            EditOp::Merge(raw.object.unwrap_or(Value::Null))
        } else if let Some(array) = raw.pusharray {
            EditOp::ArrayAppend {
                id: raw.id.unwrap_or(Value::Null),
                array,
                items: raw.objects.unwrap_or_default(),
            }
        } else if raw.replace {
            EditOp::Replace(raw.objects.unwrap_or_default())
        } else if raw.delobj {
            EditOp::Delete(raw.objects.unwrap_or_default())
        } else {
            return Err(RulesError::InvalidRequest("no edit operation given".into()));
        };
        Ok(Self { target, op })
    }
}

impl EditRequest {
    pub fn new(target: impl Into<PathBuf>, op: EditOp) -> Self {
        Self {
            target: target.into(),
            op,
        }
    }

    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| RulesError::InvalidRequest(e.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EditStatus {
    Success,
    Error,
}

/// Result of an edit as reported to the caller.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct EditOutcome {
    pub status: EditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<()>> for EditOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                status: EditStatus::Success,
                error: None,
            },
            Err(e) => Self {
                status: EditStatus::Error,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Per-file mutexes serializing read-modify-write cycles on one document.
#[derive(Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `path` is free. The lock is held until the guard drops.
    pub fn lock(&self, path: &Path) -> ArcMutexGuard<RawMutex, ()> {
        let entry = {
            let mut locks = self.locks.lock();
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_arc()
    }

    /// Number of paths currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct Editor {
    store: DocumentStore,
    gate: AccessGate,
    locks: FileLocks,
}

impl Editor {
    pub fn new(store: DocumentStore, gate: AccessGate) -> Self {
        Self {
            store,
            gate,
            locks: FileLocks::new(),
        }
    }

    pub fn apply(&self, request: &EditRequest, user: Option<&str>) -> Result<()> {
        self.apply_all(&request.target, std::slice::from_ref(&request.op), user)
    }

    /// Apply `ops` in order to the document at `target` under a single lock.
    pub fn apply_all(&self, target: &Path, ops: &[EditOp], user: Option<&str>) -> Result<()> {
        self.update(target, user, |doc| {
            for op in ops {
                op.apply(doc);
            }
        })
    }

    /// Run `edit` over the document at `target` while holding its lock, then
    /// write the result back.
    pub fn update<F>(&self, target: &Path, user: Option<&str>, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Value),
    {
        let relative = clean_relative(target);
        if relative.as_os_str().is_empty() {
            return Err(RulesError::InvalidRequest("empty target path".into()));
        }
        if let Some(dir) = relative.parent() {
            if !self.gate.allowed(dir, user) {
                return Err(RulesError::AccessDenied);
            }
        }
        let path = self.store.root().join(&relative);
        let _guard = self.locks.lock(&path);
        let mut doc = self.store.load_or_empty(&path).map_err(|e| match e {
            RulesError::Io(source) => RulesError::write(&path, source),
            other => other,
        })?;
        edit(&mut doc);
        self.store.persist(&path, &doc)?;
        tracing::debug!(path = %path.display(), "document edited");
        Ok(())
    }

    pub fn locks(&self) -> &FileLocks {
        &self.locks
    }
}
