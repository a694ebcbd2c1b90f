//! User documents under `users/` and news fan-out to their channels.

use crate::edit::Editor;
use crate::error::{Result, RulesError};
use crate::store::DocumentStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

pub const USERS_DIR: &str = "users";

/// Every `users/*.json` document keyed by file name. Malformed documents are
/// listed as `null`.
pub fn list_users(store: &DocumentStore) -> Result<BTreeMap<String, Value>> {
    let dir = store.resolve(USERS_DIR);
    if !dir.is_dir() {
        return Err(RulesError::Load {
            path: dir,
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    }
    let mut users = BTreeMap::new();
    for entry in WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".json") {
            continue;
        }
        let doc = store.read(entry.path()).unwrap_or(Value::Null);
        users.insert(name, doc);
    }
    Ok(users)
}

fn subscribed(user: &Value, path: &str) -> bool {
    user.get("channels")
        .and_then(Value::as_array)
        .is_some_and(|channels| {
            channels.iter().any(|c| {
                c.get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| path.starts_with(id))
            })
        })
}

/// Put `news` into the document's `news` array, overwriting an entry with
/// the same `path` in place or appending otherwise.
fn upsert_news(doc: &mut Value, path: &str, news: &Value) {
    let Value::Object(doc) = doc else {
        return;
    };
    let list = doc
        .entry("news")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(Vec::new());
    }
    let Value::Array(list) = list else {
        return;
    };
    let existing = list
        .iter_mut()
        .find(|entry| entry.get("path").and_then(Value::as_str) == Some(path));
    match existing {
        Some(entry) => *entry = news.clone(),
        None => list.push(news.clone()),
    }
}

/// Deliver `news` from `sender` to every user subscribed to a channel whose
/// id prefixes the news path. An earlier entry for the same path is replaced
/// where it stands. Returns the ids of the notified users.
pub fn publish_news(
    store: &DocumentStore,
    editor: &Editor,
    sender: Option<&str>,
    news: Value,
) -> Result<Vec<String>> {
    let sender = sender.ok_or(RulesError::NoUser)?;
    let Value::Object(mut news) = news else {
        return Err(RulesError::InvalidRequest("news must be an object".into()));
    };
    let path = news
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| RulesError::InvalidRequest("news needs a path".into()))?
        .to_string();
    news.insert("user".to_string(), Value::String(sender.to_string()));
    let news = Value::Object(news);

    let users: Vec<(String, Value)> = list_users(store)
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, doc)| doc.is_object())
        .collect();
    if users.is_empty() {
        return Err(RulesError::NoUsers);
    }

    let mut notified = Vec::new();
    for (file, user) in users {
        let Some(id) = user.get("id").and_then(Value::as_str) else {
            continue;
        };
        if !subscribed(&user, &path) {
            continue;
        }
        editor.update(&Path::new(USERS_DIR).join(&file), None, |doc| {
            upsert_news(doc, &path, &news)
        })?;
        notified.push(id.to_string());
    }
    tracing::info!(sender, path = %path, users = notified.len(), "news published");
    Ok(notified)
}
