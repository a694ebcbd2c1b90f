//! Structural mutations over JSON documents.
//!
//! All operations mutate the destination in place and silently do nothing
//! when their inputs have the wrong shape, so that a partial or malformed
//! edit never fails a request.

use serde_json::{Map, Value};

/// Deep-merge `src` into `dst`. Only object fields are merged recursively;
/// arrays and scalars in `src` replace whatever `dst` holds.
pub fn merge(dst: &mut Value, src: &Value) {
    let (Value::Object(dst), Value::Object(src)) = (dst, src) else {
        return;
    };
    merge_maps(dst, src);
}

fn merge_maps(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, incoming) in src {
        match (dst.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            _ => {
                dst.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Append `items` to the array field `array` of every object whose `id`
/// equals `id`. A matching object is not searched any further.
pub fn array_append(dst: &mut Value, id: &Value, array: &str, items: &[Value]) {
    match dst {
        Value::Object(map) => {
            if map.get("id") == Some(id) {
                if let Some(Value::Array(target)) = map.get_mut(array) {
                    target.extend(items.iter().cloned());
                    return;
                }
            }
            for child in map.values_mut() {
                array_append(child, id, array, items);
            }
        }
        Value::Array(list) => {
            for child in list.iter_mut() {
                array_append(child, id, array, items);
            }
        }
        _ => {}
    }
}

/// Overwrite the fields of every object sharing `patch`'s `id` with the
/// remaining fields of `patch`. Children are visited before their parent.
pub fn replace(dst: &mut Value, patch: &Value) {
    let Some(fields) = patch.as_object() else {
        return;
    };
    let Some(id) = fields.get("id") else {
        return;
    };
    replace_by_id(dst, id, fields);
}

fn replace_by_id(dst: &mut Value, id: &Value, fields: &Map<String, Value>) {
    match dst {
        Value::Object(map) => {
            for child in map.values_mut() {
                replace_by_id(child, id, fields);
            }
            if map.get("id") == Some(id) {
                for (key, value) in fields {
                    if key != "id" {
                        map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Value::Array(list) => {
            for child in list.iter_mut() {
                replace_by_id(child, id, fields);
            }
        }
        _ => {}
    }
}

/// Remove every nested object carrying all of `pattern`'s fields with equal
/// values. Matched nodes are dropped whole; the rest are searched.
pub fn delete(dst: &mut Value, pattern: &Value) {
    let Some(pattern) = pattern.as_object() else {
        return;
    };
    // an empty pattern would match every object in the document
    if pattern.is_empty() {
        return;
    }
    delete_matching(dst, pattern);
}

fn delete_matching(dst: &mut Value, pattern: &Map<String, Value>) {
    match dst {
        Value::Object(map) => {
            map.retain(|_, child| !is_match(child, pattern));
            for child in map.values_mut() {
                if is_nonempty_container(child) {
                    delete_matching(child, pattern);
                }
            }
        }
        Value::Array(list) => {
            list.retain(|child| !is_match(child, pattern));
            for child in list.iter_mut() {
                if is_nonempty_container(child) {
                    delete_matching(child, pattern);
                }
            }
        }
        _ => {}
    }
}

fn is_match(candidate: &Value, pattern: &Map<String, Value>) -> bool {
    match candidate {
        Value::Object(map) if !map.is_empty() => {
            pattern.iter().all(|(key, value)| map.get(key) == Some(value))
        }
        _ => false,
    }
}

fn is_nonempty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(list) => !list.is_empty(),
        _ => false,
    }
}
