//! JSON-Patch (RFC 6902) over `serde_json` values.
//!
//! Operations are applied in order to a working copy; the document is only
//! replaced once every operation succeeded.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

/// Apply `operations` to `doc`. On error `doc` is left untouched and the
/// message names the failing pointer.
pub fn apply(doc: &mut Value, operations: &[PatchOperation]) -> Result<(), String> {
    let mut working = doc.clone();
    for operation in operations {
        apply_one(&mut working, operation)?;
    }
    *doc = working;
    Ok(())
}

fn apply_one(doc: &mut Value, operation: &PatchOperation) -> Result<(), String> {
    match operation {
        PatchOperation::Add { path, value } => add(doc, path, value.clone()),
        PatchOperation::Remove { path } => remove(doc, path).map(drop),
        PatchOperation::Replace { path, value } => {
            let target = doc
                .pointer_mut(path)
                .ok_or_else(|| format!("replace: no value at {path}"))?;
            *target = value.clone();
            Ok(())
        }
        PatchOperation::Move { from, path } => {
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOperation::Copy { from, path } => {
            let value = doc
                .pointer(from)
                .cloned()
                .ok_or_else(|| format!("copy: no value at {from}"))?;
            add(doc, path, value)
        }
        PatchOperation::Test { path, value } => match doc.pointer(path) {
            Some(found) if found == value => Ok(()),
            _ => Err(format!("test: value at {path} differs")),
        },
    }
}

/// Split a pointer into its parent pointer and the unescaped last token.
fn split(path: &str) -> Result<(&str, String), String> {
    let (parent, last) = path
        .rsplit_once('/')
        .ok_or_else(|| format!("invalid pointer {path:?}"))?;
    Ok((parent, last.replace("~1", "/").replace("~0", "~")))
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<(), String> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, key) = split(path)?;
    match doc.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.insert(key, value);
            Ok(())
        }
        Some(Value::Array(items)) => {
            let index = if key == "-" {
                items.len()
            } else {
                key.parse::<usize>()
                    .ok()
                    .filter(|i| *i <= items.len())
                    .ok_or_else(|| format!("add: bad array index at {path}"))?
            };
            items.insert(index, value);
            Ok(())
        }
        _ => Err(format!("add: no container at {parent:?}")),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Value, String> {
    let (parent, key) = split(path)?;
    let removed = match doc.pointer_mut(parent) {
        Some(Value::Object(map)) => map.remove(&key),
        Some(Value::Array(items)) => key
            .parse::<usize>()
            .ok()
            .filter(|i| *i < items.len())
            .map(|i| items.remove(i)),
        _ => None,
    };
    removed.ok_or_else(|| format!("remove: no value at {path}"))
}
