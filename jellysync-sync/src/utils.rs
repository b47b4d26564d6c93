//! Helpers shared by provider adapters.

use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use jellysync_core::{SequenceItem, SyncError};
use regex::Regex;
use serde_json::{json, Value};

/// Type of the link records created by [`attach_contracts`].
pub const LINK_TYPE: &str = "link@1.0.0";

/// Trim, lowercase, replace anything outside `[a-z0-9-]` with `-` and
/// collapse runs of `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.trim().to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug
}

/// Date for a Unix timestamp in seconds.
pub fn date_from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch, 0).single()
}

/// Deep-merge `delta` onto a copy of `object`. Objects merge key by key;
/// arrays and scalars in `delta` replace what was there.
pub fn patch_object(object: &Value, delta: &Value) -> Value {
    let mut merged = object.clone();
    merge_into(&mut merged, delta);
    merged
}

fn merge_into(target: &mut Value, delta: &Value) {
    match (target, delta) {
        (Value::Object(target), Value::Object(delta)) => {
            for (key, value) in delta {
                match target.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, delta) => *target = delta.clone(),
    }
}

/// The fields of a record an attachment link needs. `id` may be a forward
/// reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRef {
    pub id: Value,
    pub slug: String,
    pub contract_type: String,
}

/// Intent creating an `is attached to` link from `from` to `to`.
pub fn attach_contracts(
    time: DateTime<Utc>,
    from: &ContractRef,
    to: &ContractRef,
    actor: &str,
) -> SequenceItem {
    SequenceItem::new(
        time,
        actor,
        json!({
            "slug": format!("link-{}-is-attached-to-{}", from.slug, to.slug),
            "type": LINK_TYPE,
            "name": "is attached to",
            "data": {
                "inverseName": "has attached element",
                "from": { "id": from.id, "type": from.contract_type },
                "to": { "id": to.id, "type": to.contract_type },
            },
        }),
    )
}

/// Intents posting `event` and attaching it to `target`.
///
/// `sequence_len` is the length of the sequence the intents will be appended
/// to; the link refers to the event by its position there.
pub fn post_event(
    sequence_len: usize,
    event: Option<&Value>,
    target: &ContractRef,
    actor: &str,
) -> Result<Vec<SequenceItem>, SyncError> {
    let Some(event) = event else {
        return Ok(Vec::new());
    };
    let data = event.get("data").cloned().unwrap_or(Value::Null);
    let time = event_time(data.get("timestamp"))?;

    let from = ContractRef {
        id: json!({ "$eval": format!("contracts[{sequence_len}].id") }),
        slug: string_field(event, "slug"),
        contract_type: string_field(event, "type"),
    };
    let to = ContractRef {
        id: data.get("target").cloned().unwrap_or(Value::Null),
        ..target.clone()
    };

    Ok(vec![
        SequenceItem::new(time, actor, event.clone()),
        attach_contracts(time, &from, &to, actor),
    ])
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// RFC 3339 strings, or milliseconds since the epoch.
fn event_time(timestamp: Option<&Value>) -> Result<DateTime<Utc>, SyncError> {
    let parsed = match timestamp {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|date| date.with_timezone(&Utc)),
        Some(Value::Number(millis)) => millis
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    };
    parsed.ok_or_else(|| {
        SyncError::InvalidEvent(format!(
            "event has no valid data.timestamp: {}",
            timestamp.unwrap_or(&Value::Null)
        ))
    })
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("valid email regex")
});

/// Case-insensitive `local@domain.tld` check with a letters-only TLD of at
/// least two characters.
pub fn is_email(input: &str) -> bool {
    EMAIL_RE.is_match(input)
}
