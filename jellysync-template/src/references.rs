//! The references environment that `$eval` paths resolve against.
//!
//! One slot per top-level sequence step. A step with a single intent records
//! its committed record directly at `contracts[i]`; a batch of several intents
//! records each one at `contracts[i][j]`. Slots are only ever filled in, never
//! removed, and the whole structure lives for one import call.

use serde_json::Value;

use crate::expression::Segment;

/// Root names that address the references environment.
pub const ROOTS: [&str; 2] = ["contracts", "cards"];

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Pending,
    Single(Value),
    Batch(Vec<Option<Value>>),
}

/// Committed records of one import call, addressed by step and sub-index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct References {
    slots: Vec<Slot>,
}

impl References {
    /// An environment with no steps recorded; every path is unresolved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the committed result of step `index`, sub-index `sub` when the
    /// step is a batch of more than one intent. A no-op commit records `null`.
    pub fn record(&mut self, index: usize, sub: Option<usize>, value: Value) {
        if self.slots.len() <= index {
            self.slots.resize(index + 1, Slot::Pending);
        }
        let slot = &mut self.slots[index];
        match sub {
            None => *slot = Slot::Single(value),
            Some(sub) => {
                if !matches!(slot, Slot::Batch(_)) {
                    *slot = Slot::Batch(Vec::new());
                }
                if let Slot::Batch(items) = slot {
                    if items.len() <= sub {
                        items.resize(sub + 1, None);
                    }
                    items[sub] = Some(value);
                }
            }
        }
    }

    /// Number of steps that have at least started recording.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resolve a path below the environment root. `None` means the path does
    /// not (yet) lead anywhere.
    pub fn resolve(&self, segments: &[Segment]) -> Option<Value> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(self.to_value());
        };
        let Segment::Index(index) = first else {
            return None;
        };
        let slot = self.slots.get(normalize_index(*index, self.slots.len())?)?;
        let value = match slot {
            Slot::Pending => return None,
            Slot::Single(value) => value.clone(),
            Slot::Batch(items) => batch_value(items),
        };
        navigate(&value, rest)
    }

    /// The environment as a JSON array, pending entries as `null`.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.slots
                .iter()
                .map(|slot| match slot {
                    Slot::Pending => Value::Null,
                    Slot::Single(value) => value.clone(),
                    Slot::Batch(items) => batch_value(items),
                })
                .collect(),
        )
    }
}

fn batch_value(items: &[Option<Value>]) -> Value {
    Value::Array(
        items
            .iter()
            .map(|item| item.clone().unwrap_or(Value::Null))
            .collect(),
    )
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 {
        i64::try_from(len).ok()? + index
    } else {
        index
    };
    usize::try_from(resolved).ok().filter(|i| *i < len)
}

/// Walk `segments` into `value`. Missing keys, out-of-range indexes and
/// lookups into scalars all resolve to `None`.
pub fn navigate(value: &Value, segments: &[Segment]) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Field(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => {
                items.get(normalize_index(*index, items.len())?)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}
