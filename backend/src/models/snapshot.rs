//! Canonical, type-erased entity snapshots.
//!
//! A snapshot is a JSON object keyed by column name. Composite aggregates embed
//! their ordered child rows under [`CHILDREN_KEY`], so one snapshot captures the
//! whole aggregate.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ChangeError;

/// Column-name keyed record with string/number/bool/null values.
pub type CanonicalRecord = Map<String, Value>;

/// Reserved key holding the ordered child rows of a composite aggregate.
pub const CHILDREN_KEY: &str = "_children";

/// Accepts a stored or caller-supplied value as a canonical record.
///
/// Anything other than a non-empty JSON object is rejected.
pub fn record_from_value(value: Value) -> Result<CanonicalRecord, ChangeError> {
    match value {
        Value::Object(map) if map.is_empty() => {
            Err(ChangeError::validation("snapshot must not be empty"))
        }
        Value::Object(map) => Ok(map),
        Value::Null => Err(ChangeError::validation("snapshot is missing")),
        other => Err(ChangeError::validation(format!(
            "snapshot must be an object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Converts a structured value into a canonical record through serde.
pub fn record_from_serializable<T: Serialize>(value: &T) -> Result<CanonicalRecord, ChangeError> {
    let value = serde_json::to_value(value)
        .map_err(|e| ChangeError::validation(format!("snapshot is not serializable: {e}")))?;
    record_from_value(value)
}

/// Splits a composite snapshot into its parent columns and child rows.
///
/// Returns `None` for the children when the record carries no children key.
pub fn split_children(
    mut record: CanonicalRecord,
) -> Result<(CanonicalRecord, Option<Vec<CanonicalRecord>>), ChangeError> {
    let children = match record.remove(CHILDREN_KEY) {
        None => None,
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| {
                    record_from_value(item)
                        .map_err(|e| e.context(format!("child row {}", idx)))
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(other) => {
            return Err(ChangeError::validation(format!(
                "{} must be an array, got {}",
                CHILDREN_KEY,
                json_kind(&other)
            )))
        }
    };
    if record.is_empty() {
        return Err(ChangeError::validation("snapshot has no parent columns"));
    }
    Ok((record, children))
}

/// Embeds child rows into a parent record under [`CHILDREN_KEY`].
pub fn with_children(mut parent: CanonicalRecord, children: Vec<Value>) -> CanonicalRecord {
    parent.insert(CHILDREN_KEY.to_string(), Value::Array(children));
    parent
}

/// Names of the fields whose values differ between two snapshots, sorted.
pub fn changed_fields(before: &CanonicalRecord, after: &CanonicalRecord) -> Vec<String> {
    let mut fields: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect();
    fields.sort();
    fields.dedup();
    fields
}

/// Renders a key value the way it compares against a text-cast key column.
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
