//! Many-to-many reconciliation: current related ids vs desired ids.

use serde_json::Value;
use std::collections::HashSet;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelationDiff {
    /// Desired but not currently connected.
    pub connect: Vec<Value>,
    /// Currently connected but no longer desired.
    pub disconnect: Vec<Value>,
}

/// Ids compare by their textual form so `1` and `"1"` match.
fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn diff_ids(current: &[Value], desired: &[Value]) -> RelationDiff {
    let current_keys: HashSet<String> = current.iter().map(id_key).collect();
    let desired_keys: HashSet<String> = desired.iter().map(id_key).collect();
    let mut seen = HashSet::new();
    let connect = desired
        .iter()
        .filter(|id| !current_keys.contains(&id_key(id)) && seen.insert(id_key(id)))
        .cloned()
        .collect();
    let disconnect = current
        .iter()
        .filter(|id| !desired_keys.contains(&id_key(id)) && seen.insert(id_key(id)))
        .cloned()
        .collect();
    RelationDiff { connect, disconnect }
}

/// Ids currently linked under `accessor` in a record loaded with that include.
pub fn linked_ids(record: &Value, accessor: &str) -> Vec<Value> {
    match record.get(accessor) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => obj.get("id").cloned(),
                Value::Null => None,
                other => Some(other.clone()),
            })
            .collect(),
        _ => Vec::new(),
    }
}
