// src/exec/inputs.rs

//! Input resolution for a task attempt.

use serde_json::{Map, Value};

/// Merge a task's own params with its predecessors' results.
///
/// `params` is the base layer when it is an object. Predecessor results are
/// then overlaid in the given order, so a later predecessor wins on key
/// collision. A predecessor result that is not an object is kept whole under
/// the predecessor's id. Non-object params are kept under `"params"`.
pub fn merge_inputs<'a, I>(params: &Value, predecessors: I) -> Value
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut merged = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("params".to_string(), other.clone());
            map
        }
    };

    for (pred_id, result) in predecessors {
        match result {
            Value::Object(fields) => {
                for (key, value) in fields {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => {
                merged.insert(pred_id.to_string(), other.clone());
            }
        }
    }

    Value::Object(merged)
}
