// Field references - dotted paths into nested documents, resolved across
// list-valued intermediate fields.

use crate::error::{DocflowError, Result};
use serde_json::Value;

/// Resolve a dotted field path to every value it addresses.
///
/// A path starting with `.` is relative and descends from `parent`; any other
/// path descends from `root`. Intermediate arrays are flattened, so one path
/// can address many values. Candidates missing a key along the way are
/// silently dropped - a dangling path yields an empty result, never an error.
pub fn resolve_field_reference(path: &str, parent: Option<&Value>, root: &Value) -> Vec<Value> {
    let (prefix, level) = split_path(path);

    let entity = if prefix.first().is_some_and(|f| f.is_empty()) {
        parent.unwrap_or(root)
    } else {
        root
    };

    descend_through_levels(entity, &prefix)
        .into_iter()
        .filter_map(|document| document.get(level))
        .cloned()
        .collect()
}

/// Assign one value to each document the path's prefix references, in order.
///
/// Fails with [`DocflowError::ReferenceMismatch`] when the number of values
/// does not match the number of referenced documents.
pub fn assign_to_field_reference(path: &str, document: &mut Value, values: Vec<Value>) -> Result<()> {
    let (prefix, level) = split_path(path);

    let documents = descend_through_levels_mut(document, &prefix);

    if documents.len() != values.len() {
        return Err(DocflowError::ReferenceMismatch {
            values: values.len(),
            documents: documents.len(),
            path: path.to_string(),
        });
    }

    for (target, value) in documents.into_iter().zip(values) {
        match target.as_object_mut() {
            Some(object) => {
                object.insert(level.to_string(), value);
            }
            None => {
                return Err(DocflowError::Validation(format!(
                    "cannot assign `{path}` into a non-object value"
                )))
            }
        }
    }

    Ok(())
}

fn split_path(path: &str) -> (Vec<&str>, &str) {
    let mut fields: Vec<&str> = path.split('.').collect();
    // split() always yields at least one segment
    let level = fields.pop().unwrap_or("");
    (fields, level)
}

fn descend_through_levels<'a>(document: &'a Value, levels: &[&str]) -> Vec<&'a Value> {
    let mut current: Vec<&'a Value> = vec![document];

    for field in levels.iter().filter(|field| !field.is_empty()) {
        let mut next = Vec::new();
        for doc in current {
            let Some(child) = doc.get(field) else {
                continue;
            };
            match child {
                Value::Array(items) => next.extend(items.iter()),
                other => next.push(other),
            }
        }
        current = next;
    }

    current
}

fn descend_through_levels_mut<'a>(document: &'a mut Value, levels: &[&str]) -> Vec<&'a mut Value> {
    let mut current: Vec<&'a mut Value> = vec![document];

    for field in levels.iter().filter(|field| !field.is_empty()) {
        let mut next = Vec::new();
        for doc in current {
            let Some(child) = doc.get_mut(*field) else {
                continue;
            };
            match child {
                Value::Array(items) => next.extend(items.iter_mut()),
                other => next.push(other),
            }
        }
        current = next;
    }

    current
}
