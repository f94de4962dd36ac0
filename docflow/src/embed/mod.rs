// Response embedding - replace foreign-key values in a document with the
// documents they reference, driven by the schema's fkey declarations.

use crate::error::{DocflowError, Result};
use crate::reference::{assign_to_field_reference, resolve_field_reference};
use crate::schema::{SchemaKind, SchemaNode};
use crate::store::DocumentStore;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct FkeyTarget {
    index: String,
    doc_type: String,
}

/// Embed the referenced documents for each dotted `path` into a copy of
/// `document`. Every path must terminate in a field declared as `fkey` /
/// `x-fkey` in the schema; list-valued fkey fields are embedded as lists.
pub fn embed_references(
    schema: &SchemaNode,
    store: &dyn DocumentStore,
    document: &Value,
    paths: &[&str],
) -> Result<Value> {
    let mut embedded = document.clone();

    for path in paths {
        let target = fkey_target(schema, path)?;

        let fkey_values = resolve_field_reference(path, None, &embedded);

        let mut documents = Vec::with_capacity(fkey_values.len());
        for fkey_value in fkey_values {
            documents.push(fetch(store, &target, &fkey_value)?);
        }

        assign_to_field_reference(path, &mut embedded, documents)?;
    }

    Ok(embedded)
}

/// Walk the path through the schema to the terminal fkey declaration.
fn fkey_target(schema: &SchemaNode, path: &str) -> Result<FkeyTarget> {
    let mut node = schema;
    let mut fkey = None;

    for field in path.split('.') {
        let Some(child) = node.property(field) else {
            fkey = None;
            break;
        };

        node = match &child.kind {
            SchemaKind::Array { items } => items,
            _ => child,
        };

        fkey = node.extension("fkey").or_else(|| node.extension("x-fkey"));
    }

    let Some(config) = fkey else {
        return Err(DocflowError::Validation(format!(
            "cannot embed `{path}`: not configured as a foreign key"
        )));
    };

    Ok(serde_json::from_value(config.clone())?)
}

fn fetch(store: &dyn DocumentStore, target: &FkeyTarget, fkey_value: &Value) -> Result<Value> {
    match fkey_value {
        Value::Array(ids) => ids
            .iter()
            .map(|id| fetch(store, target, id))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::String(id) => store.get(&target.index, &target.doc_type, id),
        other => Err(DocflowError::Validation(format!(
            "foreign key value is not a string: {other}"
        ))),
    }
}
