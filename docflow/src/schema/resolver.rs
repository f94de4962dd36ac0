// $ref inlining - turns a schema with internal references into a fully
// self-contained tree, so downstream components never see indirection.

use crate::error::{DocflowError, Result};
use serde_json::Value;

/// Dereferences a `$ref` URI to the schema fragment it names.
pub trait RefResolver {
    fn resolve(&self, reference: &str) -> Result<Value>;
}

/// Resolves `#/`-fragment references against a single root schema document.
pub struct LocalRefResolver {
    root: Value,
}

impl LocalRefResolver {
    pub fn new(root: Value) -> Self {
        LocalRefResolver { root }
    }
}

impl RefResolver for LocalRefResolver {
    fn resolve(&self, reference: &str) -> Result<Value> {
        let fragment = reference.strip_prefix('#').ok_or_else(|| {
            DocflowError::Schema(format!(
                "unsupported $ref `{reference}`: only fragment references can be resolved locally"
            ))
        })?;

        self.root
            .pointer(fragment)
            .cloned()
            .ok_or_else(|| DocflowError::Schema(format!("unresolvable $ref `{reference}`")))
    }
}

/// Recursively replace every `{"$ref": ...}` object with its resolved target,
/// itself recursively resolved. Key order is preserved.
///
/// A reference chain that revisits a URI fails with
/// [`DocflowError::SchemaCycle`] instead of recursing forever.
pub fn resolve_refs(schema: &Value, resolver: &dyn RefResolver) -> Result<Value> {
    let mut chain = Vec::new();
    resolve_value(schema, resolver, &mut chain)
}

fn resolve_value(schema: &Value, resolver: &dyn RefResolver, chain: &mut Vec<String>) -> Result<Value> {
    match schema {
        Value::Object(object) => {
            if let Some(reference) = object.get("$ref").and_then(Value::as_str) {
                if chain.iter().any(|seen| seen == reference) {
                    return Err(DocflowError::SchemaCycle {
                        reference: reference.to_string(),
                    });
                }

                chain.push(reference.to_string());
                let target = resolver.resolve(reference)?;
                let resolved = resolve_value(&target, resolver, chain)?;
                chain.pop();
                Ok(resolved)
            } else {
                let mut resolved = serde_json::Map::new();
                for (key, value) in object {
                    resolved.insert(key.clone(), resolve_value(value, resolver, chain)?);
                }
                Ok(Value::Object(resolved))
            }
        }
        Value::Array(elements) => elements
            .iter()
            .map(|element| resolve_value(element, resolver, chain))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}
