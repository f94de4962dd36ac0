// Document processor - walks a document in lock-step with its schema,
// depth-first, applying every applicable registered enrichment.

use crate::error::{DocflowError, Result};
use crate::reference::resolve_field_reference;
use crate::registry::ExtensionRegistry;
use crate::schema::{SchemaKind, SchemaNode};
use crate::store::DocumentStore;
use chrono::Utc;
use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// The acting user and tenant for the current request, read exclusively by
/// the audit-stamp enricher.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub user: String,
    pub tenant: String,
}

/// Read-only bundle threaded unchanged through one `process()` call, so any
/// enrichment handler can reach sibling/ancestor data or issue store lookups.
pub struct ProcessingContext<'a> {
    pub store: &'a dyn DocumentStore,
    /// Absent on create, present on update.
    pub doc_id: Option<&'a str>,
    pub full_entity: &'a Value,
    pub full_schema: &'a SchemaNode,
    pub identity: Option<&'a RequestIdentity>,
}

/// Applies registered enrichments to documents according to their schema.
/// Constructed fresh per request; holds no cross-request state.
pub struct Processor<'a> {
    schema: &'a SchemaNode,
    store: &'a dyn DocumentStore,
    registry: &'a ExtensionRegistry,
    identity: Option<RequestIdentity>,
}

impl<'a> Processor<'a> {
    pub fn new(
        schema: &'a SchemaNode,
        store: &'a dyn DocumentStore,
        registry: &'a ExtensionRegistry,
    ) -> Self {
        Processor {
            schema,
            store,
            registry,
            identity: None,
        }
    }

    /// Bind the request identity consumed by the audit-stamp enricher.
    pub fn with_identity(mut self, identity: RequestIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Apply every configured enrichment to the given document. The result is
    /// a new document; the input is never mutated. `id` is the identifier of
    /// the document being written - absent on create, present on update.
    pub fn process(&self, entity: &Value, id: Option<&str>) -> Result<Value> {
        let SchemaKind::Object { properties } = &self.schema.kind else {
            return Err(DocflowError::Schema(
                "top-level schema must be of type `object`".into(),
            ));
        };

        if !entity.is_object() {
            return Err(DocflowError::Validation(
                "top-level document must be an object".into(),
            ));
        }

        let context = ProcessingContext {
            store: self.store,
            doc_id: id,
            full_entity: entity,
            full_schema: self.schema,
            identity: self.identity.as_ref(),
        };

        let mut current = entity.clone();
        for (key, child_schema) in properties {
            let value = current.get(key).cloned();
            let processed = self.process_node(child_schema, value, &current, &context)?;
            if let Some(processed) = processed {
                if let Some(object) = current.as_object_mut() {
                    object.insert(key.clone(), processed);
                }
            }
        }

        Ok(current)
    }

    /// Depth-first recursion: enrichers first, then descend into the
    /// (possibly replaced) value. A `None` result means the field is omitted
    /// from the enclosing object.
    fn process_node(
        &self,
        schema: &SchemaNode,
        mut value: Option<Value>,
        parent: &Value,
        context: &ProcessingContext<'_>,
    ) -> Result<Option<Value>> {
        for (keyword, enrich) in self.registry.enrichers() {
            if let Some(config) = schema.extension(keyword) {
                debug!("applying enricher `{keyword}`");
                value = enrich(value.as_ref(), config, parent, context)?;
            }
        }

        match (&schema.kind, value) {
            (SchemaKind::Object { properties }, Some(Value::Object(map))) => {
                let mut current = Value::Object(map);
                for (key, child_schema) in properties {
                    let child = current.get(key).cloned();
                    let processed = self.process_node(child_schema, child, &current, context)?;
                    if let Some(processed) = processed {
                        if let Some(object) = current.as_object_mut() {
                            object.insert(key.clone(), processed);
                        }
                    }
                }
                Ok(Some(current))
            }
            (SchemaKind::Array { items }, Some(Value::Array(elements))) => {
                let list = Value::Array(elements);
                let mut processed_elements = Vec::new();
                if let Value::Array(elements) = &list {
                    for element in elements {
                        let processed =
                            self.process_node(items, Some(element.clone()), &list, context)?;
                        processed_elements.push(processed.unwrap_or(Value::Null));
                    }
                }
                Ok(Some(Value::Array(processed_elements)))
            }
            // leaf node, absent value, or type mismatch left for the validator
            (_, value) => Ok(value),
        }
    }
}

pub(crate) fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64() != Some(0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(elements)) => !elements.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
    }
}

#[derive(Debug, Deserialize)]
struct LogAccessConfig {
    created: String,
    updated: String,
    user: String,
    tenant: String,
}

/// `x-log-access`: stamp the creating/updating identity and timestamp. The
/// field can never be supplied by the caller.
pub(crate) fn log_access(
    entity: Option<&Value>,
    config: &Value,
    _parent: &Value,
    context: &ProcessingContext<'_>,
) -> Result<Option<Value>> {
    if is_truthy(entity) {
        return Err(DocflowError::ManualOverride {
            keyword: "x-log-access".into(),
        });
    }

    let config: LogAccessConfig = serde_json::from_value(config.clone())?;
    let identity = context.identity.ok_or(DocflowError::MissingIdentity)?;
    let timestamp = Utc::now().timestamp();

    let mut log = Map::new();
    if context.doc_id.is_none() {
        log.insert(config.created, timestamp.into());
    } else {
        log.insert(config.updated, timestamp.into());
    }
    log.insert(config.user, identity.user.clone().into());
    log.insert(config.tenant, identity.tenant.clone().into());

    Ok(Some(Value::Object(log)))
}

#[derive(Debug, Deserialize)]
struct FillFromFkeyConfig {
    source: FkeySource,
    fkey_field: String,
}

#[derive(Debug, Deserialize)]
struct FkeySource {
    index: String,
    doc_type: String,
    #[serde(default)]
    field: Option<String>,
}

/// `x-fill-from-fkey`: pull the referenced document(s) - or one of their
/// attributes - into the document being processed, denormalizing the
/// relationship. The field can never be supplied by the caller.
pub(crate) fn fill_from_fkey(
    entity: Option<&Value>,
    config: &Value,
    parent: &Value,
    context: &ProcessingContext<'_>,
) -> Result<Option<Value>> {
    if is_truthy(entity) {
        return Err(DocflowError::ManualOverride {
            keyword: "x-fill-from-fkey".into(),
        });
    }

    let config: FillFromFkeyConfig = serde_json::from_value(config.clone())?;
    let fkey_values = resolve_field_reference(&config.fkey_field, Some(parent), context.full_entity);

    if fkey_values.is_empty() {
        // nothing to denormalize; omit the field entirely
        return Ok(None);
    }

    let mut denormalized = Vec::new();
    for fkey in fkey_values {
        match fkey {
            Value::Array(ids) => {
                for id in ids {
                    denormalized.push(denormalize(&config.source, &id, context)?);
                }
            }
            id => denormalized.push(denormalize(&config.source, &id, context)?),
        }
    }

    Ok(Some(Value::Array(denormalized)))
}

fn denormalize(source: &FkeySource, id: &Value, context: &ProcessingContext<'_>) -> Result<Value> {
    let id = id.as_str().ok_or_else(|| {
        DocflowError::Validation(format!("foreign key value is not a string: {id}"))
    })?;

    // A missing source document is a hard failure of the write, never `null`.
    let document = context.store.get(&source.index, &source.doc_type, id)?;

    Ok(match source.field.as_deref() {
        Some(field) if !field.is_empty() => resolve_field_reference(field, None, &document)
            .into_iter()
            .next()
            .unwrap_or(Value::Null),
        _ => document,
    })
}

#[derive(Debug, Deserialize)]
struct IncludeParentsConfig {
    index: String,
    doc_type: String,
    parent_field: String,
}

/// `x-include-parents`: expand a list of child ids with every ancestor found
/// by following `parent_field` chains. Deduplicated set semantics; output
/// order is not meaningful.
pub(crate) fn include_parents(
    entity: Option<&Value>,
    config: &Value,
    _parent: &Value,
    context: &ProcessingContext<'_>,
) -> Result<Option<Value>> {
    if !is_truthy(entity) {
        // nothing to expand
        return Ok(entity.cloned());
    }

    let config: IncludeParentsConfig = serde_json::from_value(config.clone())?;
    let children = entity.and_then(Value::as_array).ok_or_else(|| {
        DocflowError::Validation("'x-include-parents' expects a list of document ids".into())
    })?;

    let mut collected: BTreeSet<String> = BTreeSet::new();
    for child in children {
        let child_id = child.as_str().ok_or_else(|| {
            DocflowError::Validation(format!("'x-include-parents' id is not a string: {child}"))
        })?;

        let mut current = Some(child_id.to_string());
        while let Some(id) = current {
            if !collected.insert(id.clone()) {
                // chain already walked from here (also breaks parent cycles)
                break;
            }
            let document = context
                .store
                .get(&config.index, &config.doc_type, &id)?;
            current = match document.get(&config.parent_field) {
                Some(Value::String(parent_id)) => Some(parent_id.clone()),
                Some(Value::Null) | None => None,
                Some(other) => {
                    return Err(DocflowError::Validation(format!(
                        "parent field `{}` is not a string id: {other}",
                        config.parent_field
                    )))
                }
            };
        }
    }

    Ok(Some(Value::Array(
        collected.into_iter().map(Value::String).collect(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(schema: Value) -> SchemaNode {
        SchemaNode::parse(&schema).unwrap()
    }

    fn identity() -> RequestIdentity {
        RequestIdentity {
            user: "fred@example.com".into(),
            tenant: "acme".into(),
        }
    }

    fn fkey_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create("people", "person", json!({"k": 1, "name": "ann"}), Some("a"))
            .unwrap();
        store
            .create("people", "person", json!({"k": 2, "name": "ben"}), Some("b"))
            .unwrap();
        store
    }

    #[test]
    fn schema_without_extensions_copies_the_document() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "nested": {
                    "type": "object",
                    "properties": {"inner": {"type": "number"}}
                }
            }
        }));
        let store = MemoryStore::new();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let entity = json!({
            "name": "fred",
            "tags": ["a", "b"],
            "nested": {"inner": 3},
            "undeclared": true
        });
        let processed = processor.process(&entity, None).unwrap();

        assert_eq!(processed, entity);
    }

    #[test]
    fn log_access_stamps_created_on_create() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "log": {
                    "type": "object",
                    "x-log-access": {
                        "created": "created_at",
                        "updated": "updated_at",
                        "user": "editor",
                        "tenant": "customer"
                    }
                }
            }
        }));
        let store = MemoryStore::new();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry).with_identity(identity());

        let processed = processor.process(&json!({}), None).unwrap();
        let log = processed["log"].as_object().unwrap();

        assert!(log.contains_key("created_at"));
        assert!(!log.contains_key("updated_at"));
        assert_eq!(log["editor"], json!("fred@example.com"));
        assert_eq!(log["customer"], json!("acme"));
    }

    #[test]
    fn log_access_stamps_updated_on_update() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "log": {
                    "type": "object",
                    "x-log-access": {
                        "created": "created_at",
                        "updated": "updated_at",
                        "user": "editor",
                        "tenant": "customer"
                    }
                }
            }
        }));
        let store = MemoryStore::new();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry).with_identity(identity());

        let processed = processor.process(&json!({}), Some("doc-1")).unwrap();
        let log = processed["log"].as_object().unwrap();

        assert!(log.contains_key("updated_at"));
        assert!(!log.contains_key("created_at"));
    }

    #[test]
    fn log_access_rejects_manual_override() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "log": {
                    "type": "object",
                    "x-log-access": {
                        "created": "created_at",
                        "updated": "updated_at",
                        "user": "editor",
                        "tenant": "customer"
                    }
                }
            }
        }));
        let store = MemoryStore::new();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry).with_identity(identity());

        let error = processor
            .process(&json!({"log": {"editor": "x"}}), None)
            .unwrap_err();

        assert!(matches!(error, DocflowError::ManualOverride { .. }));
        assert!(error.to_string().contains("cannot be overridden manually"));
    }

    #[test]
    fn log_access_requires_identity() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "log": {
                    "type": "object",
                    "x-log-access": {
                        "created": "created_at",
                        "updated": "updated_at",
                        "user": "editor",
                        "tenant": "customer"
                    }
                }
            }
        }));
        let store = MemoryStore::new();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let error = processor.process(&json!({}), None).unwrap_err();
        assert!(matches!(error, DocflowError::MissingIdentity));
    }

    fn fill_schema(field: Option<&str>) -> SchemaNode {
        let mut source = json!({"index": "people", "doc_type": "person"});
        if let Some(field) = field {
            source["field"] = json!(field);
        }
        parse(json!({
            "type": "object",
            "properties": {
                "person": {"type": "string"},
                "people": {"type": "array", "items": {"type": "string"}},
                "denormalized": {
                    "type": "array",
                    "x-fill-from-fkey": {
                        "source": source,
                        "fkey_field": "people"
                    }
                },
                "single": {
                    "type": "array",
                    "x-fill-from-fkey": {
                        "source": {"index": "people", "doc_type": "person"},
                        "fkey_field": "person"
                    }
                }
            }
        }))
    }

    #[test]
    fn fill_from_fkey_preserves_list_order() {
        let schema = fill_schema(None);
        let store = fkey_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor
            .process(&json!({"people": ["a", "b"]}), None)
            .unwrap();

        let denormalized = processed["denormalized"].as_array().unwrap();
        assert_eq!(denormalized[0]["k"], json!(1));
        assert_eq!(denormalized[1]["k"], json!(2));
    }

    #[test]
    fn fill_from_fkey_extracts_configured_field() {
        let schema = fill_schema(Some("name"));
        let store = fkey_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor
            .process(&json!({"people": ["b", "a"]}), None)
            .unwrap();

        assert_eq!(processed["denormalized"], json!(["ben", "ann"]));
    }

    #[test]
    fn fill_from_fkey_resolves_scalar_fkey() {
        let schema = fill_schema(None);
        let store = fkey_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor.process(&json!({"person": "a"}), None).unwrap();

        let single = processed["single"].as_array().unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0]["name"], json!("ann"));
    }

    #[test]
    fn fill_from_fkey_omits_field_without_fkey_values() {
        let schema = fill_schema(None);
        let store = fkey_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor.process(&json!({}), None).unwrap();

        assert!(processed.get("denormalized").is_none());
        assert!(processed.get("single").is_none());
    }

    #[test]
    fn fill_from_fkey_rejects_manual_value() {
        let schema = fill_schema(None);
        let store = fkey_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let error = processor
            .process(&json!({"denormalized": ["preset"]}), None)
            .unwrap_err();

        assert!(matches!(error, DocflowError::ManualOverride { .. }));
    }

    #[test]
    fn fill_from_fkey_missing_source_is_a_hard_failure() {
        let schema = fill_schema(None);
        let store = MemoryStore::new();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let error = processor
            .process(&json!({"people": ["ghost"]}), None)
            .unwrap_err();

        assert!(matches!(error, DocflowError::NotFound { .. }));
    }

    #[test]
    fn fill_from_fkey_works_inside_array_elements() {
        let schema = parse(json!({
            "type": "object",
            "properties": {
                "entries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "person": {"type": "string"},
                            "details": {
                                "type": "array",
                                "x-fill-from-fkey": {
                                    "source": {
                                        "index": "people",
                                        "doc_type": "person",
                                        "field": "name"
                                    },
                                    "fkey_field": ".person"
                                }
                            }
                        }
                    }
                }
            }
        }));
        let store = fkey_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor
            .process(
                &json!({"entries": [{"person": "a"}, {"person": "b"}]}),
                None,
            )
            .unwrap();

        assert_eq!(processed["entries"][0]["details"], json!(["ann"]));
        assert_eq!(processed["entries"][1]["details"], json!(["ben"]));
    }

    fn ancestry_store() -> MemoryStore {
        // tree: 0 -> {1, 2}, 2 -> {3, 4}, 3 -> {5, 6}
        let store = MemoryStore::new();
        for (id, parent) in [
            ("0", None),
            ("1", Some("0")),
            ("2", Some("0")),
            ("3", Some("2")),
            ("4", Some("2")),
            ("5", Some("3")),
            ("6", Some("3")),
        ] {
            let document = match parent {
                Some(parent) => json!({"parent": parent}),
                None => json!({}),
            };
            store
                .create("categories", "category", document, Some(id))
                .unwrap();
        }
        store
    }

    fn parents_schema() -> SchemaNode {
        parse(json!({
            "type": "object",
            "properties": {
                "categories": {
                    "type": "array",
                    "items": {"type": "string"},
                    "x-include-parents": {
                        "index": "categories",
                        "doc_type": "category",
                        "parent_field": "parent"
                    }
                }
            }
        }))
    }

    #[test]
    fn include_parents_collects_ancestor_set() {
        let schema = parents_schema();
        let store = ancestry_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor
            .process(&json!({"categories": ["6", "4"]}), None)
            .unwrap();

        let mut ids: Vec<&str> = processed["categories"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["0", "2", "3", "4", "6"]);
    }

    #[test]
    fn include_parents_passes_empty_list_through() {
        let schema = parents_schema();
        let store = ancestry_store();
        let registry = ExtensionRegistry::default();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor.process(&json!({"categories": []}), None).unwrap();
        assert_eq!(processed["categories"], json!([]));
    }

    #[test]
    fn empty_registry_disables_all_enrichment() {
        let schema = parents_schema();
        let store = ancestry_store();
        let registry = ExtensionRegistry::empty();
        let processor = Processor::new(&schema, &store, &registry);

        let processed = processor
            .process(&json!({"categories": ["6"]}), None)
            .unwrap();

        assert_eq!(processed["categories"], json!(["6"]));
    }
}
