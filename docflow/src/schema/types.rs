use crate::error::{DocflowError, Result};
use regex::Regex;
use serde_json::Value;

/// One recursive unit of the declarative document shape: a structural type
/// plus standard constraints and extension-keyword configuration.
///
/// Parsed from a resolved (ref-free) JSON schema; shared read-only across
/// requests after that.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub enum_values: Option<Vec<Value>>,
    pub pattern: Option<Regex>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
    /// Extension keywords in declaration order, raw config preserved for the
    /// registry handlers.
    pub extensions: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub enum SchemaKind {
    /// Declared properties in schema order.
    Object { properties: Vec<(String, SchemaNode)> },
    Array { items: Box<SchemaNode> },
    Scalar(ScalarKind),
    /// No `type` declared - structure is unconstrained at this node.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

/// Keywords consumed by the structural parse; everything else is either an
/// extension keyword or an ignorable annotation.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "type",
    "properties",
    "items",
    "enum",
    "pattern",
    "minimum",
    "maximum",
    "minItems",
    "maxItems",
    "uniqueItems",
];

const ANNOTATION_KEYWORDS: &[&str] = &[
    "id",
    "$schema",
    "title",
    "description",
    "format",
    "default",
    "example",
    "additionalProperties",
];

/// Bare (un-prefixed) keywords dispatched through the extension registry.
const BARE_EXTENSION_KEYWORDS: &[&str] = &["required", "fkey", "unique", "unique-together", "file"];

impl SchemaNode {
    /// Parse a resolved schema fragment into a typed node tree.
    pub fn parse(schema: &Value) -> Result<SchemaNode> {
        let object = schema
            .as_object()
            .ok_or_else(|| DocflowError::Schema("schema node must be an object".into()))?;

        if object.contains_key("$ref") {
            return Err(DocflowError::Schema(
                "unresolved $ref in schema: run resolve_refs first".into(),
            ));
        }

        let kind = match object.get("type").and_then(Value::as_str) {
            Some("object") => {
                let mut properties = Vec::new();
                if let Some(declared) = object.get("properties").and_then(Value::as_object) {
                    for (name, child) in declared {
                        properties.push((name.clone(), SchemaNode::parse(child)?));
                    }
                }
                SchemaKind::Object { properties }
            }
            Some("array") => {
                let items = object.get("items").ok_or_else(|| {
                    DocflowError::Schema("array schema requires `items`".into())
                })?;
                SchemaKind::Array {
                    items: Box::new(SchemaNode::parse(items)?),
                }
            }
            Some("string") => SchemaKind::Scalar(ScalarKind::String),
            Some("number") => SchemaKind::Scalar(ScalarKind::Number),
            Some("integer") => SchemaKind::Scalar(ScalarKind::Integer),
            Some("boolean") => SchemaKind::Scalar(ScalarKind::Boolean),
            Some("null") => SchemaKind::Scalar(ScalarKind::Null),
            Some(other) => {
                return Err(DocflowError::Schema(format!("unknown schema type `{other}`")))
            }
            None => SchemaKind::Any,
        };

        let pattern = match object.get("pattern").and_then(Value::as_str) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|error| {
                DocflowError::Schema(format!("invalid pattern `{pattern}`: {error}"))
            })?),
            None => None,
        };

        let mut extensions = Vec::new();
        for (key, value) in object {
            if STRUCTURAL_KEYWORDS.contains(&key.as_str())
                || ANNOTATION_KEYWORDS.contains(&key.as_str())
            {
                continue;
            }
            if key.starts_with("x-") || BARE_EXTENSION_KEYWORDS.contains(&key.as_str()) {
                extensions.push((key.clone(), value.clone()));
            }
        }

        Ok(SchemaNode {
            kind,
            enum_values: object.get("enum").and_then(Value::as_array).cloned(),
            pattern,
            minimum: object.get("minimum").and_then(Value::as_f64),
            maximum: object.get("maximum").and_then(Value::as_f64),
            min_items: object
                .get("minItems")
                .and_then(Value::as_u64)
                .map(|n| n as usize),
            max_items: object
                .get("maxItems")
                .and_then(Value::as_u64)
                .map(|n| n as usize),
            unique_items: object
                .get("uniqueItems")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            extensions,
        })
    }

    /// Config of an extension keyword declared on this node, if any.
    pub fn extension(&self, keyword: &str) -> Option<&Value> {
        self.extensions
            .iter()
            .find(|(name, _)| name == keyword)
            .map(|(_, config)| config)
    }

    /// Declared property schema, for object nodes.
    pub fn property(&self, name: &str) -> Option<&SchemaNode> {
        match &self.kind {
            SchemaKind::Object { properties } => properties
                .iter()
                .find(|(property, _)| property == name)
                .map(|(_, node)| node),
            _ => None,
        }
    }
}
