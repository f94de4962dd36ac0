// Extended validator - draft-4-style structural validation plus custom
// keyword validators that consult the document store and geocoder.

use crate::error::{DocflowError, Result};
use crate::geocode::{distance_meters, GeocodeProvider, Precision};
use crate::processor::is_truthy;
use crate::registry::ExtensionRegistry;
use crate::schema::{ScalarKind, SchemaKind, SchemaNode};
use crate::store::{DocumentStore, Query};
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// One violated constraint: a human-readable message plus the dotted path of
/// the offending field (empty at the document root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            path: String::new(),
            message: message.into(),
        }
    }

    fn prefixed(mut self, path: &str) -> Self {
        if !path.is_empty() {
            self.path = if self.path.is_empty() {
                path.to_string()
            } else {
                format!("{path}.{}", self.path)
            };
        }
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validates instances against a schema, collecting every violation rather
/// than failing on the first. Bound per request to the store, the upload root
/// for file checks, and optionally the `(index, doc_type)` coordinates that
/// scope uniqueness queries.
pub struct Validator<'a> {
    schema: &'a SchemaNode,
    store: &'a dyn DocumentStore,
    upload_root: PathBuf,
    index: Option<String>,
    doc_type: Option<String>,
    registry: &'a ExtensionRegistry,
    geocoder: Option<&'a dyn GeocodeProvider>,
}

impl<'a> Validator<'a> {
    pub fn new(
        schema: &'a SchemaNode,
        store: &'a dyn DocumentStore,
        upload_root: impl Into<PathBuf>,
        index: Option<String>,
        doc_type: Option<String>,
        registry: &'a ExtensionRegistry,
    ) -> Self {
        Validator {
            schema,
            store,
            upload_root: upload_root.into(),
            index,
            doc_type,
            registry,
            geocoder: None,
        }
    }

    /// Bind the geocoding provider consumed by `x-check-geolocation`.
    pub fn with_geocoder(mut self, geocoder: &'a dyn GeocodeProvider) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    pub fn geocoder(&self) -> Option<&dyn GeocodeProvider> {
        self.geocoder
    }

    /// Validate an instance; an empty list means valid. Store transport
    /// failures propagate as `Err`, never as validation errors.
    pub fn validate(&self, instance: &Value) -> Result<Vec<ValidationError>> {
        let mut errors = Vec::new();
        self.validate_node(self.schema, instance, "", &mut errors)?;
        Ok(errors)
    }

    fn validate_node(
        &self,
        schema: &SchemaNode,
        instance: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) -> Result<()> {
        // custom keyword validators first, standard checks after
        for (keyword, config) in &schema.extensions {
            if let Some(handler) = self.registry.validator(keyword) {
                debug!("applying validator `{keyword}`");
                let violations = handler(self, config, instance, schema)?;
                errors.extend(violations.into_iter().map(|error| error.prefixed(path)));
            }
        }

        if let Some(allowed) = &schema.enum_values {
            if !allowed.contains(instance) {
                errors.push(
                    ValidationError::new(format!("value {instance} is not one of {allowed:?}"))
                        .prefixed(path),
                );
            }
        }

        match &schema.kind {
            SchemaKind::Object { properties } => {
                let Some(fields) = instance.as_object() else {
                    errors.push(self.type_error("object", instance, path));
                    return Ok(());
                };
                for (name, child_schema) in properties {
                    if let Some(value) = fields.get(name) {
                        let child_path = join_path(path, name);
                        self.validate_node(child_schema, value, &child_path, errors)?;
                    }
                }
            }
            SchemaKind::Array { items } => {
                let Some(elements) = instance.as_array() else {
                    errors.push(self.type_error("array", instance, path));
                    return Ok(());
                };
                if let Some(min) = schema.min_items {
                    if elements.len() < min {
                        errors.push(
                            ValidationError::new(format!(
                                "array has {} items, fewer than minItems {min}",
                                elements.len()
                            ))
                            .prefixed(path),
                        );
                    }
                }
                if let Some(max) = schema.max_items {
                    if elements.len() > max {
                        errors.push(
                            ValidationError::new(format!(
                                "array has {} items, more than maxItems {max}",
                                elements.len()
                            ))
                            .prefixed(path),
                        );
                    }
                }
                if schema.unique_items && !all_unique(elements) {
                    errors.push(ValidationError::new("array items are not unique").prefixed(path));
                }
                for (position, element) in elements.iter().enumerate() {
                    let child_path = format!("{path}[{position}]");
                    self.validate_node(items, element, &child_path, errors)?;
                }
            }
            SchemaKind::Scalar(kind) => {
                self.validate_scalar(schema, *kind, instance, path, errors);
            }
            SchemaKind::Any => {}
        }

        Ok(())
    }

    fn validate_scalar(
        &self,
        schema: &SchemaNode,
        kind: ScalarKind,
        instance: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let matches = match kind {
            ScalarKind::String => instance.is_string(),
            ScalarKind::Number => instance.is_number(),
            ScalarKind::Integer => instance.is_i64() || instance.is_u64(),
            ScalarKind::Boolean => instance.is_boolean(),
            ScalarKind::Null => instance.is_null(),
        };
        if !matches {
            errors.push(self.type_error(scalar_name(kind), instance, path));
            return;
        }

        if let (Some(pattern), Some(text)) = (&schema.pattern, instance.as_str()) {
            if !pattern.is_match(text) {
                errors.push(
                    ValidationError::new(format!(
                        "'{text}' does not match pattern '{pattern}'"
                    ))
                    .prefixed(path),
                );
            }
        }

        if let Some(number) = instance.as_f64() {
            if let Some(minimum) = schema.minimum {
                if number < minimum {
                    errors.push(
                        ValidationError::new(format!("{number} is less than minimum {minimum}"))
                            .prefixed(path),
                    );
                }
            }
            if let Some(maximum) = schema.maximum {
                if number > maximum {
                    errors.push(
                        ValidationError::new(format!(
                            "{number} is greater than maximum {maximum}"
                        ))
                        .prefixed(path),
                    );
                }
            }
        }
    }

    fn type_error(&self, expected: &str, instance: &Value, path: &str) -> ValidationError {
        ValidationError::new(format!(
            "expected {expected}, got {}",
            type_name(instance)
        ))
        .prefixed(path)
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn all_unique(elements: &[Value]) -> bool {
    for (position, element) in elements.iter().enumerate() {
        if elements[position + 1..].contains(element) {
            return false;
        }
    }
    true
}

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::String => "string",
        ScalarKind::Number => "number",
        ScalarKind::Integer => "integer",
        ScalarKind::Boolean => "boolean",
        ScalarKind::Null => "null",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `required`: the named fields must be present and, when collections or
/// strings, non-empty. `0` and `false` are fine; only emptiness counts.
pub(crate) fn required(
    _validator: &Validator<'_>,
    config: &Value,
    instance: &Value,
    _schema: &SchemaNode,
) -> Result<Vec<ValidationError>> {
    let fields = config.as_array().ok_or_else(|| {
        DocflowError::Schema("`required` must be a list of field names".into())
    })?;

    let mut errors = Vec::new();
    for field in fields {
        let Some(name) = field.as_str() else {
            return Err(DocflowError::Schema(format!(
                "`required` field name is not a string: {field}"
            )));
        };
        match instance.get(name) {
            None => errors.push(ValidationError::new(format!("field '{name}' is required"))),
            Some(value) if is_empty(value) => {
                errors.push(ValidationError::new(format!(
                    "field '{name}' must not be empty"
                )));
            }
            Some(_) => {}
        }
    }
    Ok(errors)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(text) => text.is_empty(),
        Value::Array(elements) => elements.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct FkeyConfig {
    index: String,
    doc_type: String,
}

/// `fkey`: the instance string must identify an existing document.
pub(crate) fn fkey(
    validator: &Validator<'_>,
    config: &Value,
    instance: &Value,
    _schema: &SchemaNode,
) -> Result<Vec<ValidationError>> {
    let config: FkeyConfig = serde_json::from_value(config.clone())?;

    // non-string instances are reported by the structural type check
    let Some(id) = instance.as_str() else {
        return Ok(Vec::new());
    };

    match validator.store().get(&config.index, &config.doc_type, id) {
        Ok(_) => Ok(Vec::new()),
        Err(DocflowError::NotFound { .. }) => Ok(vec![ValidationError::new(format!(
            "Invalid foreign key: no such document {}/{}/{id}",
            config.index, config.doc_type
        ))]),
        Err(other) => Err(other),
    }
}

/// `unique` / `unique-together`: no other document in the validator's
/// `(index, doc_type)` may carry the same values for the configured field(s).
/// On update the instance's own document does not count against itself.
pub(crate) fn unique(
    validator: &Validator<'_>,
    config: &Value,
    instance: &Value,
    _schema: &SchemaNode,
) -> Result<Vec<ValidationError>> {
    let (Some(index), Some(doc_type)) = (validator.index(), validator.doc_type()) else {
        return Ok(vec![ValidationError::new(
            "index or doc_type need to be set for \"unique(-together)\" validator",
        )]);
    };

    let entries = config.as_array().ok_or_else(|| {
        DocflowError::Schema("`unique(-together)` must be a list of entries".into())
    })?;

    let is_create = instance.get("_id").is_none();
    let mut errors = Vec::new();

    for entry in entries {
        let fields: Vec<&str> = match entry {
            Value::String(name) => vec![name.as_str()],
            Value::Array(names) => {
                let fields: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
                if fields.len() != names.len() {
                    return Err(DocflowError::Schema(format!(
                        "`unique-together` entry contains non-string field names: {entry}"
                    )));
                }

                let present = fields
                    .iter()
                    .filter(|field| instance.get(**field).is_some())
                    .count();
                if present == 0 {
                    continue;
                }
                if present < fields.len() {
                    errors.push(ValidationError::new(format!(
                        "unique-together property {entry} needs all or none of its fields to be set"
                    )));
                    continue;
                }
                fields
            }
            other => {
                return Err(DocflowError::Schema(format!(
                    "`unique(-together)` entry must be a field name or list of field names: {other}"
                )))
            }
        };

        if fields.len() == 1 && instance.get(fields[0]).is_none() {
            continue;
        }

        let mut query = Query::new();
        for field in &fields {
            let value = instance.get(*field).cloned().unwrap_or(Value::Null);
            query = query.term(*field, value);
        }

        // hits is a list because there are many ways the data could already
        // have become inconsistent in the store
        let (hits, _) = validator.store().search(index, doc_type, &query)?;

        let conflicting: Vec<&Value> = if is_create {
            hits.iter().collect()
        } else {
            hits.iter()
                .filter(|hit| hit.get("_id") != instance.get("_id"))
                .collect()
        };

        if !conflicting.is_empty() {
            let ids: Vec<&str> = conflicting
                .iter()
                .filter_map(|hit| hit.get("_id").and_then(Value::as_str))
                .collect();
            errors.push(ValidationError::new(format!(
                "unique property {entry} conflicts with existing object(s): {ids:?}"
            )));
        }
    }

    Ok(errors)
}

/// `file`: the instance names a path that must exist under the validator's
/// upload root.
pub(crate) fn file(
    validator: &Validator<'_>,
    _config: &Value,
    instance: &Value,
    _schema: &SchemaNode,
) -> Result<Vec<ValidationError>> {
    let Some(relative) = instance.as_str() else {
        return Ok(Vec::new());
    };

    let file_path = validator.upload_root().join(relative.trim_start_matches('/'));
    if file_path.exists() {
        Ok(Vec::new())
    } else {
        Ok(vec![ValidationError::new(format!(
            "invalid file referenced (non-existent/unreadable): {}",
            file_path.display()
        ))])
    }
}

fn default_deviation() -> f64 {
    50.0
}

#[derive(Debug, Deserialize)]
struct GeolocationConfig {
    address_field: String,
    geopoint_field: String,
    override_field: String,
    #[serde(default = "default_deviation")]
    geopoint_deviation: f64,
}

/// `x-check-geolocation`: the address field must geocode to exactly one
/// rooftop-precision match; a supplied geopoint must lie within the deviation
/// threshold of the matched location. A truthy override field skips the
/// check entirely.
pub(crate) fn check_geolocation(
    validator: &Validator<'_>,
    config: &Value,
    instance: &Value,
    _schema: &SchemaNode,
) -> Result<Vec<ValidationError>> {
    let config: GeolocationConfig = serde_json::from_value(config.clone())?;

    if is_truthy(instance.get(&config.override_field)) {
        return Ok(Vec::new());
    }

    let address = instance
        .get(&config.address_field)
        .and_then(Value::as_str)
        .filter(|address| !address.is_empty());
    let Some(address) = address else {
        return Ok(vec![ValidationError::new(format!(
            "`{}` field is required for geo location check",
            config.address_field
        ))]);
    };

    let geocoder = validator.geocoder().ok_or_else(|| {
        DocflowError::Geocode("no geocode provider bound to validator".into())
    })?;
    let matches = geocoder.geocode(address)?;

    let mut errors = Vec::new();
    let matched = match matches.len() {
        1 => Some(&matches[0]),
        count => {
            errors.push(ValidationError::new(format!(
                "failed to validate address '{address}': {count} possible matches"
            )));
            None
        }
    };

    let Some(matched) = matched else {
        return Ok(errors);
    };

    if matched.precision != Precision::Rooftop {
        errors.push(ValidationError::new(format!(
            "failed to validate address '{address}': not specific enough"
        )));
    }

    let geopoint = instance.get(&config.geopoint_field);
    if is_truthy(geopoint) {
        // present and non-empty; shape still needs checking
        let geopoint = geopoint.unwrap_or(&Value::Null);
        match parse_geopoint(geopoint) {
            Some(point) => {
                let drift = distance_meters(point, matched.point());
                if drift > config.geopoint_deviation {
                    errors.push(ValidationError::new(format!(
                        "failed to validate geo point {point:?}: {drift:.1} (> {}) meters from matched location {:?}",
                        config.geopoint_deviation,
                        matched.point()
                    )));
                }
            }
            None => errors.push(ValidationError::new(format!(
                "`{}` is not a valid geo point: {geopoint}",
                config.geopoint_field
            ))),
        }
    }

    Ok(errors)
}

fn parse_geopoint(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Array(items) if items.len() == 2 => {
            Some((items[0].as_f64()?, items[1].as_f64()?))
        }
        Value::Object(fields) => Some((
            fields.get("lat")?.as_f64()?,
            fields.get("lon")?.as_f64()?,
        )),
        _ => None,
    }
}
