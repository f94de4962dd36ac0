// Extension keyword dispatch - a named table of enrichment and validation
// handlers. The default registry wires up the built-in keywords; tests and
// embedders may substitute their own.

use crate::error::{DocflowError, Result};
use crate::processor::{self, ProcessingContext};
use crate::schema::SchemaNode;
use crate::validator::{self, ValidationError, Validator};
use serde_json::Value;
use std::collections::HashMap;

/// Enrichment handler: `(value, keyword config, parent document, context)`
/// returning the replacement value (`None` = omit the field).
pub type EnrichFn =
    fn(Option<&Value>, &Value, &Value, &ProcessingContext<'_>) -> Result<Option<Value>>;

/// Validation handler: `(validator, keyword config, instance, schema node)`
/// returning the collected violations for this keyword.
pub type ValidateFn =
    fn(&Validator<'_>, &Value, &Value, &SchemaNode) -> Result<Vec<ValidationError>>;

/// Registry of extension-keyword handlers, consulted by the processor (in
/// registration order) and the validator (by keyword lookup).
pub struct ExtensionRegistry {
    enrichers: Vec<(String, EnrichFn)>,
    validators: HashMap<String, ValidateFn>,
}

impl ExtensionRegistry {
    /// A registry with no handlers at all.
    pub fn empty() -> Self {
        ExtensionRegistry {
            enrichers: Vec::new(),
            validators: HashMap::new(),
        }
    }

    /// Register an enrichment handler; keyword collisions are rejected.
    pub fn register_enricher(&mut self, keyword: &str, handler: EnrichFn) -> Result<()> {
        if self.enrichers.iter().any(|(name, _)| name == keyword) {
            return Err(DocflowError::Schema(format!(
                "enricher already registered for keyword `{keyword}`"
            )));
        }
        self.enrichers.push((keyword.to_string(), handler));
        Ok(())
    }

    /// Register a validation handler; keyword collisions are rejected.
    pub fn register_validator(&mut self, keyword: &str, handler: ValidateFn) -> Result<()> {
        if self.validators.contains_key(keyword) {
            return Err(DocflowError::Schema(format!(
                "validator already registered for keyword `{keyword}`"
            )));
        }
        self.validators.insert(keyword.to_string(), handler);
        Ok(())
    }

    /// Enrichment handlers in registration order.
    pub fn enrichers(&self) -> &[(String, EnrichFn)] {
        &self.enrichers
    }

    pub fn validator(&self, keyword: &str) -> Option<ValidateFn> {
        self.validators.get(keyword).copied()
    }
}

impl Default for ExtensionRegistry {
    /// The built-in keyword handlers. Bare keywords and their `x-` aliases
    /// share one handler.
    fn default() -> Self {
        let mut registry = ExtensionRegistry::empty();

        registry
            .enrichers
            .push(("x-log-access".into(), processor::log_access as EnrichFn));
        registry.enrichers.push((
            "x-fill-from-fkey".into(),
            processor::fill_from_fkey as EnrichFn,
        ));
        registry.enrichers.push((
            "x-include-parents".into(),
            processor::include_parents as EnrichFn,
        ));

        let validators: [(&str, ValidateFn); 11] = [
            ("required", validator::required),
            ("x-required", validator::required),
            ("fkey", validator::fkey),
            ("x-fkey", validator::fkey),
            ("unique", validator::unique),
            ("x-unique", validator::unique),
            ("unique-together", validator::unique),
            ("x-unique-together", validator::unique),
            ("file", validator::file),
            ("x-file", validator::file),
            ("x-check-geolocation", validator::check_geolocation),
        ];
        for (keyword, handler) in validators {
            registry.validators.insert(keyword.to_string(), handler);
        }

        registry
    }
}
