//! JSON-Schema checking of model answers.
//!
//! [`validate`] pulls the JSON payload out of a response (see
//! [`extract::extract_json`]), reduces the schema to the supported subset
//! ([`translate::translate`]) and reports each violation as
//! `<dotted.path>: <message>`.

use jsonschema::JSONSchema;
use promptlab_core::model::ValidationResult;
use promptlab_core::validation::SchemaValidator;
use serde_json::Value;

pub mod extract;
pub mod translate;

pub const NO_JSON_FOUND: &str = "No valid JSON found in response";

/// `/a/0/b` -> `a.0.b`; the document root is `root`.
fn dotted_path(pointer: &str) -> String {
    let parts: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|p| p.replace("~1", "/").replace("~0", "~"))
        .collect();
    if parts.is_empty() {
        "root".to_string()
    } else {
        parts.join(".")
    }
}

fn compile(schema: &str) -> Result<JSONSchema, String> {
    let raw: Value =
        serde_json::from_str(schema).map_err(|e| format!("Invalid schema: {}", e))?;
    let reduced = translate::translate(&raw);
    JSONSchema::options()
        .compile(&reduced)
        .map_err(|e| format!("Invalid schema: {}", e))
}

/// Never fails: bad schemas, missing JSON and violations all come back as an
/// invalid result.
pub fn validate(text: &str, schema: &str) -> ValidationResult {
    let compiled = match compile(schema) {
        Ok(c) => c,
        Err(msg) => {
            tracing::debug!(event = "schema_rejected", error = %msg);
            return ValidationResult::invalid(vec![msg]);
        }
    };

    let Some(instance) = extract::extract_json(text) else {
        return ValidationResult::invalid(vec![NO_JSON_FOUND.to_string()]);
    };

    let errors: Vec<String> = match compiled.validate(&instance) {
        Ok(()) => Vec::new(),
        Err(errs) => errs
            .map(|e| format!("{}: {}", dotted_path(&e.instance_path.to_string()), e))
            .collect(),
    };

    if errors.is_empty() {
        ValidationResult::valid(instance)
    } else {
        ValidationResult::invalid(errors)
    }
}

/// [`SchemaValidator`] backed by the `jsonschema` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, text: &str, schema: &str) -> ValidationResult {
        validate(text, schema)
    }
}
