//! Config validation against a [`Schema`].
//!
//! Checks presence of required attributes, value types, nested blocks and
//! the per-attribute [`Validator`]s declared in the schema.
//!
//! # Example
//!
//! ```
//! use terraform_provider_snyk::schema::{Attribute, Schema, Validator};
//! use terraform_provider_snyk::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0().with_attribute(
//!     "name",
//!     Attribute::required_string().with_validator(Validator::NotEmpty),
//! );
//!
//! assert!(validate(&schema, &json!({"name": "my-project"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": ""}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("name".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema, Validator,
};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Attribute validators run on present values only
/// - Nested blocks are validated recursively when present
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diagnostic =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() {
                diagnostic
            } else {
                diagnostic.with_attribute(path)
            });
            return;
        },
    };

    for name in block.attribute_names() {
        let attr = &block.attributes[name];
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for name in block.block_names() {
        let nested = &block.blocks[name];
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            // validators assume a well-typed value
            if diagnostics.len() == before {
                for validator in &attr.validators {
                    if let Some(diagnostic) = run_validator(validator, v, path) {
                        diagnostics.push(diagnostic);
                    }
                }
            }
        },
    }
}

fn run_validator(validator: &Validator, value: &Value, path: &str) -> Option<Diagnostic> {
    let detail = match validator {
        Validator::NotEmpty => match value.as_str() {
            Some("") => Some(format!("Attribute {} must not be empty", path)),
            _ => None,
        },
        Validator::OneOf(allowed) => match value.as_str() {
            Some(s) if !allowed.iter().any(|a| a == s) => Some(format!(
                "Attribute {} {}, got: \"{}\"",
                path,
                validator.description(),
                s
            )),
            _ => None,
        },
        Validator::Int64Between(min, max) => match value.as_i64() {
            Some(n) if n < *min || n > *max => Some(format!(
                "Attribute {} {}, got: {}",
                path,
                validator.description(),
                n
            )),
            _ => None,
        },
    };

    detail.map(|detail| {
        Diagnostic::error(summary_for(validator))
            .with_detail(detail)
            .with_attribute(path)
    })
}

fn summary_for(validator: &Validator) -> String {
    match validator {
        Validator::NotEmpty => validator.description(),
        _ => "Invalid Attribute Value".to_string(),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if let Some(v) = value {
        validate_block(&nested.block, v, path, diagnostics);
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
