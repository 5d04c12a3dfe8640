//! JSON Schema validation for structured grade responses.

use std::sync::OnceLock;

/// Embedded response schema (loaded at compile time).
const GRADE_RESPONSE_SCHEMA_JSON: &str = include_str!("../../schema/grade_response.schema.json");

/// Compiled validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(GRADE_RESPONSE_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(|e| e.clone())
}

/// Validate a candidate response object.
///
/// Returns the list of violations, each with its instance path.
pub fn validate_grade_response(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
