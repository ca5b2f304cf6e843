//! Validation (spec §4.2 `validate!`/`validation_errors`, Property P2).
//! `validate_errors` enumerates every failure without raising;
//! `validate` raises on the first one, matching the source's
//! `"<Class>#<prop>: <message>"` message shape.

use serde_json::Value;
use sm_common::{Header, SmartMessageError};

use crate::schema::MessageSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    Message,
    Header,
    VersionMismatch,
}

#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub property: String,
    pub value: Value,
    pub message: String,
    pub source: FailureSource,
}

/// Per-property checks of spec §4.2 step 1: a property with a validator is
/// skipped when its value is nil and the property is optional; otherwise
/// the validator runs.
fn validate_properties(schema: &MessageSchema, payload: &Value) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();
    let obj = payload.as_object();

    for prop in &schema.properties {
        let value = obj.and_then(|o| o.get(&prop.name)).cloned().unwrap_or(Value::Null);
        let is_nil = value.is_null();

        if is_nil {
            if prop.required {
                failures.push(ValidationFailure {
                    property: prop.name.clone(),
                    value,
                    message: prop
                        .validation_message
                        .clone()
                        .unwrap_or_else(|| format!("{} is required", prop.name)),
                    source: FailureSource::Message,
                });
            }
            continue;
        }

        if let Some(validator) = &prop.validator {
            if !validator.check(&value) {
                failures.push(ValidationFailure {
                    property: prop.name.clone(),
                    value,
                    message: prop
                        .validation_message
                        .clone()
                        .unwrap_or_else(|| format!("{} failed validation", prop.name)),
                    source: FailureSource::Message,
                });
            }
        }
    }

    failures
}

/// Full `validate!` check set (spec §4.2 steps 1-3): property validators,
/// then `header.validate!`, then the version-equality assertion.
pub fn validate_errors(schema: &MessageSchema, header: &Header, payload: &Value) -> Vec<ValidationFailure> {
    let mut failures = validate_properties(schema, payload);

    if let Err(err) = header.validate() {
        failures.push(ValidationFailure {
            property: "header".to_string(),
            value: Value::Null,
            message: err.to_string(),
            source: FailureSource::Header,
        });
    }

    if header.version != schema.version {
        failures.push(ValidationFailure {
            property: "version".to_string(),
            value: serde_json::json!(header.version),
            message: format!(
                "{}: header version {} does not match declared class version {}",
                schema.message_class, header.version, schema.version
            ),
            source: FailureSource::VersionMismatch,
        });
    }

    failures
}

/// Raises on the first failure with the source's `"<Class>#<prop>: <message>"`
/// shape; returns `Ok(())` when `validate_errors` is empty (Property P2).
pub fn validate(schema: &MessageSchema, header: &Header, payload: &Value) -> Result<(), SmartMessageError> {
    let failures = validate_errors(schema, header, payload);
    match failures.first() {
        None => Ok(()),
        Some(first) => Err(SmartMessageError::ValidationError(format!(
            "{}#{}: {}",
            schema.message_class, first.property, first.message
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertySchema, Validator};
    use sm_common::Header;

    fn schema() -> MessageSchema {
        MessageSchema::builder("OrderCreated", 1)
            .property(PropertySchema::new("order_id").required())
            .property(
                PropertySchema::new("amount")
                    .required()
                    .validate_with(Validator::Range { min: 0.0, max: 1_000_000.0 })
                    .validation_message("amount must be non-negative"),
            )
            .build()
    }

    #[test]
    fn valid_payload_has_no_failures() {
        let header = Header::new("OrderCreated", 1, "orders-service");
        let payload = serde_json::json!({"order_id": "O1", "amount": 9.99});
        assert!(validate(&schema(), &header, &payload).is_ok());
    }

    #[test]
    fn missing_required_property_fails() {
        let header = Header::new("OrderCreated", 1, "orders-service");
        let payload = serde_json::json!({"amount": 9.99});
        let err = validate(&schema(), &header, &payload).unwrap_err();
        assert!(err.to_string().contains("order_id"));
    }

    #[test]
    fn out_of_range_value_fails_its_validator() {
        let header = Header::new("OrderCreated", 1, "orders-service");
        let payload = serde_json::json!({"order_id": "O1", "amount": -5.0});
        let err = validate(&schema(), &header, &payload).unwrap_err();
        assert!(err.to_string().contains("amount"));
    }

    #[test]
    fn version_mismatch_is_reported_with_version_source() {
        let mut header = Header::new("OrderCreated", 2, "orders-service");
        header.version = 2;
        let payload = serde_json::json!({"order_id": "O1", "amount": 9.99});
        let failures = validate_errors(&schema(), &header, &payload);
        assert!(failures.iter().any(|f| f.source == FailureSource::VersionMismatch));
    }

    #[test]
    fn validation_errors_truth_matches_validate_raising() {
        let header = Header::new("OrderCreated", 1, "orders-service");
        let valid_payload = serde_json::json!({"order_id": "O1", "amount": 9.99});
        let invalid_payload = serde_json::json!({"amount": 9.99});

        assert!(validate_errors(&schema(), &header, &valid_payload).is_empty());
        assert!(validate(&schema(), &header, &valid_payload).is_ok());

        assert!(!validate_errors(&schema(), &header, &invalid_payload).is_empty());
        assert!(validate(&schema(), &header, &invalid_payload).is_err());
    }
}
