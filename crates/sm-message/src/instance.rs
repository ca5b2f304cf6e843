//! A constructed instance of a typed message, ready for validation and
//! publish (spec §3.3 "Lifecycle", §4.1 "Construction", §4.2 "Addressing
//! DSL"). Pairs a header (seeded from the schema's addressing defaults)
//! with a payload value; instance setters mutate the header immediately,
//! matching the source's "setter mutates both the instance field and the
//! live header".

use serde::Serialize;
use sm_common::{Envelope, Header, SmartMessageError};

use crate::schema::MessageSchema;
use crate::validate;

/// A typed message ready to validate and publish. `T` is the application's
/// own payload struct — the "concrete struct per type" the design notes
/// prescribe in place of the source's dynamic property bag.
pub struct MessageInstance<T> {
    pub header: Header,
    pub payload: T,
}

impl<T: Serialize> MessageInstance<T> {
    /// Constructs a fresh instance: a new header seeded from the schema's
    /// declared version and addressing defaults (spec §4.1). `from` falls
    /// back to an empty string when the schema has no default — `publish`
    /// will reject that at validation time, not here.
    pub fn new(schema: &MessageSchema, payload: T) -> Self {
        let from = schema.addressing.from.clone().unwrap_or_default();
        let mut header = Header::new(schema.message_class.clone(), schema.version, from);
        header.to = schema.addressing.to.clone();
        header.reply_to = schema.addressing.reply_to.clone();
        Self { header, payload }
    }

    pub fn set_from(&mut self, from: impl Into<String>) -> &mut Self {
        self.header.from = from.into();
        self
    }

    pub fn set_to(&mut self, to: impl Into<String>) -> &mut Self {
        self.header.to = Some(to.into());
        self
    }

    pub fn clear_to(&mut self) -> &mut Self {
        self.header.to = None;
        self
    }

    pub fn set_reply_to(&mut self, reply_to: impl Into<String>) -> &mut Self {
        self.header.reply_to = Some(reply_to.into());
        self
    }

    /// Serializes the payload to a JSON value for schema-level validation
    /// (spec §4.2's reflective property walk) without touching the wire
    /// serializer, which may not be JSON.
    fn payload_json(&self) -> Result<serde_json::Value, SmartMessageError> {
        serde_json::to_value(&self.payload)
            .map_err(|e| SmartMessageError::Other(format!("payload reflection failed: {e}")))
    }

    /// Spec §4.2 `validate!`: property validators, header validity, and
    /// the version-equality assertion, raising on the first failure.
    pub fn validate(&self, schema: &MessageSchema) -> Result<(), SmartMessageError> {
        let payload_json = self.payload_json()?;
        validate::validate(schema, &self.header, &payload_json)
    }

    /// Spec §4.2 `validation_errors`: the same checks, returned as a list.
    pub fn validation_errors(&self, schema: &MessageSchema) -> Result<Vec<validate::ValidationFailure>, SmartMessageError> {
        let payload_json = self.payload_json()?;
        Ok(validate::validate_errors(schema, &self.header, &payload_json))
    }

    pub fn into_envelope(self) -> Envelope<T> {
        Envelope::new(self.header, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertySchema;
    use serde::Serialize;

    #[derive(Serialize)]
    struct OrderCreated {
        order_id: String,
        amount: f64,
    }

    fn schema() -> MessageSchema {
        MessageSchema::builder("OrderCreated", 1)
            .from("orders-service")
            .property(PropertySchema::new("order_id").required())
            .build()
    }

    #[test]
    fn new_instance_seeds_header_from_schema_defaults() {
        let instance = MessageInstance::new(
            &schema(),
            OrderCreated { order_id: "O1".to_string(), amount: 9.99 },
        );
        assert_eq!(instance.header.from, "orders-service");
        assert_eq!(instance.header.version, 1);
        assert!(instance.header.is_broadcast());
    }

    #[test]
    fn set_to_overrides_default_and_mutates_header_immediately() {
        let mut instance = MessageInstance::new(
            &schema(),
            OrderCreated { order_id: "O1".to_string(), amount: 9.99 },
        );
        instance.set_to("payments-service");
        assert_eq!(instance.header.to.as_deref(), Some("payments-service"));
    }

    #[test]
    fn validate_reflects_over_serialized_payload() {
        let instance = MessageInstance::new(
            &schema(),
            OrderCreated { order_id: "O1".to_string(), amount: 9.99 },
        );
        assert!(instance.validate(&schema()).is_ok());
    }
}
