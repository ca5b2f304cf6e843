//! Declarative message schema (spec §3.3, §4.2). The source's class-body
//! DSL (`property(name, options)`, class-level `from`/`to`/`reply_to`)
//! becomes a builder that produces one immutable `MessageSchema` value,
//! registered once per type — the design note's prescribed translation of
//! "class-level DSL and inheritance" into a systems language. Validators
//! collapse to a tagged enum per the same design note.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

/// One of the six validator kinds spec §3.3/§4.2 enumerates.
#[derive(Clone)]
pub enum Validator {
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    Regex(Regex),
    Enum(Vec<Value>),
    Range { min: f64, max: f64 },
    Type(ValueType),
    Exact(Value),
}

impl Validator {
    pub fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Validator::Predicate(Arc::new(f))
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Validator::Regex(Regex::new(pattern)?))
    }

    pub fn check(&self, value: &Value) -> bool {
        match self {
            Validator::Predicate(f) => f(value),
            Validator::Regex(r) => value.as_str().map(|s| r.is_match(s)).unwrap_or(false),
            Validator::Enum(set) => set.contains(value),
            Validator::Range { min, max } => value.as_f64().map(|n| n >= *min && n <= *max).unwrap_or(false),
            Validator::Type(t) => t.matches(value),
            Validator::Exact(expected) => expected == value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Bool,
    Array,
    Object,
}

impl ValueType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }
}

/// A default is either a literal value or a zero-arg producer invoked at
/// instance construction time (spec §4.2 "defaults may be literal values or
/// producers").
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Literal(v) => v.clone(),
            DefaultValue::Producer(f) => f(),
        }
    }
}

/// `property(name, options)` per spec §4.2.
#[derive(Clone)]
pub struct PropertySchema {
    pub name: String,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub validator: Option<Validator>,
    pub validation_message: Option<String>,
    pub description: Option<String>,
}

impl PropertySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
            validator: None,
            validation_message: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Literal(value));
        self
    }

    pub fn default_producer(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(DefaultValue::Producer(Arc::new(f)));
        self
    }

    pub fn validate_with(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn validation_message(mut self, message: impl Into<String>) -> Self {
        self.validation_message = Some(message.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Class-level addressing defaults (spec §4.2 "Addressing DSL"). Instance
/// setters override these; subclass lookup (spec: "inherited by
/// subclasses; lookup walks the class chain") has no Rust equivalent here
/// since composition replaces inheritance — a derived schema simply copies
/// or overrides the fields it needs (spec §9 "explicit schema composition").
#[derive(Clone, Default)]
pub struct AddressingDefaults {
    pub from: Option<String>,
    pub to: Option<String>,
    pub reply_to: Option<String>,
}

/// DDQ configuration a class declares (spec §3.3, §4.9.1).
#[derive(Clone, Copy)]
pub struct DdqSettings {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for DdqSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: sm_ddq::DEFAULT_CAPACITY,
        }
    }
}

/// The immutable, once-registered description of a typed message class
/// (spec §3.3). Validation and serialization loops walk `properties`
/// reflectively against the payload's JSON representation — the "side
/// `properties()` reflection table" the design notes call for.
pub struct MessageSchema {
    pub message_class: String,
    pub version: u32,
    pub description: Option<String>,
    pub properties: Vec<PropertySchema>,
    pub addressing: AddressingDefaults,
    pub serializer_name: String,
    pub transports: Vec<String>,
    pub ddq: DdqSettings,
}

pub struct MessageSchemaBuilder {
    message_class: String,
    version: u32,
    description: Option<String>,
    properties: Vec<PropertySchema>,
    addressing: AddressingDefaults,
    serializer_name: String,
    transports: Vec<String>,
    ddq: DdqSettings,
}

impl MessageSchema {
    pub fn builder(message_class: impl Into<String>, version: u32) -> MessageSchemaBuilder {
        MessageSchemaBuilder {
            message_class: message_class.into(),
            version,
            description: None,
            properties: Vec::new(),
            addressing: AddressingDefaults::default(),
            serializer_name: "json".to_string(),
            transports: Vec::new(),
            ddq: DdqSettings::default(),
        }
    }

    /// Applies every property's default where the payload JSON object is
    /// missing that key, invoking producer defaults fresh each call (spec
    /// §4.2: "producers are invoked at instance construction time").
    pub fn apply_defaults(&self, payload: &mut Value) {
        let Some(obj) = payload.as_object_mut() else {
            return;
        };
        for prop in &self.properties {
            if !obj.contains_key(&prop.name) || obj.get(&prop.name) == Some(&Value::Null) {
                if let Some(default) = &prop.default {
                    obj.insert(prop.name.clone(), default.resolve());
                }
            }
        }
    }
}

impl MessageSchemaBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn property(mut self, property: PropertySchema) -> Self {
        self.properties.push(property);
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.addressing.from = Some(from.into());
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.addressing.to = Some(to.into());
        self
    }

    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.addressing.reply_to = Some(reply_to.into());
        self
    }

    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer_name = name.into();
        self
    }

    pub fn transports(mut self, transports: Vec<String>) -> Self {
        self.transports = transports;
        self
    }

    pub fn ddq(mut self, ddq: DdqSettings) -> Self {
        self.ddq = ddq;
        self
    }

    pub fn build(self) -> MessageSchema {
        MessageSchema {
            message_class: self.message_class,
            version: self.version,
            description: self.description,
            properties: self.properties,
            addressing: self.addressing,
            serializer_name: self.serializer_name,
            transports: self.transports,
            ddq: self.ddq,
        }
    }
}

/// Process-wide registry of schemas keyed by `message_class`, written once
/// at registration time and read on every publish and every inbound decode
/// (spec §9 "Global mutable state": "writes at init, reads on every
/// publish").
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: dashmap::DashMap<String, Arc<MessageSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, schema: MessageSchema) -> Arc<MessageSchema> {
        let schema = Arc::new(schema);
        self.schemas.insert(schema.message_class.clone(), schema.clone());
        schema
    }

    pub fn get(&self, message_class: &str) -> Option<Arc<MessageSchema>> {
        self.schemas.get(message_class).map(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_defaults_fills_missing_fields_and_invokes_producers() {
        let schema = MessageSchema::builder("OrderCreated", 1)
            .property(PropertySchema::new("currency").default_value(serde_json::json!("USD")))
            .property(PropertySchema::new("created_at").default_producer(|| serde_json::json!("now")))
            .build();

        let mut payload = serde_json::json!({"order_id": "O1"});
        schema.apply_defaults(&mut payload);

        assert_eq!(payload["currency"], serde_json::json!("USD"));
        assert_eq!(payload["created_at"], serde_json::json!("now"));
        assert_eq!(payload["order_id"], serde_json::json!("O1"));
    }

    #[test]
    fn registry_get_returns_registered_schema() {
        let registry = SchemaRegistry::new();
        registry.register(MessageSchema::builder("OrderCreated", 1).build());
        let schema = registry.get("OrderCreated").unwrap();
        assert_eq!(schema.version, 1);
    }
}
