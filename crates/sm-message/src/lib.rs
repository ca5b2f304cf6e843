//! The typed message class (spec §4.2) and publish orchestration (spec
//! §4.11): the top of the dependency order in spec §2, tying together the
//! envelope, serializer, transport, dispatcher and DLQ crates beneath it.

pub mod config;
pub mod instance;
pub mod runtime;
pub mod schema;
pub mod validate;

pub use config::{ClassConfigOverride, GlobalConfig, LogFormat, LoggerConfig, LoggerSink, ResolvedClassConfig, RotationPolicy};
pub use instance::MessageInstance;
pub use runtime::{MessageRuntime, RuntimeReplayTarget, VersionCheckingSink};
pub use schema::{
    AddressingDefaults, DdqSettings, DefaultValue, MessageSchema, MessageSchemaBuilder, PropertySchema,
    SchemaRegistry, Validator, ValueType,
};
pub use validate::{validate, validate_errors, FailureSource, ValidationFailure};
