use thiserror::Error;

/// Shared error type for the messaging runtime. Every crate in the workspace
/// either returns this directly or wraps it in a more specific enum that
/// carries a `#[from]` conversion back into this one.
#[derive(Debug, Error)]
pub enum SmartMessageError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("transport not configured: {0}")]
    TransportNotConfigured(String),

    #[error("serializer not configured: {0}")]
    SerializerNotConfigured(String),

    #[error("publish failed on all transports: {0}")]
    PublishError(#[from] PublishError),

    #[error("unknown message class: {0}")]
    UnknownMessageClass(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("{0}")]
    Other(String),
}

/// Raised by `Message::publish` when every configured transport failed.
/// Carries the per-transport cause so callers can see the full picture
/// instead of only the last error.
#[derive(Debug, Error)]
#[error("all {} transport(s) failed: {}", failures.len(), summarize(failures))]
pub struct PublishError {
    pub failures: Vec<(String, SmartMessageError)>,
}

fn summarize(failures: &[(String, SmartMessageError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, SmartMessageError>;
