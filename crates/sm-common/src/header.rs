use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SmartMessageError;

/// Routing and identity record attached to every envelope.
///
/// `uuid` is immutable after construction; everything else may be set by
/// the publisher up until `publish()` overwrites `published_at`,
/// `publisher_pid` and `serializer`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub uuid: Uuid,
    pub message_class: String,
    pub published_at: DateTime<Utc>,
    pub publisher_pid: u32,
    pub version: u32,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serializer: Option<String>,
}

impl Header {
    /// Construct a header for a freshly instantiated message. `published_at`
    /// and `publisher_pid` are placeholders until `publish()` overwrites
    /// them; `version` must be the owning class's declared version.
    pub fn new(message_class: impl Into<String>, version: u32, from: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            message_class: message_class.into(),
            published_at: Utc::now(),
            publisher_pid: std::process::id(),
            version,
            from: from.into(),
            to: None,
            reply_to: None,
            serializer: None,
        }
    }

    /// `true` when this header denotes a broadcast message (no direct `to`).
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// Fails if any required field is missing/empty or `version` is not a
    /// positive integer. `version` is a `u32` here, so the only failure mode
    /// left to check is zero.
    pub fn validate(&self) -> Result<(), SmartMessageError> {
        if self.message_class.trim().is_empty() {
            return Err(SmartMessageError::ValidationError(
                "header: message_class is required".to_string(),
            ));
        }
        if self.from.trim().is_empty() {
            return Err(SmartMessageError::ValidationError(
                "header: from is required".to_string(),
            ));
        }
        if self.version == 0 {
            return Err(SmartMessageError::ValidationError(
                "header: version must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_header_is_broadcast_until_to_is_set() {
        let mut h = Header::new("OrderCreated", 1, "orders-service");
        assert!(h.is_broadcast());
        h.to = Some("payments-service".to_string());
        assert!(!h.is_broadcast());
    }

    #[test]
    fn validate_rejects_zero_version() {
        let mut h = Header::new("OrderCreated", 1, "orders-service");
        h.version = 0;
        assert!(h.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_from() {
        let h = Header::new("OrderCreated", 1, "");
        assert!(h.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_header() {
        let h = Header::new("OrderCreated", 1, "orders-service");
        assert!(h.validate().is_ok());
    }
}
