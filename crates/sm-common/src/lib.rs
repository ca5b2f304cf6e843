//! Shared data model and error taxonomy for the SmartMessage workspace:
//! the envelope/header types of the messaging runtime, the filter
//! predicate used by subscriptions, and the base error type every other
//! crate builds on.

pub mod envelope;
pub mod error;
pub mod filter;
pub mod header;
pub mod logging;

pub use envelope::{EncodedEnvelope, Envelope};
pub use error::{PublishError, Result, SmartMessageError};
pub use filter::{Filters, Matcher};
pub use header::Header;
