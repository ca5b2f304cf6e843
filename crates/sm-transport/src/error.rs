use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport {0} is not connected")]
    NotConnected(String),
    #[error("transport connect failed: {0}")]
    ConnectFailed(String),
    #[error("transport publish failed: {0}")]
    PublishFailed(String),
    #[error("transport subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("unknown transport: {0}")]
    UnknownTransport(String),
    #[error(transparent)]
    Common(#[from] sm_common::SmartMessageError),
}

impl From<TransportError> for sm_common::SmartMessageError {
    fn from(err: TransportError) -> Self {
        sm_common::SmartMessageError::Other(err.to_string())
    }
}
