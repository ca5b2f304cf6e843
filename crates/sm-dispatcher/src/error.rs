use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("handler_id {0} is not registered")]
    UnknownHandler(String),
    #[error("dlq error: {0}")]
    Dlq(#[from] sm_dlq::DlqError),
    #[error("dispatcher did not finish shutting down within the bound")]
    ShutdownTimedOut,
}
