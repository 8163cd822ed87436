//! Error taxonomy for the CDP Multiplexer (spec.md §4.7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("upstream connection failed: {0}")]
    UpstreamUnreachable(String),

    #[error("no session registered for id {0}")]
    UnknownSession(uuid::Uuid),

    #[error("malformed CDP message: {0}")]
    MalformedMessage(String),

    #[error("webhook delivery failed: {0}")]
    WebhookDelivery(String),
}

pub type MuxResult<T> = Result<T, MuxError>;
