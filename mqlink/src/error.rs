use serde::{Deserialize, Serialize};

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Client-side error taxonomy. Every error is either *transient* (eligible
/// for retry, never permanently discards state) or *permanent* (discards the
/// failed subscription/session and is surfaced, never retried automatically).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure while connecting or exchanging a request.
    #[error("network error: {0}")]
    Network(String),
    /// The broker (or a shared session slot) did not respond in time.
    #[error("response timeout")]
    ResponseTimeout,
    /// Credential rejected by the broker.
    #[error("authentication rejected")]
    Auth,
    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Broker-side quota exceeded.
    #[error("quota exceeded")]
    Quota,
    /// Any other broker-reported failure.
    #[error("broker error: {0}")]
    Broker(String),
    /// The client was shut down via `close_all`.
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Transient errors are retried by the reconnect loop and leave pending
    /// subscriptions in place.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::ResponseTimeout)
    }

    #[inline]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classes() {
        assert!(ClientError::Network("reset".into()).is_transient());
        assert!(ClientError::ResponseTimeout.is_transient());
        assert!(ClientError::Auth.is_permanent());
        assert!(ClientError::Protocol("bad frame".into()).is_permanent());
        assert!(ClientError::Quota.is_permanent());
        assert!(ClientError::Broker("internal".into()).is_permanent());
        assert!(ClientError::Closed.is_permanent());
    }
}
