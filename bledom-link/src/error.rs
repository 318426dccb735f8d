/// Failures reported by a [`Transport`](crate::Transport)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("write characteristic not found: {0}")]
    CharacteristicNotFound(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("operation timed out")]
    Timeout,
}

/// Failures seen by users of a [`LinkHandle`](crate::LinkHandle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The write did not go out and the link is now reconnecting. Nothing is
    /// retried; the caller replays its state once the link is back.
    #[error("link lost while writing")]
    LinkLost,
    #[error("link is not connected")]
    NotConnected,
    #[error("device link task has stopped")]
    Closed,
}
