//! Error types for the relay queues.

/// Why a posted lookup response was not accepted.
///
/// The polling script is untrusted: it may answer late, answer twice, or
/// invent request ids. None of these are fatal, the caller logs and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("no pending request with id {0}")]
    UnknownRequest(String),

    #[error("a response for request {0} is already waiting to be consumed")]
    DuplicateResponse(String),

    #[error("response is missing a requestId")]
    MissingRequestId,
}
