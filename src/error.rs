//! Error types for the leadership election service.

use thiserror::Error;

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, LeadershipError>;

/// Errors that can be returned to a caller of [`crate::LeadershipService`].
///
/// Everything election-loop related (lock-wait cancellation, broadcast
/// publish failures, decode failures, listener panics) is absorbed
/// internally and never surfaces here; see `DESIGN.md` for the mapping.
#[derive(Error, Debug)]
pub enum LeadershipError {
    /// `run_for_leadership`/`withdraw` was called with an empty topic name.
    #[error("topic name must not be empty")]
    InvalidTopic,

    /// `get_leader_board` is not implemented by this core; a cluster-wide
    /// view is a separate component.
    #[error("getLeaderBoard is not supported by the core leadership election service")]
    Unsupported,

    /// `ElectionConfig::validate` rejected a configuration.
    #[error("invalid election configuration: {0}")]
    Configuration(String),
}

/// Errors surfaced by a [`crate::codec::EventCodec`].
///
/// Decode failures are logged and dropped by the engine per the
/// "TransientBroadcastFailure" error kind; they never reach a caller.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The codec's own serialization backend failed.
    #[error("codec error: {0}")]
    Serialization(String),
}

/// Errors surfaced by an [`crate::substrate::OrderedTopic`] publish attempt.
///
/// Logged and ignored by the engine; a subsequent heartbeat or election
/// cycle is expected to recover the cluster view.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The substrate could not deliver the message to the topic.
    #[error("publish failed: {0}")]
    Unavailable(String),
}
