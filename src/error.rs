//! Error types shared by the session driver and the aggregator.

use thiserror::Error;

/// Rejected roster passed to `ProgressAggregator::initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("roster must contain at least one agent")]
    Empty,

    #[error("duplicate agent id in roster: {0}")]
    DuplicateId(String),
}

/// Session-level failure. Distinct from per-agent errors, which stay on
/// their slot; every variant here is surfaced once and can be retried by
/// re-initializing the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("failed to start analysis: {0}")]
    StartFailed(String),

    #[error("connection to the server was lost before the analysis finished")]
    ChannelDisconnected,

    #[error("missed {0} push events, progress may be stale")]
    EventsDropped(u64),

    #[error("analysis failed on the server: {0}")]
    AnalysisFailed(String),

    #[error("could not subscribe to session updates: {0}")]
    Subscribe(String),
}
