//! Push channel client.
//!
//! This module provides the WebSocket connection that delivers live
//! `agent_update` / `analysis_complete` events, and the per-session
//! subscriptions built on top of it.

pub mod codec;
pub mod connection;

use thiserror::Error;

pub use codec::{ChannelEvent, Protocol};
pub use connection::{PushChannel, PushChannelConfig, Subscription};

/// Errors raised while connecting to or reading from the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("invalid push channel URL {0}: {1}")]
    InvalidUrl(String, String),

    #[error("failed to connect to {0}: {1}")]
    Connect(String, String),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("push channel handshake failed: {0}")]
    Handshake(String),

    #[error("push channel is not connected")]
    NotConnected,

    #[error("malformed push frame: {0}")]
    Decode(String),
}
