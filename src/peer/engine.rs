//! Connection engine boundary
//!
//! The engine (SDP generation, ICE, DTLS, SCTP) and its data channel are
//! external. A session talks to them only through these traits and learns
//! about asynchronous completions through [`EngineEvent`] and
//! [`ChannelEvent`] values delivered back to it in order.

use crate::config::{BinaryType, PeerSettings};
use bytes::Bytes;
use std::error::Error;
use std::fmt;

use super::description::SessionDescription;

/// Error reported by an engine binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for EngineError {}

/// Data channel message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

/// Parameters for creating the session's data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInit {
    pub label: String,
    pub reliable: bool,
    pub ordered: bool,
}

impl From<&PeerSettings> for ChannelInit {
    fn from(settings: &PeerSettings) -> Self {
        Self {
            label: settings.channel_name.clone(),
            reliable: settings.reliable,
            ordered: settings.ordered,
        }
    }
}

/// Overall peer connection state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// ICE agent state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Events raised by the connection engine
#[derive(Debug)]
pub enum EngineEvent<C> {
    OfferCreated(SessionDescription),
    OfferFailed(String),
    AnswerCreated(SessionDescription),
    AnswerFailed(String),
    LocalDescriptionSet,
    LocalDescriptionFailed(String),
    RemoteDescriptionSet,
    RemoteDescriptionFailed(String),
    /// A local candidate was discovered
    IceCandidate(String),
    /// Candidate gathering finished; carries the local description as it
    /// stands now, candidates included
    GatheringComplete {
        local_description: Option<SessionDescription>,
    },
    ConnectionStateChanged(ConnectionState),
    IceConnectionStateChanged(IceConnectionState),
    /// The remote peer created a data channel
    DataChannel(C),
    /// A channel returned by `create_data_channel` could not be created by
    /// the engine afterwards
    DataChannelFailed(String),
}

/// Events raised by the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Close,
    Error(String),
    Message(Payload),
}

/// Everything a session reacts to
#[derive(Debug)]
pub enum SessionEvent<C> {
    Engine(EngineEvent<C>),
    Channel(ChannelEvent),
}

/// Data channel capability
pub trait DataChannel {
    fn label(&self) -> &str;

    /// Must be called before the channel carries traffic
    fn set_binary_type(&mut self, binary_type: BinaryType);

    /// Start delivering open/close/error/message events to the session
    fn attach(&mut self);

    /// Replace all four reactions with inert ones
    fn detach(&mut self);

    fn send(&mut self, payload: Payload) -> Result<(), EngineError>;
}

/// Connection engine capability.
///
/// The asynchronous operations return immediately; each one later yields
/// exactly one success or failure [`EngineEvent`].
pub trait ConnectionEngine {
    type Channel: DataChannel;

    fn create_data_channel(&mut self, init: &ChannelInit) -> Result<Self::Channel, EngineError>;

    /// Completes with `OfferCreated` or `OfferFailed`
    fn create_offer(&mut self);

    /// Completes with `AnswerCreated` or `AnswerFailed`
    fn create_answer(&mut self);

    /// Completes with `LocalDescriptionSet` or `LocalDescriptionFailed`
    fn set_local_description(&mut self, description: SessionDescription);

    /// Completes with `RemoteDescriptionSet` or `RemoteDescriptionFailed`
    fn set_remote_description(&mut self, description: SessionDescription);

    fn close(&mut self);
}
