//! Peer session orchestration
//!
//! This module provides the offer/answer session state machine with:
//! - A capability boundary to the connection engine and data channel
//! - Session description encoding for out-of-band signaling
//! - Named caller callbacks
//! - A tokio driver that feeds engine events into a session

pub mod callbacks;
pub mod description;
pub mod driver;
pub mod engine;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod session;

pub use callbacks::PeerCallbacks;
pub use description::{SdpType, SessionDescription};
pub use driver::SessionHandle;
pub use engine::{ChannelEvent, ConnectionEngine, DataChannel, EngineError, EngineEvent, Payload, SessionEvent};
pub use session::{PeerSession, Role, SessionState};

use std::error::Error;
use std::fmt;

/// Peer session errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// Connection engine could not be created
    EngineInitialization(String),
    /// Offer or answer generation rejected by the engine
    Negotiation(String),
    /// Local or remote description rejected by the engine
    DescriptionAssignment(String),
    /// Caller-supplied description text failed to parse
    MalformedDescription(String),
    /// Data channel creation or transmission failed
    Channel(String),
    /// Operation not valid in the current state
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// Session never got a working engine
    Unusable,
    /// Data channel is not open
    NotConnected,
    /// A negotiation step exceeded the configured timeout
    Timeout(String),
    /// Session task stopped or reached a terminal state
    SessionEnded,
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::EngineInitialization(msg) => write!(f, "Engine initialization failed: {}", msg),
            PeerError::Negotiation(msg) => write!(f, "Negotiation failed: {}", msg),
            PeerError::DescriptionAssignment(msg) => write!(f, "Description assignment failed: {}", msg),
            PeerError::MalformedDescription(msg) => write!(f, "Malformed description: {}", msg),
            PeerError::Channel(msg) => write!(f, "DataChannel error: {}", msg),
            PeerError::InvalidState { operation, state } => {
                write!(f, "Invalid state: cannot {} while {}", operation, state)
            }
            PeerError::Unusable => write!(f, "Session is unusable"),
            PeerError::NotConnected => write!(f, "Not connected"),
            PeerError::Timeout(step) => write!(f, "Timed out waiting for {}", step),
            PeerError::SessionEnded => write!(f, "Session ended"),
        }
    }
}

impl Error for PeerError {}
