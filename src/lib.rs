//! peer-session - offer/answer peer session orchestration
//!
//! Drives one peer-to-peer data channel connection through manual
//! signaling: the caller moves description text between the two sides and
//! the session sequences the engine calls in between.

pub mod config;
pub mod peer;
#[cfg(feature = "webrtc-engine")]
pub mod rtc;

// Re-exports
pub use config::{BinaryType, Config, IceServerConfig, PeerConfig, PeerOverrides, PeerSettings};
pub use peer::{PeerCallbacks, PeerError, PeerSession, Payload, SessionDescription, SessionHandle, SessionState};
