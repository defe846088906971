//! webrtc-rs engine binding
//!
//! This module provides the production connection engine with:
//! - Peer connection creation from [`crate::config::PeerSettings`]
//! - A data channel that forwards its events into the session queue
//! - Conversions between engine and session types

pub mod channel;
pub mod engine;

pub use channel::RtcChannel;
pub use engine::RtcEngine;

use tokio::sync::mpsc;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::PeerConfig;
use crate::peer::description::{SdpType, SessionDescription};
use crate::peer::driver::{self, SessionHandle};
use crate::peer::engine::{ConnectionState, EngineError, IceConnectionState};
use crate::peer::session::PeerSession;

/// Create a webrtc-rs backed session and start driving it.
///
/// Engine creation failures do not fail this call; the returned session is
/// unusable and reports [`crate::peer::PeerError::Unusable`].
pub async fn spawn_session(config: PeerConfig) -> SessionHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine = RtcEngine::create(&config.settings, events_tx).await;
    let session = PeerSession::new(config, engine);
    driver::spawn(session, events_rx)
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => IceConnectionState::New,
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
        }
    }
}

pub(crate) fn from_rtc_description(desc: &RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return Err(EngineError::new("Session description has no type")),
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp.clone(),
    })
}

pub(crate) fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let sdp = desc.sdp.clone();
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Rollback => return Err(EngineError::new("Rollback descriptions are not supported")),
    };
    result.map_err(|e| EngineError::new(format!("Invalid SDP {}: {}", desc.sdp_type, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 4596489990601351948 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn test_connection_state_mapping() {
        assert_eq!(ConnectionState::from(RTCPeerConnectionState::Unspecified), ConnectionState::New);
        assert_eq!(ConnectionState::from(RTCPeerConnectionState::Connected), ConnectionState::Connected);
        assert_eq!(
            IceConnectionState::from(RTCIceConnectionState::Failed),
            IceConnectionState::Failed
        );
        assert_eq!(
            IceConnectionState::from(RTCIceConnectionState::Completed),
            IceConnectionState::Completed
        );
    }

    #[test]
    fn test_description_conversions() {
        let answer = SessionDescription::answer(SDP);
        let rtc = to_rtc_description(&answer).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Answer);
        assert_eq!(from_rtc_description(&rtc).unwrap(), answer);
    }

    #[test]
    fn test_rollback_is_rejected() {
        let rollback = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(to_rtc_description(&rollback).is_err());
    }

    #[test]
    fn test_browser_json_parses_as_engine_description() {
        let json = SessionDescription::offer(SDP).to_json().unwrap();
        let rtc: RTCSessionDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Offer);
        assert_eq!(rtc.sdp, SDP);
    }
}
