//! Session description text form
//!
//! Descriptions travel between peers as the JSON object a browser produces
//! for `JSON.stringify(localDescription)`. The `sdp` body is opaque here.

use super::PeerError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a description in the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured session description handed to and produced by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Parse the text form received from the remote peer
    pub fn from_json(json: &str) -> Result<Self, PeerError> {
        serde_json::from_str(json.trim())
            .map_err(|e| PeerError::MalformedDescription(e.to_string()))
    }

    /// Serialize to the text form handed to the remote peer
    pub fn to_json(&self) -> Result<String, PeerError> {
        serde_json::to_string(self)
            .map_err(|e| PeerError::MalformedDescription(format!("Failed to serialize description: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_browser_offer() {
        let json = r#"{"type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"}"#;
        let desc = SessionDescription::from_json(json).unwrap();
        assert_eq!(desc.sdp_type, SdpType::Offer);
        assert!(desc.sdp.starts_with("v=0"));
    }

    #[test]
    fn test_serialized_shape() {
        let json = SessionDescription::answer("v=0").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["sdp"], "v=0");
    }

    #[test]
    fn test_extra_keys_ignored() {
        let json = r#"{"type":"answer","sdp":"v=0","extra":1}"#;
        assert_eq!(SessionDescription::from_json(json).unwrap(), SessionDescription::answer("v=0"));
    }

    #[test]
    fn test_malformed_inputs() {
        for text in ["not json", "{}", r#"{"sdp":"v=0"}"#, r#"{"type":"bogus","sdp":"v=0"}"#] {
            match SessionDescription::from_json(text) {
                Err(PeerError::MalformedDescription(_)) => {}
                other => panic!("expected MalformedDescription for {:?}, got {:?}", text, other),
            }
        }
    }
}
