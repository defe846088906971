//! Configuration management for peer sessions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::peer::callbacks::PeerCallbacks;

/// Default STUN server used when no ICE servers are configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default data channel label
pub const DEFAULT_CHANNEL_NAME: &str = "peer";

/// How binary payloads are surfaced by the data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
    #[default]
    Blob,
    ArrayBuffer,
}

impl BinaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryType::Blob => "blob",
            BinaryType::ArrayBuffer => "arraybuffer",
        }
    }
}

/// A single STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Data settings of a peer session.
///
/// Every field has a documented default; a TOML `[peer]` table or a
/// [`PeerOverrides`] value replaces them key by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSettings {
    /// Data channel label
    #[serde(default = "default_channel_name")]
    pub channel_name: String,

    /// Binary transfer mode of the data channel
    #[serde(default)]
    pub binary_type: BinaryType,

    /// Retransmit lost messages
    #[serde(default = "default_true")]
    pub reliable: bool,

    /// Deliver messages in order
    #[serde(default = "default_true")]
    pub ordered: bool,

    /// STUN/TURN servers handed to the engine
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    /// Fail a negotiation step that stays pending longer than this
    #[serde(default)]
    pub negotiation_timeout_ms: Option<u64>,

    /// Tear the session down when ICE reports `failed`
    #[serde(default)]
    pub close_on_ice_failure: bool,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            channel_name: default_channel_name(),
            binary_type: BinaryType::Blob,
            reliable: true,
            ordered: true,
            ice_servers: default_ice_servers(),
            negotiation_timeout_ms: None,
            close_on_ice_failure: false,
        }
    }
}

/// Partial settings supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerOverrides {
    pub channel_name: Option<String>,
    pub binary_type: Option<BinaryType>,
    pub reliable: Option<bool>,
    pub ordered: Option<bool>,
    pub ice_servers: Option<Vec<IceServerConfig>>,
    pub negotiation_timeout_ms: Option<u64>,
    pub close_on_ice_failure: Option<bool>,
}

impl PeerSettings {
    /// Replace every key set in `overrides`, keeping the rest
    pub fn with_overrides(mut self, overrides: PeerOverrides) -> Self {
        if let Some(name) = overrides.channel_name {
            self.channel_name = name;
        }
        if let Some(binary_type) = overrides.binary_type {
            self.binary_type = binary_type;
        }
        if let Some(reliable) = overrides.reliable {
            self.reliable = reliable;
        }
        if let Some(ordered) = overrides.ordered {
            self.ordered = ordered;
        }
        if let Some(servers) = overrides.ice_servers {
            self.ice_servers = servers;
        }
        if let Some(timeout) = overrides.negotiation_timeout_ms {
            self.negotiation_timeout_ms = Some(timeout);
        }
        if let Some(close) = overrides.close_on_ice_failure {
            self.close_on_ice_failure = close;
        }
        self
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_ms.map(Duration::from_millis)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.channel_name.is_empty() {
            return Err("Channel name must not be empty".into());
        }

        // SCTP labels are carried in a 16-bit length field
        if self.channel_name.len() > u16::MAX as usize {
            return Err("Channel name is too long".into());
        }

        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entry has no URLs".into());
            }
            for url in &server.urls {
                let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
                if !is_turn && !url.starts_with("stun:") && !url.starts_with("stuns:") {
                    return Err(format!("Unsupported ICE server URL: {}", url).into());
                }
                if is_turn && (server.username.is_none() || server.credential.is_none()) {
                    return Err(format!("TURN server {} requires username and credential", url).into());
                }
            }
        }

        if self.negotiation_timeout_ms == Some(0) {
            return Err("Negotiation timeout must be non-zero".into());
        }

        Ok(())
    }
}

/// Everything a session is constructed from: merged settings plus the
/// caller's callbacks.
#[derive(Default)]
pub struct PeerConfig {
    pub settings: PeerSettings,
    pub callbacks: PeerCallbacks,
}

impl PeerConfig {
    /// Merge caller overrides on top of the defaults
    pub fn new(overrides: PeerOverrides, callbacks: PeerCallbacks) -> Self {
        Self {
            settings: PeerSettings::default().with_overrides(overrides),
            callbacks,
        }
    }

    pub fn from_settings(settings: PeerSettings) -> Self {
        Self {
            settings,
            callbacks: PeerCallbacks::default(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: PeerCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// File configuration for the command line tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Peer overrides applied on top of the built-in defaults
    #[serde(default)]
    pub peer: PeerOverrides,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Settings after applying the file's overrides to the defaults
    pub fn peer_settings(&self) -> PeerSettings {
        PeerSettings::default().with_overrides(self.peer.clone())
    }
}

fn default_channel_name() -> String {
    DEFAULT_CHANNEL_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)]
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = PeerSettings::default();
        assert_eq!(settings.channel_name, "peer");
        assert_eq!(settings.binary_type, BinaryType::Blob);
        assert!(settings.reliable);
        assert!(settings.ordered);
        assert_eq!(settings.ice_servers, vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)]);
        assert!(settings.negotiation_timeout().is_none());
        assert!(!settings.close_on_ice_failure);
    }

    #[test]
    fn empty_overrides_keep_defaults() {
        let merged = PeerSettings::default().with_overrides(PeerOverrides::default());
        assert_eq!(merged, PeerSettings::default());
    }

    #[test]
    fn overrides_replace_only_set_keys() {
        let overrides = PeerOverrides {
            channel_name: Some("chat".to_string()),
            ordered: Some(false),
            ..Default::default()
        };
        let merged = PeerSettings::default().with_overrides(overrides);
        let defaults = PeerSettings::default();

        assert_eq!(merged.channel_name, "chat");
        assert!(!merged.ordered);
        assert_eq!(merged.binary_type, defaults.binary_type);
        assert_eq!(merged.reliable, defaults.reliable);
        assert_eq!(merged.ice_servers, defaults.ice_servers);
        assert_eq!(merged.negotiation_timeout_ms, defaults.negotiation_timeout_ms);
    }

    #[test]
    fn every_key_can_be_overridden() {
        let servers = vec![IceServerConfig::stun("stun:example.org:3478")];
        let overrides = PeerOverrides {
            channel_name: Some("x".to_string()),
            binary_type: Some(BinaryType::ArrayBuffer),
            reliable: Some(false),
            ordered: Some(false),
            ice_servers: Some(servers.clone()),
            negotiation_timeout_ms: Some(5000),
            close_on_ice_failure: Some(true),
        };
        let merged = PeerSettings::default().with_overrides(overrides);
        assert_eq!(merged.channel_name, "x");
        assert_eq!(merged.binary_type, BinaryType::ArrayBuffer);
        assert!(!merged.reliable);
        assert!(!merged.ordered);
        assert_eq!(merged.ice_servers, servers);
        assert_eq!(merged.negotiation_timeout(), Some(Duration::from_millis(5000)));
        assert!(merged.close_on_ice_failure);
    }

    #[test]
    fn toml_peer_table_merges_like_overrides() {
        let config: Config = toml::from_str(
            r#"
            [peer]
            channel_name = "files"
            binary_type = "arraybuffer"
            "#,
        )
        .unwrap();
        let settings = config.peer_settings();
        assert_eq!(settings.channel_name, "files");
        assert_eq!(settings.binary_type, BinaryType::ArrayBuffer);
        assert!(settings.reliable);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn validate_rejects_turn_without_credentials() {
        let mut settings = PeerSettings::default();
        settings.ice_servers = vec![IceServerConfig::stun("turn:turn.example.org:3478")];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_channel_name() {
        let mut settings = PeerSettings::default();
        settings.channel_name.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut settings = PeerSettings::default();
        settings.negotiation_timeout_ms = Some(0);
        assert!(settings.validate().is_err());
        assert!(PeerSettings::default().validate().is_ok());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = Config::load(&PathBuf::from("/nonexistent/peer-session.toml")).unwrap();
        assert_eq!(config.peer, PeerOverrides::default());
    }
}
