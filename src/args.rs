use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use peer_session::config::{self, IceServerConfig, PeerOverrides};

/// Which side of the handshake to play
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Create the offer and wait for the answer
    Offer,
    /// Read an offer and reply with an answer
    Answer,
}

#[derive(Parser, Debug)]
#[command(name = "peer-session")]
#[command(author = "Selkies Team")]
#[command(version)]
#[command(about = "Peer-to-peer data channel chat over manual signaling", long_about = None)]
pub struct Args {
    /// Side of the handshake
    #[arg(value_enum)]
    pub mode: Mode,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/peer-session.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Data channel label
    #[arg(long)]
    pub channel_name: Option<String>,

    /// STUN server URL (repeatable, replaces the configured list)
    #[arg(long = "ice-server")]
    pub ice_servers: Vec<String>,

    /// Allow out-of-order delivery
    #[arg(long, action)]
    pub unordered: bool,

    /// Do not retransmit lost messages
    #[arg(long, action)]
    pub unreliable: bool,

    /// Fail a negotiation step pending longer than this
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Command line overrides, applied on top of the file configuration
    pub fn overrides(&self) -> PeerOverrides {
        PeerOverrides {
            channel_name: self.channel_name.clone(),
            ordered: self.unordered.then_some(false),
            reliable: self.unreliable.then_some(false),
            ice_servers: if self.ice_servers.is_empty() {
                None
            } else {
                Some(self.ice_servers.iter().map(|url| IceServerConfig::stun(url)).collect())
            },
            negotiation_timeout_ms: self.timeout_secs.map(|secs| secs.saturating_mul(1000)),
            ..Default::default()
        }
    }
}
