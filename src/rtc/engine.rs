//! webrtc-rs connection engine
//!
//! The session drives the engine synchronously while webrtc-rs is async, so
//! every operation is queued to a single worker task that runs them in
//! order and reports each completion as an [`EngineEvent`].

use log::{debug, info, warn};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::{IceServerConfig, PeerSettings};
use crate::peer::description::SessionDescription;
use crate::peer::engine::{
    ChannelEvent, ChannelInit, ConnectionEngine, EngineError, EngineEvent, Payload, SessionEvent,
};

use super::channel::{bind_channel, ChannelSlot, RtcChannel};
use super::{from_rtc_description, to_rtc_description};

type Events = mpsc::UnboundedSender<SessionEvent<RtcChannel>>;

/// Work queued for the engine worker
pub(crate) enum EngineOp {
    CreateDataChannel {
        init: ChannelInit,
        channel: ChannelSlot,
        detached: Arc<AtomicBool>,
    },
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    Send {
        channel: ChannelSlot,
        payload: Payload,
    },
    Close,
}

/// Connection engine backed by an `RTCPeerConnection`
pub struct RtcEngine {
    ops: mpsc::UnboundedSender<EngineOp>,
}

impl RtcEngine {
    /// Create the peer connection and start its worker.
    ///
    /// Every completion and notification is delivered on `events`.
    pub async fn create(settings: &PeerSettings, events: Events) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::new(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: settings.ice_servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };

        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map(Arc::new)
            .map_err(|e| EngineError::new(format!("Failed to create peer connection: {}", e)))?;

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        install_handlers(&peer_connection, &events, &ops_tx);

        tokio::spawn(run_worker(peer_connection, ops_rx, events));
        info!("Peer connection created ({} ICE servers)", settings.ice_servers.len());

        Ok(Self { ops: ops_tx })
    }

    fn queue(&self, op: EngineOp) {
        if self.ops.send(op).is_err() {
            debug!("Engine worker stopped, dropping operation");
        }
    }
}

impl Drop for RtcEngine {
    fn drop(&mut self) {
        let _ = self.ops.send(EngineOp::Close);
    }
}

impl ConnectionEngine for RtcEngine {
    type Channel = RtcChannel;

    fn create_data_channel(&mut self, init: &ChannelInit) -> Result<RtcChannel, EngineError> {
        let channel = RtcChannel::pending(&init.label, self.ops.clone());
        self.ops
            .send(EngineOp::CreateDataChannel {
                init: init.clone(),
                channel: channel.slot(),
                detached: channel.detached_flag(),
            })
            .map_err(|_| EngineError::new("Connection engine is closed"))?;
        Ok(channel)
    }

    fn create_offer(&mut self) {
        self.queue(EngineOp::CreateOffer);
    }

    fn create_answer(&mut self) {
        self.queue(EngineOp::CreateAnswer);
    }

    fn set_local_description(&mut self, description: SessionDescription) {
        self.queue(EngineOp::SetLocalDescription(description));
    }

    fn set_remote_description(&mut self, description: SessionDescription) {
        self.queue(EngineOp::SetRemoteDescription(description));
    }

    fn close(&mut self) {
        self.queue(EngineOp::Close);
    }
}

fn rtc_ice_server(server: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// Negotiated channel options for `init`; unreliable channels never retransmit
pub(crate) fn rtc_channel_init(init: &ChannelInit) -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(init.ordered),
        max_retransmits: if init.reliable { None } else { Some(0) },
        ..Default::default()
    }
}

fn install_handlers(peer_connection: &Arc<RTCPeerConnection>, events: &Events, ops: &mpsc::UnboundedSender<EngineOp>) {
    let weak: Weak<RTCPeerConnection> = Arc::downgrade(peer_connection);
    let tx = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        let weak = weak.clone();
        Box::pin(async move {
            let event = match candidate {
                Some(candidate) => {
                    let line = candidate.to_json().map(|init| init.candidate).unwrap_or_default();
                    EngineEvent::IceCandidate(line)
                }
                None => {
                    let local_description = match weak.upgrade() {
                        Some(pc) => pc.local_description().await.and_then(|desc| from_rtc_description(&desc).ok()),
                        None => None,
                    };
                    EngineEvent::GatheringComplete { local_description }
                }
            };
            let _ = tx.send(SessionEvent::Engine(event));
        })
    }));

    let tx = events.clone();
    peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let _ = tx.send(SessionEvent::Engine(EngineEvent::ConnectionStateChanged(state.into())));
        Box::pin(async {})
    }));

    let tx = events.clone();
    peer_connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let _ = tx.send(SessionEvent::Engine(EngineEvent::IceConnectionStateChanged(state.into())));
        Box::pin(async {})
    }));

    let tx = events.clone();
    let ops = ops.clone();
    peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        debug!("Remote data channel '{}' announced", channel.label());
        let rtc = RtcChannel::remote(channel.clone(), ops.clone());
        let detached = rtc.detached_flag();
        // The session must see the channel before any of its events
        let _ = tx.send(SessionEvent::Engine(EngineEvent::DataChannel(rtc)));
        bind_channel(&channel, &tx, &detached);
        Box::pin(async {})
    }));
}

async fn run_worker(
    peer_connection: Arc<RTCPeerConnection>,
    mut ops: mpsc::UnboundedReceiver<EngineOp>,
    events: Events,
) {
    let emit = |event: EngineEvent<RtcChannel>| {
        let _ = events.send(SessionEvent::Engine(event));
    };

    while let Some(op) = ops.recv().await {
        match op {
            EngineOp::CreateDataChannel {
                init,
                channel,
                detached,
            } => {
                match peer_connection
                    .create_data_channel(&init.label, Some(rtc_channel_init(&init)))
                    .await
                {
                    Ok(dc) => {
                        bind_channel(&dc, &events, &detached);
                        *channel.lock() = Some(dc);
                    }
                    Err(e) => {
                        warn!("Failed to create data channel '{}': {}", init.label, e);
                        emit(EngineEvent::DataChannelFailed(e.to_string()));
                    }
                }
            }
            EngineOp::CreateOffer => match peer_connection.create_offer(None).await {
                Ok(offer) => match from_rtc_description(&offer) {
                    Ok(offer) => emit(EngineEvent::OfferCreated(offer)),
                    Err(e) => emit(EngineEvent::OfferFailed(e.to_string())),
                },
                Err(e) => emit(EngineEvent::OfferFailed(e.to_string())),
            },
            EngineOp::CreateAnswer => match peer_connection.create_answer(None).await {
                Ok(answer) => match from_rtc_description(&answer) {
                    Ok(answer) => emit(EngineEvent::AnswerCreated(answer)),
                    Err(e) => emit(EngineEvent::AnswerFailed(e.to_string())),
                },
                Err(e) => emit(EngineEvent::AnswerFailed(e.to_string())),
            },
            EngineOp::SetLocalDescription(description) => {
                let result = match to_rtc_description(&description) {
                    Ok(desc) => peer_connection.set_local_description(desc).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match result {
                    Ok(()) => emit(EngineEvent::LocalDescriptionSet),
                    Err(reason) => emit(EngineEvent::LocalDescriptionFailed(reason)),
                }
            }
            EngineOp::SetRemoteDescription(description) => {
                let result = match to_rtc_description(&description) {
                    Ok(desc) => peer_connection.set_remote_description(desc).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match result {
                    Ok(()) => emit(EngineEvent::RemoteDescriptionSet),
                    Err(reason) => emit(EngineEvent::RemoteDescriptionFailed(reason)),
                }
            }
            EngineOp::Send { channel, payload } => {
                let dc = channel.lock().clone();
                let Some(dc) = dc else {
                    warn!("Dropping {} byte message: data channel not created", payload.len());
                    continue;
                };
                let result = match payload {
                    Payload::Text(text) => dc.send_text(text).await,
                    Payload::Binary(data) => dc.send(&data).await,
                };
                if let Err(e) = result {
                    let _ = events.send(SessionEvent::Channel(ChannelEvent::Error(format!("Send failed: {}", e))));
                }
            }
            EngineOp::Close => {
                if let Err(e) = peer_connection.close().await {
                    warn!("Failed to close peer connection: {}", e);
                }
                break;
            }
        }
    }

    debug!("Engine worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::engine::DataChannel;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_reliable_channel_init() {
        let init = rtc_channel_init(&ChannelInit {
            label: "peer".to_string(),
            reliable: true,
            ordered: true,
        });
        assert_eq!(init.ordered, Some(true));
        assert_eq!(init.max_retransmits, None);
    }

    #[test]
    fn test_unreliable_channel_init() {
        let init = rtc_channel_init(&ChannelInit {
            label: "peer".to_string(),
            reliable: false,
            ordered: false,
        });
        assert_eq!(init.ordered, Some(false));
        assert_eq!(init.max_retransmits, Some(0));
    }

    #[test]
    fn test_ice_server_conversion() {
        let server = IceServerConfig {
            urls: vec!["turn:turn.example.org:3478".to_string()],
            username: Some("user".to_string()),
            credential: Some("secret".to_string()),
        };
        let rtc = rtc_ice_server(&server);
        assert_eq!(rtc.urls, server.urls);
        assert_eq!(rtc.username, "user");
        assert_eq!(rtc.credential, "secret");
    }

    #[tokio::test]
    async fn test_engine_creates_offer() {
        let settings = PeerSettings {
            ice_servers: Vec::new(),
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = RtcEngine::create(&settings, tx).await.unwrap();

        let channel = engine.create_data_channel(&ChannelInit::from(&settings)).unwrap();
        assert_eq!(channel.label(), "peer");
        engine.create_offer();

        let offer = timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(SessionEvent::Engine(EngineEvent::OfferCreated(offer))) => return Some(offer),
                    Some(SessionEvent::Engine(EngineEvent::OfferFailed(reason))) => panic!("offer failed: {}", reason),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .unwrap()
        .unwrap();

        assert!(offer.sdp.contains("m=application"));
        assert!(channel.inner().is_some());
        engine.close();
    }
}
