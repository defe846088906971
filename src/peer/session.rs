//! Peer session state machine
//!
//! A [`PeerSession`] owns one connection engine and at most one data
//! channel. Public operations issue engine requests and return at once;
//! completions come back through [`PeerSession::handle_event`], one at a
//! time, and advance the state:
//!
//! - offerer: `New -> Offering -> LocalDescriptionSet -> AwaitingRemote -> RemoteDescriptionSet -> Open`
//! - answerer: `New -> ReceivedOffer -> RemoteDescriptionSet -> LocalDescriptionSet -> Open`
//!
//! `Closed` and `Failed` are terminal.

use log::{debug, warn};
use std::fmt;
use std::time::Instant;

use crate::config::{PeerConfig, PeerSettings};

use super::callbacks::{PeerCallbacks, SdpCallback};
use super::description::SessionDescription;
use super::engine::{
    ChannelEvent, ChannelInit, ConnectionEngine, DataChannel, EngineError, EngineEvent, IceConnectionState, Payload,
    SessionEvent,
};
use super::PeerError;

/// Signaling state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing negotiated yet
    New,
    /// Data channel created, offer being generated and applied
    Offering,
    /// Local description applied
    LocalDescriptionSet,
    /// Offer handed to the caller, waiting for `accept`
    AwaitingRemote,
    /// Remote offer being applied
    ReceivedOffer,
    /// Remote description applied
    RemoteDescriptionSet,
    /// Data channel open
    Open,
    /// Closed (intentionally or by the remote side)
    Closed,
    /// A negotiation step failed (cannot recover)
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::Offering => "offering",
            SessionState::LocalDescriptionSet => "local-description-set",
            SessionState::AwaitingRemote => "awaiting-remote",
            SessionState::ReceivedOffer => "received-offer",
            SessionState::RemoteDescriptionSet => "remote-description-set",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the handshake this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// The engine operation currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStep {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
}

impl PendingStep {
    fn as_str(&self) -> &'static str {
        match self {
            PendingStep::CreateOffer => "offer creation",
            PendingStep::CreateAnswer => "answer creation",
            PendingStep::SetLocalDescription => "local description",
            PendingStep::SetRemoteDescription => "remote description",
        }
    }
}

struct ChannelSlot<C> {
    handle: C,
    attached: bool,
}

/// One logical connection attempt
pub struct PeerSession<E: ConnectionEngine> {
    id: String,
    settings: PeerSettings,
    callbacks: PeerCallbacks,
    engine: Option<E>,
    channel: Option<ChannelSlot<E::Channel>>,
    state: SessionState,
    role: Option<Role>,
    connected: bool,
    pending_sdp: Option<SdpCallback>,
    pending_step: Option<(PendingStep, Instant)>,
    awaiting_remote_channel: bool,
    last_error: Option<PeerError>,
}

impl<E: ConnectionEngine> PeerSession<E> {
    /// Build a session around the result of creating its engine.
    ///
    /// Never fails: an engine error is logged and leaves the session
    /// `Failed`, with every later operation returning [`PeerError::Unusable`].
    pub fn new(config: PeerConfig, engine: Result<E, EngineError>) -> Self {
        let PeerConfig { settings, callbacks } = config;

        let mut session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            settings,
            callbacks,
            engine: None,
            channel: None,
            state: SessionState::New,
            role: None,
            connected: false,
            pending_sdp: None,
            pending_step: None,
            awaiting_remote_channel: false,
            last_error: None,
        };

        match engine {
            Ok(engine) => {
                session.engine = Some(engine);
                debug!("Session {} created", session.id);
            }
            Err(e) => {
                session.warn(&format!("Peer error: {}", e));
                session.last_error = Some(PeerError::EngineInitialization(e.to_string()));
                session.state = SessionState::Failed;
            }
        }

        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_usable(&self) -> bool {
        self.engine.is_some()
    }

    /// Most recent failure, including ones reported asynchronously
    pub fn last_error(&self) -> Option<&PeerError> {
        self.last_error.as_ref()
    }

    pub fn settings(&self) -> &PeerSettings {
        &self.settings
    }

    /// Start negotiating as the offerer.
    ///
    /// Creates the data channel and asks the engine for an offer. Once ICE
    /// gathering completes, `sdp_callback` (or the one registered earlier)
    /// receives the local description text.
    pub fn offer(&mut self, sdp_callback: Option<SdpCallback>) -> Result<(), PeerError> {
        self.ensure_usable("offer")?;
        if self.state != SessionState::New {
            return Err(self.invalid_state("offer"));
        }

        if let Some(callback) = sdp_callback {
            self.pending_sdp = Some(callback);
        }

        let init = ChannelInit::from(&self.settings);
        let created = match self.engine.as_mut() {
            Some(engine) => engine.create_data_channel(&init),
            None => return Err(PeerError::Unusable),
        };
        let channel = match created {
            Ok(channel) => channel,
            Err(e) => {
                let err = PeerError::Channel(format!("Failed to create data channel: {}", e));
                self.fail(format!("Peer: failed to create data channel ({})", e), err.clone());
                return Err(err);
            }
        };
        self.install_channel(channel);

        self.role = Some(Role::Offerer);
        self.set_state(SessionState::Offering);
        self.begin(PendingStep::CreateOffer);
        if let Some(engine) = self.engine.as_mut() {
            engine.create_offer();
        }

        Ok(())
    }

    /// Apply the remote peer's answer text
    pub fn accept(&mut self, remote_answer: &str) -> Result<(), PeerError> {
        self.ensure_usable("accept")?;
        let ready = self.role == Some(Role::Offerer)
            && self.pending_step.is_none()
            && matches!(self.state, SessionState::LocalDescriptionSet | SessionState::AwaitingRemote);
        if !ready {
            return Err(self.invalid_state("accept"));
        }

        let description = self.parse_remote(remote_answer)?;

        self.begin(PendingStep::SetRemoteDescription);
        if let Some(engine) = self.engine.as_mut() {
            engine.set_remote_description(description);
        }

        Ok(())
    }

    /// Start negotiating as the answerer from the remote peer's offer text.
    ///
    /// The first data channel the engine reports afterwards becomes the
    /// session's channel. Once ICE gathering completes, `sdp_callback`
    /// receives the local answer text.
    pub fn answer(&mut self, remote_offer: &str, sdp_callback: Option<SdpCallback>) -> Result<(), PeerError> {
        self.ensure_usable("answer")?;
        if self.state != SessionState::New {
            return Err(self.invalid_state("answer"));
        }

        let description = self.parse_remote(remote_offer)?;

        if let Some(callback) = sdp_callback {
            self.pending_sdp = Some(callback);
        }

        self.role = Some(Role::Answerer);
        self.awaiting_remote_channel = true;
        self.set_state(SessionState::ReceivedOffer);
        self.begin(PendingStep::SetRemoteDescription);
        if let Some(engine) = self.engine.as_mut() {
            engine.set_remote_description(description);
        }

        Ok(())
    }

    /// Close the engine and detach the channel. Does nothing unless the
    /// channel is open.
    pub fn close(&mut self) {
        if !self.connected {
            debug!("Session {} not connected, ignoring close", self.id);
            return;
        }

        self.log("Peer: closing connection");
        self.teardown();
        self.set_state(SessionState::Closed);
    }

    /// Forward a payload to the open channel. Nothing is transmitted while
    /// not connected.
    pub fn send(&mut self, payload: Payload) -> Result<(), PeerError> {
        if !self.connected {
            return Err(PeerError::NotConnected);
        }

        let result = match self.channel.as_mut() {
            Some(slot) => slot.handle.send(payload),
            None => return Err(PeerError::NotConnected),
        };

        if let Err(e) = result {
            self.warn(&format!("Peer: send failed ({})", e));
            return Err(PeerError::Channel(format!("Send failed: {}", e)));
        }

        Ok(())
    }

    /// Fail the outstanding engine step if it has been pending longer than
    /// the configured negotiation timeout. Returns true when it fired.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        let Some(timeout) = self.settings.negotiation_timeout() else {
            return false;
        };
        let Some((step, started)) = self.pending_step else {
            return false;
        };
        if now.saturating_duration_since(started) < timeout {
            return false;
        }

        let step_name = step.as_str();
        self.fail(
            format!("Peer: negotiation timed out ({})", step_name),
            PeerError::Timeout(step_name.to_string()),
        );
        true
    }

    /// Apply one engine or channel event
    pub fn handle_event(&mut self, event: SessionEvent<E::Channel>) {
        match event {
            SessionEvent::Engine(event) => self.handle_engine_event(event),
            SessionEvent::Channel(event) => self.handle_channel_event(event),
        }
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent<E::Channel>) {
        match event {
            EngineEvent::OfferCreated(offer) => {
                if !self.complete(PendingStep::CreateOffer) {
                    return;
                }
                self.log("Peer: offer created");
                self.begin(PendingStep::SetLocalDescription);
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_local_description(offer);
                }
            }
            EngineEvent::OfferFailed(reason) => {
                if self.complete(PendingStep::CreateOffer) {
                    self.fail(
                        format!("Peer: failed to create offer ({})", reason),
                        PeerError::Negotiation(reason),
                    );
                }
            }
            EngineEvent::AnswerCreated(answer) => {
                if !self.complete(PendingStep::CreateAnswer) {
                    return;
                }
                self.log("Peer: answer created");
                self.begin(PendingStep::SetLocalDescription);
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_local_description(answer);
                }
            }
            EngineEvent::AnswerFailed(reason) => {
                if self.complete(PendingStep::CreateAnswer) {
                    self.fail(
                        format!("Peer: failed to create answer ({})", reason),
                        PeerError::Negotiation(reason),
                    );
                }
            }
            EngineEvent::LocalDescriptionSet => {
                if self.complete(PendingStep::SetLocalDescription) {
                    self.log("Peer: local description done");
                    self.set_state(SessionState::LocalDescriptionSet);
                }
            }
            EngineEvent::LocalDescriptionFailed(reason) => {
                if self.complete(PendingStep::SetLocalDescription) {
                    self.fail(
                        format!("Peer: local description failed ({})", reason),
                        PeerError::DescriptionAssignment(reason),
                    );
                }
            }
            EngineEvent::RemoteDescriptionSet => {
                if !self.complete(PendingStep::SetRemoteDescription) {
                    return;
                }
                self.log("Peer: remote description done");
                self.set_state(SessionState::RemoteDescriptionSet);
                if self.role == Some(Role::Answerer) {
                    self.begin(PendingStep::CreateAnswer);
                    if let Some(engine) = self.engine.as_mut() {
                        engine.create_answer();
                    }
                }
            }
            EngineEvent::RemoteDescriptionFailed(reason) => {
                if self.complete(PendingStep::SetRemoteDescription) {
                    self.fail(
                        format!("Peer: remote description failed ({})", reason),
                        PeerError::DescriptionAssignment(reason),
                    );
                }
            }
            EngineEvent::IceCandidate(candidate) => {
                debug!("Session {} local candidate: {}", self.id, candidate);
                self.log("Peer: new ice candidate");
            }
            EngineEvent::GatheringComplete { local_description } => {
                self.on_gathering_complete(local_description);
            }
            EngineEvent::ConnectionStateChanged(state) => {
                self.log(&format!("Peer: connection state change ({})", state));
            }
            EngineEvent::IceConnectionStateChanged(state) => {
                self.on_ice_connection_state(state);
            }
            EngineEvent::DataChannel(channel) => {
                self.on_remote_channel(channel);
            }
            EngineEvent::DataChannelFailed(reason) => {
                if self.role != Some(Role::Offerer) || self.state.is_terminal() {
                    debug!("Session {} ignoring data channel failure: {}", self.id, reason);
                    return;
                }
                self.teardown();
                self.fail(
                    format!("Peer: failed to create data channel ({})", reason),
                    PeerError::Channel(format!("Failed to create data channel: {}", reason)),
                );
            }
        }
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        let attached = self.channel.as_ref().map(|slot| slot.attached).unwrap_or(false);
        if !attached {
            debug!("Session {} dropping channel event {:?}: no attached channel", self.id, event);
            return;
        }

        match event {
            ChannelEvent::Open => {
                if self.state.is_terminal() {
                    debug!("Session {} ignoring channel open while {}", self.id, self.state);
                    return;
                }
                self.log("Peer: connection established");
                self.connected = true;
                self.set_state(SessionState::Open);
                (self.callbacks.on_open)();
            }
            ChannelEvent::Close => {
                self.log("Peer: connection closed");
                self.connected = false;
                self.pending_sdp = None;
                self.pending_step = None;
                self.awaiting_remote_channel = false;
                if !self.state.is_terminal() {
                    self.set_state(SessionState::Closed);
                }
                (self.callbacks.on_close)();
            }
            ChannelEvent::Error(message) => {
                self.warn(&format!("Peer: channel error ({})", message));
                (self.callbacks.on_error)(&message);
            }
            ChannelEvent::Message(payload) => {
                (self.callbacks.on_message)(payload);
            }
        }
    }

    fn on_gathering_complete(&mut self, local_description: Option<SessionDescription>) {
        self.log("Peer: all ice candidates");

        let Some(description) = local_description else {
            self.warn("Peer: gathering finished without a local description");
            return;
        };

        match description.to_json() {
            Ok(text) => {
                if let Some(callback) = self.pending_sdp.take() {
                    callback(text);
                }
            }
            Err(e) => self.warn(&format!("Peer: {}", e)),
        }

        if self.role == Some(Role::Offerer) && self.state == SessionState::LocalDescriptionSet {
            self.set_state(SessionState::AwaitingRemote);
        }
    }

    fn on_ice_connection_state(&mut self, state: IceConnectionState) {
        self.log(&format!("Peer: ice connection state: {}", state));

        if state == IceConnectionState::Failed && self.settings.close_on_ice_failure && !self.state.is_terminal() {
            self.teardown();
            self.fail(
                "Peer: ice connection failed, closing session".to_string(),
                PeerError::Negotiation("ICE connection failed".to_string()),
            );
        }
    }

    fn on_remote_channel(&mut self, channel: E::Channel) {
        let expected = self.role == Some(Role::Answerer)
            && self.awaiting_remote_channel
            && self.channel.is_none()
            && !self.state.is_terminal();
        if !expected {
            self.warn(&format!("Peer: ignoring unexpected data channel '{}'", channel.label()));
            return;
        }

        self.awaiting_remote_channel = false;
        self.log(&format!("Peer: data channel received ({})", channel.label()));
        self.install_channel(channel);
    }

    fn install_channel(&mut self, mut channel: E::Channel) {
        channel.set_binary_type(self.settings.binary_type);
        channel.attach();
        self.channel = Some(ChannelSlot {
            handle: channel,
            attached: true,
        });
    }

    fn teardown(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.close();
        }
        if let Some(slot) = self.channel.as_mut() {
            if slot.attached {
                slot.handle.detach();
                slot.attached = false;
            }
        }
        self.connected = false;
        self.pending_sdp = None;
        self.pending_step = None;
        self.awaiting_remote_channel = false;
    }

    fn parse_remote(&self, text: &str) -> Result<SessionDescription, PeerError> {
        SessionDescription::from_json(text).map_err(|err| {
            self.warn(&format!("Peer: {}", err));
            err
        })
    }

    fn begin(&mut self, step: PendingStep) {
        self.pending_step = Some((step, Instant::now()));
    }

    /// Clear the in-flight step if it matches; otherwise log and ignore
    fn complete(&mut self, step: PendingStep) -> bool {
        if self.state.is_terminal() {
            debug!("Session {} ignoring {} completion while {}", self.id, step.as_str(), self.state);
            return false;
        }
        match self.pending_step {
            Some((pending, _)) if pending == step => {
                self.pending_step = None;
                true
            }
            _ => {
                self.warn(&format!("Peer: ignoring unexpected {} completion", step.as_str()));
                false
            }
        }
    }

    fn fail(&mut self, message: String, err: PeerError) {
        self.warn(&message);
        self.pending_step = None;
        self.pending_sdp = None;
        self.last_error = Some(err);
        self.set_state(SessionState::Failed);
    }

    fn ensure_usable(&self, operation: &'static str) -> Result<(), PeerError> {
        if self.engine.is_none() {
            self.warn(&format!("Peer: cannot {} on an unusable session", operation));
            return Err(PeerError::Unusable);
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str) -> PeerError {
        let err = PeerError::InvalidState {
            operation,
            state: self.state,
        };
        self.warn(&format!("Peer: {}", err));
        err
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state.is_terminal() {
            if self.state != state {
                debug!("Session {} staying {}, not moving to {}", self.id, self.state, state);
            }
            return;
        }
        if self.state != state {
            debug!("Session {} state change: {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
        }
    }

    fn log(&self, message: &str) {
        debug!("Session {}: {}", self.id, message);
        (self.callbacks.on_log)(message);
    }

    fn warn(&self, message: &str) {
        warn!("Session {}: {}", self.id, message);
        (self.callbacks.on_log)(message);
    }
}
