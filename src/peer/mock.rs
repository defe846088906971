//! Mock engine for testing
//!
//! Records every call a session makes into a shared log instead of
//! negotiating anything. Optionally answers its own asynchronous
//! operations by pushing completion events into a session event queue.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::BinaryType;

use super::description::SessionDescription;
use super::engine::{
    ChannelInit, ConnectionEngine, DataChannel, EngineError, EngineEvent, Payload, SessionEvent,
};

/// A call made on the mock engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateDataChannel(ChannelInit),
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    Close,
}

/// A call made on a mock channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    SetBinaryType(BinaryType),
    Attach,
    Detach,
    Send(Payload),
}

#[derive(Debug, Default)]
struct Recorded {
    engine: Vec<EngineCall>,
    channel: Vec<ChannelCall>,
}

/// Shared call log, cloned into the engine and every channel it creates
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    inner: Arc<Mutex<Recorded>>,
}

impl MockLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine_calls(&self) -> Vec<EngineCall> {
        self.inner.lock().engine.clone()
    }

    pub fn channel_calls(&self) -> Vec<ChannelCall> {
        self.inner.lock().channel.clone()
    }

    /// Payloads handed to any channel's `send`
    pub fn sent(&self) -> Vec<Payload> {
        self.inner
            .lock()
            .channel
            .iter()
            .filter_map(|call| match call {
                ChannelCall::Send(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_channel(&self, call: &ChannelCall) -> usize {
        self.inner.lock().channel.iter().filter(|c| *c == call).count()
    }

    pub fn count_engine(&self, call: &EngineCall) -> usize {
        self.inner.lock().engine.iter().filter(|c| *c == call).count()
    }

    fn record_engine(&self, call: EngineCall) {
        self.inner.lock().engine.push(call);
    }

    fn record_channel(&self, call: ChannelCall) {
        self.inner.lock().channel.push(call);
    }
}

/// Mock data channel
#[derive(Debug)]
pub struct MockChannel {
    label: String,
    log: MockLog,
}

impl MockChannel {
    pub fn new(label: &str, log: MockLog) -> Self {
        Self {
            label: label.to_string(),
            log,
        }
    }
}

impl DataChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn set_binary_type(&mut self, binary_type: BinaryType) {
        self.log.record_channel(ChannelCall::SetBinaryType(binary_type));
    }

    fn attach(&mut self) {
        self.log.record_channel(ChannelCall::Attach);
    }

    fn detach(&mut self) {
        self.log.record_channel(ChannelCall::Detach);
    }

    fn send(&mut self, payload: Payload) -> Result<(), EngineError> {
        self.log.record_channel(ChannelCall::Send(payload));
        Ok(())
    }
}

/// Descriptions a responding mock hands out
#[derive(Debug, Clone)]
pub struct MockScript {
    pub offer: SessionDescription,
    pub answer: SessionDescription,
    /// Appended to the local description when gathering completes
    pub candidate_line: String,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            offer: SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n"),
            answer: SessionDescription::answer("v=0\r\no=- 2 1 IN IP4 0.0.0.0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n"),
            candidate_line: "a=candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host\r\n".to_string(),
        }
    }
}

/// Mock connection engine
pub struct MockEngine {
    log: MockLog,
    fail_channel: bool,
    responder: Option<(mpsc::UnboundedSender<SessionEvent<MockChannel>>, MockScript)>,
}

impl MockEngine {
    /// Engine that only records; tests deliver completions by hand
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            fail_channel: false,
            responder: None,
        }
    }

    /// Engine that completes every operation successfully on its own
    pub fn responding(
        log: MockLog,
        events: mpsc::UnboundedSender<SessionEvent<MockChannel>>,
        script: MockScript,
    ) -> Self {
        Self {
            log,
            fail_channel: false,
            responder: Some((events, script)),
        }
    }

    /// Make `create_data_channel` fail
    pub fn with_channel_failure(mut self) -> Self {
        self.fail_channel = true;
        self
    }

    fn respond(&self, event: EngineEvent<MockChannel>) {
        if let Some((events, _)) = &self.responder {
            let _ = events.send(SessionEvent::Engine(event));
        }
    }
}

impl ConnectionEngine for MockEngine {
    type Channel = MockChannel;

    fn create_data_channel(&mut self, init: &ChannelInit) -> Result<MockChannel, EngineError> {
        self.log.record_engine(EngineCall::CreateDataChannel(init.clone()));
        if self.fail_channel {
            return Err(EngineError::new("data channel creation refused"));
        }
        Ok(MockChannel::new(&init.label, self.log.clone()))
    }

    fn create_offer(&mut self) {
        self.log.record_engine(EngineCall::CreateOffer);
        if let Some((_, script)) = &self.responder {
            let offer = script.offer.clone();
            self.respond(EngineEvent::OfferCreated(offer));
        }
    }

    fn create_answer(&mut self) {
        self.log.record_engine(EngineCall::CreateAnswer);
        if let Some((_, script)) = &self.responder {
            let answer = script.answer.clone();
            self.respond(EngineEvent::AnswerCreated(answer));
        }
    }

    fn set_local_description(&mut self, description: SessionDescription) {
        self.log.record_engine(EngineCall::SetLocalDescription(description.clone()));
        if let Some((_, script)) = &self.responder {
            let mut gathered = description;
            gathered.sdp.push_str(&script.candidate_line);
            self.respond(EngineEvent::LocalDescriptionSet);
            self.respond(EngineEvent::IceCandidate(script.candidate_line.trim_end().to_string()));
            self.respond(EngineEvent::GatheringComplete {
                local_description: Some(gathered),
            });
        }
    }

    fn set_remote_description(&mut self, description: SessionDescription) {
        self.log.record_engine(EngineCall::SetRemoteDescription(description));
        self.respond(EngineEvent::RemoteDescriptionSet);
    }

    fn close(&mut self) {
        self.log.record_engine(EngineCall::Close);
    }
}
