//! Two sessions negotiating with each other through copied description text

use parking_lot::Mutex;
use peer_session::config::{PeerConfig, PeerOverrides};
use peer_session::peer::engine::{ChannelEvent, EngineEvent, SessionEvent};
use peer_session::peer::mock::{ChannelCall, EngineCall, MockChannel, MockEngine, MockLog, MockScript};
use peer_session::peer::{PeerCallbacks, Payload, PeerSession, SessionDescription, SessionState};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Side {
    session: PeerSession<MockEngine>,
    log: MockLog,
    events: mpsc::UnboundedSender<SessionEvent<MockChannel>>,
    queue: mpsc::UnboundedReceiver<SessionEvent<MockChannel>>,
    sdp: Arc<Mutex<Option<String>>>,
    received: Arc<Mutex<Vec<Payload>>>,
}

impl Side {
    fn new() -> Self {
        let log = MockLog::new();
        let (events, queue) = mpsc::unbounded_channel();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let callbacks = PeerCallbacks::default().on_message(move |payload| sink.lock().push(payload));
        let engine = MockEngine::responding(log.clone(), events.clone(), MockScript::default());
        Self {
            session: PeerSession::new(PeerConfig::new(PeerOverrides::default(), callbacks), Ok(engine)),
            log,
            events,
            queue,
            sdp: Arc::new(Mutex::new(None)),
            received,
        }
    }

    /// Apply everything queued so far, including events raised while applying
    fn pump(&mut self) {
        while let Ok(event) = self.queue.try_recv() {
            self.session.handle_event(event);
        }
    }

    fn sdp_callback(&self) -> Option<Box<dyn FnOnce(String) + Send>> {
        let slot = self.sdp.clone();
        Some(Box::new(move |text| *slot.lock() = Some(text)))
    }

    fn take_sdp(&self) -> String {
        self.sdp.lock().take().expect("local description was not delivered")
    }

    fn inject(&mut self, event: SessionEvent<MockChannel>) {
        self.events.send(event).unwrap();
        self.pump();
    }
}

#[test]
fn offer_answer_accept_opens_both_sides() {
    let mut offerer = Side::new();
    let mut answerer = Side::new();

    offerer.session.offer(offerer.sdp_callback()).unwrap();
    offerer.pump();
    let offer_text = offerer.take_sdp();
    assert_eq!(offerer.session.state(), SessionState::AwaitingRemote);

    answerer.session.answer(&offer_text, answerer.sdp_callback()).unwrap();
    answerer.pump();
    let answer_text = answerer.take_sdp();
    assert_eq!(answerer.session.state(), SessionState::LocalDescriptionSet);

    // The answerer applied exactly the offer the offerer produced
    let offer = SessionDescription::from_json(&offer_text).unwrap();
    assert_eq!(answerer.log.engine_calls()[0], EngineCall::SetRemoteDescription(offer));

    offerer.session.accept(&answer_text).unwrap();
    offerer.pump();
    assert_eq!(offerer.session.state(), SessionState::RemoteDescriptionSet);
    let answer = SessionDescription::from_json(&answer_text).unwrap();
    assert!(offerer.log.engine_calls().contains(&EngineCall::SetRemoteDescription(answer)));

    // The engine announces the offerer's channel on the answering side
    let channel = MockChannel::new("peer", answerer.log.clone());
    answerer.inject(SessionEvent::Engine(EngineEvent::DataChannel(channel)));
    offerer.inject(SessionEvent::Channel(ChannelEvent::Open));
    answerer.inject(SessionEvent::Channel(ChannelEvent::Open));

    assert!(offerer.session.is_connected());
    assert!(answerer.session.is_connected());
    assert_eq!(offerer.session.state(), SessionState::Open);
    assert_eq!(answerer.session.state(), SessionState::Open);

    // Carry the offerer's sends across to the answerer
    offerer.session.send(Payload::from("hello")).unwrap();
    offerer.session.send(Payload::from(vec![1u8, 2, 3])).unwrap();
    for payload in offerer.log.sent() {
        answerer.inject(SessionEvent::Channel(ChannelEvent::Message(payload)));
    }
    assert_eq!(
        *answerer.received.lock(),
        vec![Payload::from("hello"), Payload::from(vec![1u8, 2, 3])]
    );

    offerer.session.close();
    assert_eq!(offerer.log.count_engine(&EngineCall::Close), 1);
    assert_eq!(offerer.log.count_channel(&ChannelCall::Detach), 1);
    answerer.inject(SessionEvent::Channel(ChannelEvent::Close));
    assert!(!answerer.session.is_connected());
    assert_eq!(answerer.session.state(), SessionState::Closed);
}

#[test]
fn answer_text_round_trips_through_both_sides() {
    let mut offerer = Side::new();
    let mut answerer = Side::new();

    offerer.session.offer(offerer.sdp_callback()).unwrap();
    offerer.pump();
    let offer_text = offerer.take_sdp();
    assert!(offer_text.contains("\"type\":\"offer\""));
    assert!(offer_text.contains("a=candidate:"));

    answerer.session.answer(&offer_text, answerer.sdp_callback()).unwrap();
    answerer.pump();
    let answer_text = answerer.take_sdp();
    assert!(answer_text.contains("\"type\":\"answer\""));

    // Whitespace a terminal paste may add is tolerated
    offerer.session.accept(&format!("  {}\n", answer_text)).unwrap();
    offerer.pump();
    assert_eq!(offerer.session.state(), SessionState::RemoteDescriptionSet);
}
