//! Async session driver
//!
//! Runs a [`PeerSession`] on its own tokio task. Engine and channel events
//! arrive on one queue, caller commands on another; the task applies them
//! one at a time so the session never sees two events at once.

use log::{debug, info};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::engine::{ConnectionEngine, Payload, SessionEvent};
use super::session::{PeerSession, SessionState};
use super::PeerError;

/// How often pending negotiation steps are checked against their timeout
const TIMEOUT_TICK: Duration = Duration::from_millis(50);

enum Command {
    Offer {
        sdp: oneshot::Sender<String>,
        reply: oneshot::Sender<Result<(), PeerError>>,
    },
    Answer {
        remote_offer: String,
        sdp: oneshot::Sender<String>,
        reply: oneshot::Sender<Result<(), PeerError>>,
    },
    Accept {
        remote_answer: String,
        reply: oneshot::Sender<Result<(), PeerError>>,
    },
    Send {
        payload: Payload,
        reply: oneshot::Sender<Result<(), PeerError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    IsConnected {
        reply: oneshot::Sender<bool>,
    },
    LastError {
        reply: oneshot::Sender<Option<PeerError>>,
    },
}

/// Cloneable handle to a driven session.
///
/// The session task stops once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
}

/// Start driving `session`, feeding it everything received on `events`
pub fn spawn<E>(session: PeerSession<E>, events: mpsc::UnboundedReceiver<SessionEvent<E::Channel>>) -> SessionHandle
where
    E: ConnectionEngine + Send + 'static,
    E::Channel: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let id = session.id().to_string();

    tokio::spawn(run(session, events, rx));

    SessionHandle { id, commands: tx }
}

async fn run<E>(
    mut session: PeerSession<E>,
    mut events: mpsc::UnboundedReceiver<SessionEvent<E::Channel>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    E: ConnectionEngine,
{
    info!("Session {} started", session.id());

    let mut ticker = tokio::time::interval(TIMEOUT_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                session.handle_event(event);
            }
            command = commands.recv() => {
                match command {
                    Some(command) => apply(&mut session, command),
                    None => break,
                }
            }
            _ = ticker.tick() => {
                session.poll_timeout(Instant::now());
            }
        }
    }

    session.close();
    info!("Session {} stopped ({})", session.id(), session.state());
}

fn apply<E: ConnectionEngine>(session: &mut PeerSession<E>, command: Command) {
    match command {
        Command::Offer { sdp, reply } => {
            let result = session.offer(Some(Box::new(move |text| {
                let _ = sdp.send(text);
            })));
            let _ = reply.send(result);
        }
        Command::Answer {
            remote_offer,
            sdp,
            reply,
        } => {
            let result = session.answer(
                &remote_offer,
                Some(Box::new(move |text| {
                    let _ = sdp.send(text);
                })),
            );
            let _ = reply.send(result);
        }
        Command::Accept { remote_answer, reply } => {
            let _ = reply.send(session.accept(&remote_answer));
        }
        Command::Send { payload, reply } => {
            let _ = reply.send(session.send(payload));
        }
        Command::Close { reply } => {
            session.close();
            let _ = reply.send(());
        }
        Command::State { reply } => {
            let _ = reply.send(session.state());
        }
        Command::IsConnected { reply } => {
            let _ = reply.send(session.is_connected());
        }
        Command::LastError { reply } => {
            let _ = reply.send(session.last_error().cloned());
        }
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start as the offerer; resolves with the offer text once ICE
    /// gathering completes
    pub async fn offer(&self) -> Result<String, PeerError> {
        let (sdp_tx, sdp_rx) = oneshot::channel();
        self.request(|reply| Command::Offer { sdp: sdp_tx, reply }).await??;
        self.local_description(sdp_rx).await
    }

    /// Start as the answerer; resolves with the answer text once ICE
    /// gathering completes
    pub async fn answer(&self, remote_offer: &str) -> Result<String, PeerError> {
        let (sdp_tx, sdp_rx) = oneshot::channel();
        let remote_offer = remote_offer.to_string();
        self.request(|reply| Command::Answer {
            remote_offer,
            sdp: sdp_tx,
            reply,
        })
        .await??;
        self.local_description(sdp_rx).await
    }

    /// Hand the remote answer to the offerer. Returns once the engine has
    /// been asked to apply it.
    pub async fn accept(&self, remote_answer: &str) -> Result<(), PeerError> {
        let remote_answer = remote_answer.to_string();
        self.request(|reply| Command::Accept { remote_answer, reply }).await?
    }

    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), PeerError> {
        let payload = payload.into();
        self.request(|reply| Command::Send { payload, reply }).await?
    }

    pub async fn close(&self) -> Result<(), PeerError> {
        self.request(|reply| Command::Close { reply }).await
    }

    pub async fn state(&self) -> Result<SessionState, PeerError> {
        self.request(|reply| Command::State { reply }).await
    }

    pub async fn is_connected(&self) -> Result<bool, PeerError> {
        self.request(|reply| Command::IsConnected { reply }).await
    }

    pub async fn last_error(&self) -> Result<Option<PeerError>, PeerError> {
        self.request(|reply| Command::LastError { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, PeerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| PeerError::SessionEnded)?;
        rx.await.map_err(|_| PeerError::SessionEnded)
    }

    /// Wait for the session's SDP callback. A dropped callback means the
    /// negotiation failed or the session ended first.
    async fn local_description(&self, sdp: oneshot::Receiver<String>) -> Result<String, PeerError> {
        match sdp.await {
            Ok(text) => Ok(text),
            Err(_) => {
                let err = self.last_error().await?.unwrap_or(PeerError::SessionEnded);
                debug!("Session {} gave up waiting for local description: {}", self.id, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PeerConfig, PeerOverrides};
    use crate::peer::callbacks::PeerCallbacks;
    use crate::peer::description::SessionDescription;
    use crate::peer::engine::{ChannelEvent, EngineError, EngineEvent};
    use crate::peer::mock::{ChannelCall, EngineCall, MockChannel, MockEngine, MockLog, MockScript};

    type Events = mpsc::UnboundedSender<SessionEvent<MockChannel>>;

    fn responding(overrides: PeerOverrides) -> (SessionHandle, MockLog, Events) {
        let log = MockLog::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = MockEngine::responding(log.clone(), tx.clone(), MockScript::default());
        let session = PeerSession::new(PeerConfig::new(overrides, PeerCallbacks::default()), Ok(engine));
        (spawn(session, rx), log, tx)
    }

    async fn wait_connected(handle: &SessionHandle) -> bool {
        for _ in 0..100 {
            if handle.is_connected().await.unwrap() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    async fn wait_state(handle: &SessionHandle, state: SessionState) -> bool {
        for _ in 0..100 {
            if handle.state().await.unwrap() == state {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_offer_answer_accept() {
        let (offerer, offerer_log, offerer_events) = responding(PeerOverrides::default());
        let (answerer, answerer_log, answerer_events) = responding(PeerOverrides::default());

        let offer = offerer.offer().await.unwrap();
        let parsed = SessionDescription::from_json(&offer).unwrap();
        assert!(parsed.sdp.contains("a=candidate:"));

        let answer = answerer.answer(&offer).await.unwrap();
        assert_eq!(
            answerer_log.engine_calls()[0],
            EngineCall::SetRemoteDescription(parsed)
        );

        offerer.accept(&answer).await.unwrap();
        assert!(wait_state(&offerer, SessionState::RemoteDescriptionSet).await);
        assert!(offerer_log
            .engine_calls()
            .contains(&EngineCall::SetRemoteDescription(SessionDescription::from_json(&answer).unwrap())));

        answerer_events
            .send(SessionEvent::Engine(EngineEvent::DataChannel(MockChannel::new(
                "peer",
                answerer_log.clone(),
            ))))
            .unwrap();
        offerer_events.send(SessionEvent::Channel(ChannelEvent::Open)).unwrap();
        answerer_events.send(SessionEvent::Channel(ChannelEvent::Open)).unwrap();

        assert!(wait_connected(&offerer).await);
        assert!(wait_connected(&answerer).await);

        offerer.send("hello").await.unwrap();
        assert_eq!(offerer_log.sent(), vec![Payload::from("hello")]);

        offerer.close().await.unwrap();
        assert!(!offerer.is_connected().await.unwrap());
        assert_eq!(offerer_log.count_engine(&EngineCall::Close), 1);
        assert_eq!(offerer_log.count_channel(&ChannelCall::Detach), 1);
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (handle, log, _events) = responding(PeerOverrides::default());
        handle.offer().await.unwrap();
        assert_eq!(handle.send("early").await, Err(PeerError::NotConnected));
        assert!(log.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_answer_is_reported() {
        let (handle, _log, _events) = responding(PeerOverrides::default());
        handle.offer().await.unwrap();
        assert!(matches!(
            handle.accept("garbage").await,
            Err(PeerError::MalformedDescription(_))
        ));
        assert_eq!(handle.state().await.unwrap(), SessionState::AwaitingRemote);
    }

    #[tokio::test]
    async fn test_offer_times_out() {
        let log = MockLog::new();
        let (_tx, rx) = mpsc::unbounded_channel::<SessionEvent<MockChannel>>();
        let overrides = PeerOverrides {
            negotiation_timeout_ms: Some(20),
            ..Default::default()
        };
        let session = PeerSession::new(
            PeerConfig::new(overrides, PeerCallbacks::default()),
            Ok(MockEngine::new(log)),
        );
        let handle = spawn(session, rx);

        assert_eq!(
            handle.offer().await,
            Err(PeerError::Timeout("offer creation".to_string()))
        );
        assert_eq!(handle.state().await.unwrap(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_unusable_session() {
        let (_tx, rx) = mpsc::unbounded_channel::<SessionEvent<MockChannel>>();
        let session: PeerSession<MockEngine> =
            PeerSession::new(PeerConfig::default(), Err(EngineError::new("no engine")));
        let handle = spawn(session, rx);

        assert_eq!(handle.offer().await, Err(PeerError::Unusable));
        assert_eq!(handle.answer("{}").await, Err(PeerError::Unusable));
        assert_eq!(handle.state().await.unwrap(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_task() {
        let (handle, _log, events) = responding(PeerOverrides::default());
        let second = handle.clone();
        drop(handle);
        assert!(second.state().await.is_ok());
        drop(second);

        for _ in 0..100 {
            if events.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session task still running after handles were dropped");
    }
}
