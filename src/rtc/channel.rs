//! webrtc-rs data channel binding

use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::config::BinaryType;
use crate::peer::engine::{ChannelEvent, DataChannel, EngineError, Payload, SessionEvent};

use super::engine::EngineOp;

/// Slot filled once the worker has created the underlying channel
pub(crate) type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// Data channel backed by an `RTCDataChannel`.
///
/// Sends go through the engine worker so they stay ordered behind the
/// operation that created the channel.
pub struct RtcChannel {
    label: String,
    slot: ChannelSlot,
    detached: Arc<AtomicBool>,
    binary_type: BinaryType,
    ops: mpsc::UnboundedSender<EngineOp>,
}

impl RtcChannel {
    /// Channel whose `RTCDataChannel` the worker has yet to create
    pub(crate) fn pending(label: &str, ops: mpsc::UnboundedSender<EngineOp>) -> Self {
        Self {
            label: label.to_string(),
            slot: Arc::new(Mutex::new(None)),
            detached: Arc::new(AtomicBool::new(false)),
            binary_type: BinaryType::default(),
            ops,
        }
    }

    /// Channel announced by the remote peer
    pub(crate) fn remote(channel: Arc<RTCDataChannel>, ops: mpsc::UnboundedSender<EngineOp>) -> Self {
        let rtc = Self::pending(channel.label(), ops);
        *rtc.slot.lock() = Some(channel);
        rtc
    }

    pub(crate) fn slot(&self) -> ChannelSlot {
        self.slot.clone()
    }

    pub(crate) fn detached_flag(&self) -> Arc<AtomicBool> {
        self.detached.clone()
    }

    pub fn binary_type(&self) -> BinaryType {
        self.binary_type
    }

    /// The underlying channel, once created
    pub fn inner(&self) -> Option<Arc<RTCDataChannel>> {
        self.slot.lock().clone()
    }
}

impl DataChannel for RtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn set_binary_type(&mut self, binary_type: BinaryType) {
        // Binary messages always surface as bytes
        debug!("DataChannel {} binary type: {}", self.label, binary_type.as_str());
        self.binary_type = binary_type;
    }

    fn attach(&mut self) {
        self.detached.store(false, Ordering::SeqCst);
    }

    fn detach(&mut self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    fn send(&mut self, payload: Payload) -> Result<(), EngineError> {
        self.ops
            .send(EngineOp::Send {
                channel: self.slot.clone(),
                payload,
            })
            .map_err(|_| EngineError::new("Connection engine is closed"))
    }
}

/// Session queue sender that goes quiet once `detached` is set
pub(crate) fn forwarder(
    events: &mpsc::UnboundedSender<SessionEvent<RtcChannel>>,
    detached: &Arc<AtomicBool>,
) -> Arc<dyn Fn(ChannelEvent) + Send + Sync> {
    let events = events.clone();
    let detached = detached.clone();
    Arc::new(move |event: ChannelEvent| {
        if !detached.load(Ordering::SeqCst) {
            let _ = events.send(SessionEvent::Channel(event));
        }
    })
}

/// Forward open/close/error/message from `channel` into the session queue
/// until it is detached
pub(crate) fn bind_channel(
    channel: &Arc<RTCDataChannel>,
    events: &mpsc::UnboundedSender<SessionEvent<RtcChannel>>,
    detached: &Arc<AtomicBool>,
) {
    let forward = forwarder(events, detached);

    let on_open = forward.clone();
    channel.on_open(Box::new(move || {
        on_open(ChannelEvent::Open);
        Box::pin(async {})
    }));

    let on_close = forward.clone();
    channel.on_close(Box::new(move || {
        on_close(ChannelEvent::Close);
        Box::pin(async {})
    }));

    let on_error = forward.clone();
    channel.on_error(Box::new(move |err: webrtc::Error| {
        on_error(ChannelEvent::Error(err.to_string()));
        Box::pin(async {})
    }));

    let on_message = forward;
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        on_message(ChannelEvent::Message(payload_from_message(msg)));
        Box::pin(async {})
    }));
}

/// Text messages that are not valid UTF-8 are passed on as binary
fn payload_from_message(msg: DataChannelMessage) -> Payload {
    if !msg.is_string {
        return Payload::Binary(msg.data);
    }
    let text = std::str::from_utf8(&msg.data).map(str::to_string);
    match text {
        Ok(text) => Payload::Text(text),
        Err(e) => {
            warn!("Text message is not valid UTF-8 ({}), delivering {} bytes as binary", e, msg.data.len());
            Payload::Binary(msg.data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_message_payloads() {
        let text = DataChannelMessage {
            is_string: true,
            data: Bytes::from_static(b"hello"),
        };
        assert_eq!(payload_from_message(text), Payload::from("hello"));

        let binary = DataChannelMessage {
            is_string: false,
            data: Bytes::from_static(&[0, 1, 2]),
        };
        assert_eq!(payload_from_message(binary), Payload::Binary(Bytes::from_static(&[0, 1, 2])));
    }

    #[test]
    fn test_invalid_utf8_text_stays_binary() {
        let msg = DataChannelMessage {
            is_string: true,
            data: Bytes::from_static(&[0x68, 0xff, 0xfe]),
        };
        assert_eq!(
            payload_from_message(msg),
            Payload::Binary(Bytes::from_static(&[0x68, 0xff, 0xfe]))
        );
    }

    #[test]
    fn test_forwarder_stops_after_detach() {
        let (ops, _ops_rx) = mpsc::unbounded_channel();
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut channel = RtcChannel::pending("peer", ops);
        let forward = forwarder(&events, &channel.detached_flag());

        forward(ChannelEvent::Open);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Channel(ChannelEvent::Open))));

        channel.detach();
        forward(ChannelEvent::Message(Payload::from("late")));
        forward(ChannelEvent::Close);
        assert!(rx.try_recv().is_err());

        channel.attach();
        forward(ChannelEvent::Error("again".to_string()));
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::Channel(ChannelEvent::Error(msg))) if msg == "again"
        ));
    }

    #[test]
    fn test_send_after_worker_exit() {
        let (ops, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut channel = RtcChannel::pending("peer", ops);
        assert!(channel.send(Payload::from("x")).is_err());
        assert!(channel.inner().is_none());
    }

    #[test]
    fn test_attach_and_detach_toggle_forwarding() {
        let (ops, _rx) = mpsc::unbounded_channel();
        let mut channel = RtcChannel::pending("peer", ops);
        let flag = channel.detached_flag();

        channel.detach();
        assert!(flag.load(Ordering::SeqCst));
        channel.attach();
        assert!(!flag.load(Ordering::SeqCst));
    }
}
