//! Caller callbacks

use super::engine::Payload;

/// Callback for channel open / close
pub type NotifyCallback = Box<dyn Fn() + Send + Sync>;

/// Callback for received data channel messages
pub type MessageCallback = Box<dyn Fn(Payload) + Send + Sync>;

/// Callback for channel errors and log lines
pub type TextCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Single-shot callback receiving the local description text
pub type SdpCallback = Box<dyn FnOnce(String) + Send>;

/// The five named callback slots of a session; each defaults to a no-op.
pub struct PeerCallbacks {
    pub on_open: NotifyCallback,
    pub on_close: NotifyCallback,
    pub on_message: MessageCallback,
    pub on_error: TextCallback,
    pub on_log: TextCallback,
}

impl Default for PeerCallbacks {
    fn default() -> Self {
        Self {
            on_open: Box::new(|| {}),
            on_close: Box::new(|| {}),
            on_message: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
            on_log: Box::new(|_| {}),
        }
    }
}

impl PeerCallbacks {
    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Box::new(f);
        self
    }

    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Box::new(f);
        self
    }

    pub fn on_message(mut self, f: impl Fn(Payload) + Send + Sync + 'static) -> Self {
        self.on_message = Box::new(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }

    pub fn on_log(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_log = Box::new(f);
        self
    }
}
