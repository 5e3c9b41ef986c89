//! The speech device port.
//!
//! A device plays one piece of text at a time and reports its lifecycle
//! through [`DeviceEvent`] notifications. Implementations deliver those
//! notifications to every [`DeviceEventSink`] subscribed through
//! [`SpeechDevice::subscribe`]; [`DeviceListeners`] does the bookkeeping.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device used before initialization")]
    NotInitialized,

    #[error("initialization failed: {0}")]
    Init(String),

    #[error("failed to set speech rate: {0}")]
    Rate(String),

    #[error("failed to start speaking: {0}")]
    Speak(String),

    #[error("failed to stop speaking: {0}")]
    Stop(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Lifecycle notification emitted by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceEvent {
    Started,
    Finished,
    Cancelled,
}

impl DeviceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceEvent::Started => "started",
            DeviceEvent::Finished => "finished",
            DeviceEvent::Cancelled => "cancelled",
        }
    }
}

/// Receiving end of device notifications.
///
/// `notify` never blocks, so devices may call it from audio or worker
/// threads.
#[derive(Clone)]
pub struct DeviceEventSink {
    deliver: Arc<dyn Fn(DeviceEvent) -> bool + Send + Sync>,
}

impl DeviceEventSink {
    /// Wrap a delivery function; it returns `false` once the receiver is gone
    pub fn new(deliver: impl Fn(DeviceEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Sink feeding an unbounded tokio channel
    pub fn from_sender(tx: tokio::sync::mpsc::UnboundedSender<DeviceEvent>) -> Self {
        Self::new(move |event| tx.send(event).is_ok())
    }

    pub fn notify(&self, event: DeviceEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for DeviceEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEventSink").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Opaque single-voice speech output.
///
/// Notifications go to every subscribed sink, in the order things happen:
///
/// - every accepted `speak` produces one `started` once playback begins
/// - natural completion produces `finished`
/// - `stop_current`, or a `speak` that replaces the current utterance, may
///   produce `cancelled` for the old utterance; devices that report nothing
///   in that case are fine too
///
/// Notifications for an utterance must not be delivered after the
/// `started` of a later one.
#[async_trait]
pub trait SpeechDevice: Send + Sync {
    /// Bring the engine up. Called once by the scheduler.
    async fn initialize(&self) -> DeviceResult<()>;

    /// Set the default speech rate. Called once, right after `initialize`.
    async fn set_rate(&self, value: f32, normalized: bool) -> DeviceResult<()>;

    /// Begin playing `text`, replacing anything still playing. Returns once
    /// playback has been requested; `started` follows when it begins.
    async fn speak(&self, text: &str) -> DeviceResult<()>;

    /// Halt current playback, best effort. May report `cancelled` for the
    /// halted utterance, but is not required to.
    async fn stop_current(&self) -> DeviceResult<()>;

    fn subscribe(&self, sink: DeviceEventSink) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Registry of subscribed sinks, for use inside device implementations
#[derive(Debug, Default)]
pub struct DeviceListeners {
    sinks: Mutex<Vec<(SubscriptionId, DeviceEventSink)>>,
    next_id: AtomicU64,
}

impl DeviceListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: DeviceEventSink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.lock().push((id, sink));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.sinks.lock().retain(|(sid, _)| *sid != id);
    }

    /// Deliver an event to every sink, dropping sinks whose receiver is gone
    pub fn emit(&self, event: DeviceEvent) {
        let sinks: Vec<_> = self.sinks.lock().clone();

        let mut dead = Vec::new();
        for (id, sink) in &sinks {
            if !sink.notify(event) {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            debug!("Dropping {} closed device listener(s)", dead.len());
            self.sinks.lock().retain(|(id, _)| !dead.contains(id));
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.lock().is_empty()
    }
}

/// Keeps a sink subscribed for as long as the guard lives
pub struct Subscription {
    device: Arc<dyn SpeechDevice>,
    id: SubscriptionId,
}

impl Subscription {
    pub fn new(device: Arc<dyn SpeechDevice>, sink: DeviceEventSink) -> Self {
        let id = device.subscribe(sink);
        Self { device, id }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("Unsubscribing device listener {:?}", self.id);
        self.device.unsubscribe(self.id);
    }
}
