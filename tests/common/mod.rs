//! Scripted in-memory speech device for scheduler tests
//!
//! Behaves like a well-mannered engine: `speak` reports `started` (cancelling
//! whatever was playing first), `stop_current` reports `cancelled`, and
//! `finish()` lets the test end the current utterance. Every call is
//! recorded, initialization can be held open, and operations can be told
//! to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use speech_scheduler::{
    DeviceError, DeviceEvent, DeviceEventSink, DeviceListeners, DeviceResult, RecordingTelemetry,
    SchedulerConfig, SpeechDevice, SpeechScheduler, SubscriptionId,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Initialize,
    SetRate(f32, bool),
    Speak(String),
    Stop,
}

pub struct MockDevice {
    listeners: DeviceListeners,
    calls: Mutex<Vec<DeviceCall>>,
    playing: Mutex<Option<String>>,
    init_release: watch::Sender<bool>,
    fail_init: AtomicBool,
    fail_speaks: AtomicUsize,
    fail_stop: AtomicBool,
    emit_events: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        let (init_release, _) = watch::channel(true);
        Arc::new(Self {
            listeners: DeviceListeners::new(),
            calls: Mutex::new(Vec::new()),
            playing: Mutex::new(None),
            init_release,
            fail_init: AtomicBool::new(false),
            fail_speaks: AtomicUsize::new(0),
            fail_stop: AtomicBool::new(false),
            emit_events: AtomicBool::new(true),
        })
    }

    /// Device whose `initialize` blocks until `release_init`
    pub fn held() -> Arc<Self> {
        let device = Self::new();
        device.init_release.send_replace(false);
        device
    }

    pub fn release_init(&self) {
        self.init_release.send_replace(true);
    }

    pub fn fail_init(&self) {
        self.fail_init.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` speak calls fail
    pub fn fail_next_speaks(&self, count: usize) {
        self.fail_speaks.store(count, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Stop emitting notifications on its own; the test drives them
    pub fn manual_events(&self) {
        self.emit_events.store(false, Ordering::SeqCst);
    }

    /// End the current utterance naturally
    pub fn finish(&self) {
        if self.playing.lock().take().is_some() {
            self.listeners.emit(DeviceEvent::Finished);
        }
    }

    /// Deliver a raw notification regardless of playback
    pub fn emit(&self, event: DeviceEvent) {
        self.listeners.emit(event);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    /// Texts passed to `speak`, in order
    pub fn spoken(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Speak(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, DeviceCall::Stop))
            .count()
    }

    pub fn playing(&self) -> Option<String> {
        self.playing.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn auto(&self) -> bool {
        self.emit_events.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechDevice for MockDevice {
    async fn initialize(&self) -> DeviceResult<()> {
        self.calls.lock().push(DeviceCall::Initialize);
        let mut release = self.init_release.subscribe();
        let _ = release.wait_for(|released| *released).await;

        if self.fail_init.load(Ordering::SeqCst) {
            return Err(DeviceError::Init("engine missing".to_string()));
        }
        Ok(())
    }

    async fn set_rate(&self, value: f32, normalized: bool) -> DeviceResult<()> {
        self.calls.lock().push(DeviceCall::SetRate(value, normalized));
        Ok(())
    }

    async fn speak(&self, text: &str) -> DeviceResult<()> {
        self.calls.lock().push(DeviceCall::Speak(text.to_string()));

        let remaining = self.fail_speaks.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_speaks.store(remaining - 1, Ordering::SeqCst);
            return Err(DeviceError::Speak(format!("cannot speak '{}'", text)));
        }

        let previous = self.playing.lock().replace(text.to_string());
        if self.auto() {
            if previous.is_some() {
                self.listeners.emit(DeviceEvent::Cancelled);
            }
            self.listeners.emit(DeviceEvent::Started);
        }
        Ok(())
    }

    async fn stop_current(&self) -> DeviceResult<()> {
        self.calls.lock().push(DeviceCall::Stop);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(DeviceError::Stop("stuck".to_string()));
        }

        let previous = self.playing.lock().take();
        if previous.is_some() && self.auto() {
            self.listeners.emit(DeviceEvent::Cancelled);
        }
        Ok(())
    }

    fn subscribe(&self, sink: DeviceEventSink) -> SubscriptionId {
        self.listeners.subscribe(sink)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}

/// Scheduler over `device` with recorded telemetry
pub fn scheduler_for(
    device: &Arc<MockDevice>,
    config: SchedulerConfig,
) -> (SpeechScheduler, RecordingTelemetry) {
    let telemetry = RecordingTelemetry::new();
    let scheduler = SpeechScheduler::new(device.clone(), Arc::new(telemetry.clone()), config)
        .expect("valid scheduler config");
    (scheduler, telemetry)
}

/// Ready scheduler with the default configuration
pub async fn ready_scheduler(device: &Arc<MockDevice>) -> (SpeechScheduler, RecordingTelemetry) {
    let (scheduler, telemetry) = scheduler_for(device, SchedulerConfig::default());
    scheduler.ready().await;
    (scheduler, telemetry)
}
