//! The speech scheduling state machine.
//!
//! A single worker task owns the pending queue and the playback state.
//! Caller requests, device notifications and initialization completion all
//! arrive on one mailbox and are handled strictly in order, and every device
//! call is awaited before the next message is looked at, so each transition
//! observes a settled state.
//!
//! ```text
//!   speak/stop/settle ──┐
//!   device events ──────┼──► mailbox ──► SchedulerWorker ──► SpeechDevice
//!   init completion ────┘                      │
//!                                              └──► Telemetry
//! ```

use crate::config::SchedulerConfig;
use crate::speech::device::{
    DeviceError, DeviceEvent, DeviceEventSink, DeviceResult, SpeechDevice, Subscription,
};
use crate::speech::queue::SpeechQueue;
use crate::speech::types::{PlaybackState, Priority, SpeakOptions, SpeakOutcome};
use crate::telemetry::{self, attributes, Attributes, Telemetry};
use crate::utils::perf::{PlaybackMetrics, PlaybackMetricsSnapshot, Stopwatch};
use crate::{Result, SchedulerError};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Message handled by the scheduler worker
enum Command {
    Speak {
        text: String,
        priority: Priority,
        reply: oneshot::Sender<Result<SpeakOutcome>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    Device(DeviceEvent),
    Initialized(DeviceResult<()>),
    Settle {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// State published by the worker after every transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub state: PlaybackState,
    pub queue_len: usize,
}

/// Handle to a running scheduler.
///
/// Construct it inside a tokio runtime. Dropping the handle shuts the
/// worker down and deregisters it from the device.
pub struct SpeechScheduler {
    command_tx: mpsc::UnboundedSender<Command>,
    ready_rx: watch::Receiver<bool>,
    snapshot: Arc<Mutex<SchedulerSnapshot>>,
    metrics: Arc<Mutex<PlaybackMetrics>>,
    default_priority: Priority,
    worker: Option<JoinHandle<()>>,
}

impl SpeechScheduler {
    /// Start a scheduler for `device`.
    ///
    /// Registers for device notifications and starts device initialization
    /// in the background; requests made before it completes are held and
    /// replayed in order afterwards.
    pub fn new(
        device: Arc<dyn SpeechDevice>,
        telemetry: Arc<dyn Telemetry>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);
        let snapshot = Arc::new(Mutex::new(SchedulerSnapshot::default()));
        let metrics = Arc::new(Mutex::new(PlaybackMetrics::new(config.metrics_window)));

        let events_tx = command_tx.clone();
        let sink = DeviceEventSink::new(move |event| events_tx.send(Command::Device(event)).is_ok());
        let subscription = Subscription::new(Arc::clone(&device), sink);

        spawn_initialization(Arc::clone(&device), &config, command_tx.clone());

        let worker = SchedulerWorker {
            device,
            telemetry,
            config: config.clone(),
            queue: SpeechQueue::new(),
            state: PlaybackState::Uninitialized,
            unstarted: 0,
            superseded: false,
            awaiting_start: false,
            playing_since: None,
            backlog: VecDeque::new(),
            ready_tx,
            snapshot: Arc::clone(&snapshot),
            metrics: Arc::clone(&metrics),
            _subscription: subscription,
        };
        let handle = tokio::spawn(worker.run(command_rx));

        Ok(Self {
            command_tx,
            ready_rx,
            snapshot,
            metrics,
            default_priority: config.default_priority,
            worker: Some(handle),
        })
    }

    /// Speak `text`, or queue it behind the current utterance.
    ///
    /// Blank text is ignored. Waits for device readiness first; without a
    /// configured `ready_timeout_ms` that wait has no bound.
    pub async fn speak(
        &self,
        text: &str,
        options: impl Into<SpeakOptions>,
    ) -> Result<SpeakOutcome> {
        if text.trim().is_empty() {
            return Ok(SpeakOutcome::Skipped);
        }

        let priority = options.into().priority.unwrap_or(self.default_priority);
        let (reply, rx) = oneshot::channel();
        self.send(Command::Speak {
            text: text.to_string(),
            priority,
            reply,
        })?;

        rx.await.map_err(|_| worker_gone())?
    }

    /// Clear the queue and silence the device
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply })?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Resolve once device initialization has completed, successfully or not
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        // An error means the worker is gone and readiness can no longer change
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Resolve once everything submitted before this call has been handled
    pub async fn settle(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Settle { reply })?;
        rx.await.map_err(|_| worker_gone())
    }

    pub fn is_initialized(&self) -> bool {
        *self.ready_rx.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == PlaybackState::Speaking
    }

    pub fn state(&self) -> PlaybackState {
        self.snapshot.lock().state
    }

    pub fn queue_len(&self) -> usize {
        self.snapshot.lock().queue_len
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        *self.snapshot.lock()
    }

    pub fn metrics(&self) -> PlaybackMetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    /// Stop the worker and wait for it to exit
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            handle
                .await
                .map_err(|e| SchedulerError::Channel(format!("scheduler worker failed: {}", e)))?;
        }
        Ok(())
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.command_tx.send(cmd).map_err(|_| worker_gone())
    }
}

impl Drop for SpeechScheduler {
    fn drop(&mut self) {
        if self.worker.take().is_some() {
            let _ = self.command_tx.send(Command::Shutdown);
        }
    }
}

fn worker_gone() -> SchedulerError {
    SchedulerError::Channel("speech scheduler worker has stopped".to_string())
}

/// Run device init once and report completion to the worker, whatever happens
fn spawn_initialization(
    device: Arc<dyn SpeechDevice>,
    config: &SchedulerConfig,
    command_tx: mpsc::UnboundedSender<Command>,
) {
    let rate = config.speech_rate;
    let normalized = config.rate_normalized;

    tokio::spawn(async move {
        let init = tokio::spawn(async move {
            device.initialize().await?;
            device.set_rate(rate, normalized).await
        });

        let result = match init.await {
            Ok(result) => result,
            Err(e) => Err(DeviceError::Init(format!(
                "initialization task failed: {}",
                e
            ))),
        };

        let _ = command_tx.send(Command::Initialized(result));
    });
}

/// A request that arrived before the device was ready
struct PendingSpeak {
    text: String,
    priority: Priority,
    reply: oneshot::Sender<Result<SpeakOutcome>>,
    deadline: Option<Instant>,
}

struct SchedulerWorker {
    device: Arc<dyn SpeechDevice>,
    telemetry: Arc<dyn Telemetry>,
    config: SchedulerConfig,
    queue: SpeechQueue,
    state: PlaybackState,
    /// Accepted dispatches whose `started` has not arrived yet
    unstarted: usize,
    /// An utterance was stopped or preempted; it may still report in
    superseded: bool,
    /// The current utterance followed a superseded one and has not started,
    /// so a `cancelled` seen now belongs to the old one
    awaiting_start: bool,
    playing_since: Option<Stopwatch>,
    backlog: VecDeque<PendingSpeak>,
    ready_tx: watch::Sender<bool>,
    snapshot: Arc<Mutex<SchedulerSnapshot>>,
    metrics: Arc<Mutex<PlaybackMetrics>>,
    _subscription: Subscription,
}

impl SchedulerWorker {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        info!("Speech scheduler worker starting");

        loop {
            let cmd = match self.next_backlog_deadline() {
                Some(deadline) => tokio::select! {
                    cmd = command_rx.recv() => cmd,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.expire_backlog();
                        continue;
                    }
                },
                None => command_rx.recv().await,
            };

            match cmd {
                Some(Command::Shutdown) | None => break,
                Some(cmd) => self.handle(cmd).await,
            }
            self.publish();
        }

        if !self.backlog.is_empty() {
            warn!(
                "Shutting down with {} request(s) still waiting for the device",
                self.backlog.len()
            );
        }
        info!("Speech scheduler worker stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Speak {
                text,
                priority,
                reply,
            } => {
                if self.state == PlaybackState::Uninitialized {
                    debug!("Device not ready, holding {} request", priority);
                    let deadline = self.config.ready_timeout().map(|t| Instant::now() + t);
                    self.backlog.push_back(PendingSpeak {
                        text,
                        priority,
                        reply,
                        deadline,
                    });
                    return;
                }
                let result = self.speak(text, priority).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let result = self.stop().await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Device(event) => self.on_device_event(event).await,
            Command::Initialized(result) => self.on_initialized(result).await,
            Command::Settle { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    async fn speak(&mut self, text: String, priority: Priority) -> Result<SpeakOutcome> {
        if priority.is_interrupt() {
            self.drop_queued("interrupt");

            if self.state == PlaybackState::Speaking {
                if let Err(e) = self.device.stop_current().await {
                    // The preempted utterance is presumably still playing
                    warn!("Failed to stop current utterance for interrupt: {}", e);
                    self.track(telemetry::SPEAK_FAILED, Some(error_attrs(&e)));
                    return Err(e.into());
                }
                self.superseded = true;
            }

            self.dispatch(&text, priority, None).await?;
            return Ok(SpeakOutcome::Dispatched);
        }

        if self.state == PlaybackState::Speaking {
            let id = self.queue.enqueue(text, priority)?;
            self.metrics.lock().record_queued();
            debug!(%id, "Queued {} utterance ({} pending)", priority, self.queue.len());
            self.track(
                telemetry::QUEUED,
                Some(attributes([("priority", json!(priority.as_str()))])),
            );
            return Ok(SpeakOutcome::Queued);
        }

        self.dispatch(&text, priority, None).await?;
        Ok(SpeakOutcome::Dispatched)
    }

    /// Send text to the device, leaving a definite state either way
    async fn dispatch(
        &mut self,
        text: &str,
        priority: Priority,
        waited: Option<Duration>,
    ) -> Result<()> {
        match self.device.speak(text).await {
            Ok(()) => {
                self.state = PlaybackState::Speaking;
                self.unstarted += 1;
                self.awaiting_start = std::mem::take(&mut self.superseded);
                self.playing_since = None;

                {
                    let mut metrics = self.metrics.lock();
                    metrics.record_dispatch();
                    if let Some(waited) = waited {
                        metrics.record_queue_wait(waited);
                    }
                }

                debug!("Dispatched {} utterance", priority);
                self.track(
                    telemetry::SPEAK_START,
                    Some(attributes([
                        ("text_length", json!(text.chars().count())),
                        ("priority", json!(priority.as_str())),
                    ])),
                );
                Ok(())
            }
            Err(e) => {
                warn!("Device rejected utterance: {}", e);
                self.state = PlaybackState::Idle;
                self.playing_since = None;
                self.metrics.lock().record_failure();
                self.track(telemetry::SPEAK_FAILED, Some(error_attrs(&e)));
                Err(e.into())
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.drop_queued("stop");

        if self.state == PlaybackState::Uninitialized {
            let cancelled = self.backlog.len();
            for pending in self.backlog.drain(..) {
                let _ = pending.reply.send(Ok(SpeakOutcome::Cancelled));
            }
            if cancelled > 0 {
                info!("Cancelled {} request(s) waiting for the device", cancelled);
            }
            self.track(telemetry::STOPPED, None);
            return Ok(());
        }

        let result = self.device.stop_current().await;

        if self.state == PlaybackState::Speaking {
            self.superseded = true;
        }
        self.state = PlaybackState::Idle;
        self.awaiting_start = false;
        self.playing_since = None;

        match result {
            Ok(()) => {
                debug!("Playback stopped");
                self.track(telemetry::STOPPED, None);
                Ok(())
            }
            Err(e) => {
                warn!("Device failed to stop: {}", e);
                Err(e.into())
            }
        }
    }

    async fn on_device_event(&mut self, event: DeviceEvent) {
        if self.state == PlaybackState::Uninitialized {
            debug!("Ignoring '{}' before initialization", event.as_str());
            return;
        }

        match event {
            DeviceEvent::Started => {
                if self.unstarted > 0 {
                    self.unstarted -= 1;
                    if self.unstarted > 0 || self.state == PlaybackState::Idle {
                        debug!("Ignoring 'started' from a superseded utterance");
                        return;
                    }
                }
                self.awaiting_start = false;
                self.state = PlaybackState::Speaking;
                self.playing_since = Some(Stopwatch::start());
            }
            DeviceEvent::Finished | DeviceEvent::Cancelled => {
                if self.state != PlaybackState::Speaking {
                    debug!("Ignoring stray '{}' while idle", event.as_str());
                    self.superseded = false;
                    return;
                }
                if event == DeviceEvent::Cancelled && self.awaiting_start {
                    debug!("Ignoring 'cancelled' from a preempted utterance");
                    return;
                }

                // Whatever was dispatched before this point is over
                self.unstarted = 0;
                self.awaiting_start = false;
                let played = self.playing_since.take();
                self.state = PlaybackState::Idle;

                if event == DeviceEvent::Cancelled {
                    debug!("Playback cancelled by device");
                    return;
                }

                if let Some(stopwatch) = played {
                    let elapsed = stopwatch.elapsed();
                    self.metrics.lock().record_playback(elapsed);
                    self.track(
                        telemetry::SPEAK_FINISH,
                        Some(attributes([(
                            "duration_ms",
                            json!(elapsed.as_millis() as u64),
                        )])),
                    );
                }

                self.play_next().await;
            }
        }
    }

    /// Dispatch queued utterances until one is accepted or the queue runs dry
    async fn play_next(&mut self) {
        while let Some(next) = self.queue.dequeue_highest() {
            let waited = next.enqueued_at.elapsed();
            debug!(id = %next.id, "Playing next queued utterance");
            if self
                .dispatch(&next.text, next.priority, Some(waited))
                .await
                .is_ok()
            {
                return;
            }
            debug!(id = %next.id, "Skipping queued utterance the device rejected");
        }
    }

    async fn on_initialized(&mut self, result: DeviceResult<()>) {
        if self.state != PlaybackState::Uninitialized {
            error!("Received a second initialization result; ignoring");
            return;
        }

        match &result {
            Ok(()) => info!("Speech device initialized"),
            Err(e) => {
                warn!("Speech device initialization failed, continuing anyway: {}", e);
                self.track(telemetry::INIT_FAILED, Some(error_attrs(e)));
            }
        }

        self.state = PlaybackState::Idle;
        self.ready_tx.send_replace(true);
        self.publish();

        let backlog = std::mem::take(&mut self.backlog);
        if !backlog.is_empty() {
            debug!("Replaying {} request(s) held for readiness", backlog.len());
        }
        for pending in backlog {
            let result = self.speak(pending.text, pending.priority).await;
            self.publish();
            let _ = pending.reply.send(result);
        }
    }

    fn next_backlog_deadline(&self) -> Option<Instant> {
        self.backlog.iter().filter_map(|p| p.deadline).min()
    }

    fn expire_backlog(&mut self) {
        let now = Instant::now();
        let timeout_ms = self.config.ready_timeout_ms.unwrap_or_default();

        let mut kept = VecDeque::with_capacity(self.backlog.len());
        for pending in self.backlog.drain(..) {
            if pending.deadline.map_or(false, |d| d <= now) {
                warn!("Request waited {}ms for the device; giving up", timeout_ms);
                let _ = pending
                    .reply
                    .send(Err(SchedulerError::ReadinessTimeout(timeout_ms)));
            } else {
                kept.push_back(pending);
            }
        }
        self.backlog = kept;
    }

    fn drop_queued(&mut self, reason: &str) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("Dropped {} queued utterance(s) on {}", dropped, reason);
            self.metrics.lock().record_dropped(dropped);
        }
    }

    fn publish(&self) {
        *self.snapshot.lock() = SchedulerSnapshot {
            state: self.state,
            queue_len: self.queue.len(),
        };
    }

    fn track(&self, event: &str, attrs: Option<Attributes>) {
        telemetry::track_guarded(self.telemetry.as_ref(), event, attrs.as_ref());
    }
}

fn error_attrs(e: &impl std::fmt::Display) -> Attributes {
    attributes([("error", json!(e.to_string()))])
}
