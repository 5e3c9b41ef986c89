//! Timed stand-in for a real speech engine
//!
//! Playback runs on a dedicated thread fed by a command channel. Each
//! utterance "plays" for a duration derived from its word count and the
//! configured pace, and the thread reports `started`, `finished` and
//! `cancelled` exactly like a hardware engine would.

use crate::config::SimulatedDeviceConfig;
use crate::speech::device::{
    DeviceError, DeviceEvent, DeviceEventSink, DeviceListeners, DeviceResult, SpeechDevice,
    SubscriptionId,
};
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Command sent to the playback thread
#[derive(Debug, Clone)]
enum PlaybackCommand {
    Play(String),
    Stop,
    Shutdown,
}

struct PlaybackWorker {
    command_tx: Sender<PlaybackCommand>,
    handle: JoinHandle<()>,
}

/// Speed multiplier applied to the configured words-per-minute
#[derive(Debug, Clone, Copy)]
struct Pace {
    rate: f32,
    normalized: bool,
}

impl Pace {
    fn multiplier(&self) -> f32 {
        // On the normalized scale 0.5 is regular speed
        let m = if self.normalized { self.rate * 2.0 } else { self.rate };
        m.max(0.1)
    }
}

pub struct SimulatedDevice {
    config: SimulatedDeviceConfig,
    listeners: Arc<DeviceListeners>,
    pace: Arc<Mutex<Pace>>,
    transcript: Arc<Mutex<Vec<String>>>,
    worker: Mutex<Option<PlaybackWorker>>,
}

impl SimulatedDevice {
    pub fn new(config: SimulatedDeviceConfig) -> Self {
        Self {
            config,
            listeners: Arc::new(DeviceListeners::new()),
            pace: Arc::new(Mutex::new(Pace {
                rate: 1.0,
                normalized: false,
            })),
            transcript: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }

    /// Every text that started playing, in order
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }

    /// How long `text` would play at the current pace
    pub fn playback_duration(&self, text: &str) -> Duration {
        playback_duration(&self.config, *self.pace.lock(), text)
    }

    fn send(&self, cmd: PlaybackCommand) -> DeviceResult<()> {
        let worker = self.worker.lock();
        let worker = worker.as_ref().ok_or(DeviceError::NotInitialized)?;
        worker
            .command_tx
            .send(cmd)
            .map_err(|e| DeviceError::Unavailable(format!("playback thread gone: {}", e)))
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(SimulatedDeviceConfig::default())
    }
}

#[async_trait]
impl SpeechDevice for SimulatedDevice {
    async fn initialize(&self) -> DeviceResult<()> {
        self.config
            .validate()
            .map_err(|e| DeviceError::Init(e.to_string()))?;

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let (command_tx, command_rx) = unbounded();
        let listeners = Arc::clone(&self.listeners);
        let pace = Arc::clone(&self.pace);
        let transcript = Arc::clone(&self.transcript);
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("simulated-speech".to_string())
            .spawn(move || run_playback(command_rx, listeners, pace, transcript, config))
            .map_err(|e| DeviceError::Init(format!("failed to spawn playback thread: {}", e)))?;

        info!("Simulated speech device ready");
        *worker = Some(PlaybackWorker { command_tx, handle });
        Ok(())
    }

    async fn set_rate(&self, value: f32, normalized: bool) -> DeviceResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(DeviceError::Rate(format!("rate must be positive, got {}", value)));
        }
        *self.pace.lock() = Pace {
            rate: value,
            normalized,
        };
        debug!("Speech rate set to {} (normalized: {})", value, normalized);
        Ok(())
    }

    async fn speak(&self, text: &str) -> DeviceResult<()> {
        self.send(PlaybackCommand::Play(text.to_string()))
    }

    async fn stop_current(&self) -> DeviceResult<()> {
        self.send(PlaybackCommand::Stop)
    }

    fn subscribe(&self, sink: DeviceEventSink) -> SubscriptionId {
        self.listeners.subscribe(sink)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.command_tx.send(PlaybackCommand::Shutdown);
            if worker.handle.join().is_err() {
                warn!("Simulated playback thread panicked");
            }
        }
    }
}

fn playback_duration(config: &SimulatedDeviceConfig, pace: Pace, text: &str) -> Duration {
    let words = text.split_whitespace().count().max(1) as f32;
    let minutes = words / (config.words_per_minute.max(1) as f32 * pace.multiplier());
    let ms = (minutes * 60_000.0) as u64;
    Duration::from_millis(ms.max(config.min_utterance_ms))
}

fn run_playback(
    command_rx: Receiver<PlaybackCommand>,
    listeners: Arc<DeviceListeners>,
    pace: Arc<Mutex<Pace>>,
    transcript: Arc<Mutex<Vec<String>>>,
    config: SimulatedDeviceConfig,
) {
    debug!("Simulated playback thread starting");

    // Deadline of the utterance currently playing
    let mut playing: Option<Instant> = None;

    loop {
        let cmd = match playing {
            Some(deadline) => match command_rx.recv_deadline(deadline) {
                Ok(cmd) => cmd,
                Err(RecvTimeoutError::Timeout) => {
                    playing = None;
                    listeners.emit(DeviceEvent::Finished);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match command_rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        match cmd {
            PlaybackCommand::Play(text) => {
                if playing.take().is_some() {
                    listeners.emit(DeviceEvent::Cancelled);
                }
                let duration = playback_duration(&config, *pace.lock(), &text);
                info!("Speaking ({}ms): {}", duration.as_millis(), text);
                transcript.lock().push(text);
                playing = Some(Instant::now() + duration);
                listeners.emit(DeviceEvent::Started);
            }
            PlaybackCommand::Stop => {
                if playing.take().is_some() {
                    listeners.emit(DeviceEvent::Cancelled);
                }
            }
            PlaybackCommand::Shutdown => {
                if playing.take().is_some() {
                    listeners.emit(DeviceEvent::Cancelled);
                }
                break;
            }
        }
    }

    debug!("Simulated playback thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn fast_config() -> SimulatedDeviceConfig {
        SimulatedDeviceConfig {
            words_per_minute: 60_000,
            min_utterance_ms: 20,
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> DeviceEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("device event timed out")
            .expect("device channel closed")
    }

    #[test]
    fn test_playback_duration_scales_with_rate() {
        let config = SimulatedDeviceConfig {
            words_per_minute: 120,
            min_utterance_ms: 0,
        };
        let text = "one two three four";
        let normal = playback_duration(
            &config,
            Pace {
                rate: 1.0,
                normalized: false,
            },
            text,
        );
        let fast = playback_duration(
            &config,
            Pace {
                rate: 1.0,
                normalized: true,
            },
            text,
        );

        assert_eq!(normal, Duration::from_millis(2000));
        assert_eq!(fast, Duration::from_millis(1000));
    }

    #[test]
    fn test_playback_duration_floor() {
        let config = SimulatedDeviceConfig::default();
        let d = playback_duration(
            &config,
            Pace {
                rate: 4.0,
                normalized: false,
            },
            "hi",
        );
        assert_eq!(d, Duration::from_millis(config.min_utterance_ms));
    }

    #[tokio::test]
    async fn test_speak_before_initialize_fails() {
        let device = SimulatedDevice::default();
        assert_eq!(device.speak("hello").await, Err(DeviceError::NotInitialized));
    }

    #[tokio::test]
    async fn test_rejects_bad_rate() {
        let device = SimulatedDevice::default();
        assert!(matches!(
            device.set_rate(-1.0, true).await,
            Err(DeviceError::Rate(_))
        ));
    }

    #[tokio::test]
    async fn test_plays_to_completion() {
        let device = SimulatedDevice::new(fast_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        device.subscribe(DeviceEventSink::from_sender(tx));

        device.initialize().await.unwrap();
        device.speak("hello there").await.unwrap();

        assert_eq!(next_event(&mut rx).await, DeviceEvent::Started);
        assert_eq!(next_event(&mut rx).await, DeviceEvent::Finished);
        assert_eq!(device.transcript(), vec!["hello there".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_cancels_playback() {
        let device = SimulatedDevice::new(SimulatedDeviceConfig {
            words_per_minute: 1,
            min_utterance_ms: 0,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        device.subscribe(DeviceEventSink::from_sender(tx));

        device.initialize().await.unwrap();
        device.speak("a long sentence").await.unwrap();
        assert_eq!(next_event(&mut rx).await, DeviceEvent::Started);

        device.stop_current().await.unwrap();
        assert_eq!(next_event(&mut rx).await, DeviceEvent::Cancelled);
    }

    #[tokio::test]
    async fn test_new_play_cancels_current_first() {
        let device = SimulatedDevice::new(SimulatedDeviceConfig {
            words_per_minute: 1,
            min_utterance_ms: 0,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        device.subscribe(DeviceEventSink::from_sender(tx));

        device.initialize().await.unwrap();
        device.speak("first").await.unwrap();
        device.speak("second").await.unwrap();

        assert_eq!(next_event(&mut rx).await, DeviceEvent::Started);
        assert_eq!(next_event(&mut rx).await, DeviceEvent::Cancelled);
        assert_eq!(next_event(&mut rx).await, DeviceEvent::Started);
    }
}
