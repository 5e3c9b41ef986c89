//! Speech scheduling for a single-voice output device.
//!
//! Callers submit utterances with a [`Priority`]; the [`SpeechScheduler`]
//! makes sure only one plays at a time, orders the rest, and lets
//! `interrupt` requests flush everything pending.

pub mod config;
pub mod speech;
pub mod telemetry;
pub mod utils;

pub use config::{AppConfig, SchedulerConfig, SimulatedDeviceConfig};
pub use speech::{
    DeviceError, DeviceEvent, DeviceEventSink, DeviceListeners, DeviceResult, PlaybackState,
    Priority, SchedulerSnapshot, SimulatedDevice, SpeakOptions, SpeakOutcome, SpeechDevice,
    SpeechQueue, SpeechScheduler, Subscription, SubscriptionId, Utterance,
};
pub use telemetry::{
    Attributes, NoopTelemetry, RecordingTelemetry, Telemetry, TelemetryRecord, TracingTelemetry,
};
pub use utils::PlaybackMetricsSnapshot;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Speech device was not ready after {0}ms")]
    ReadinessTimeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SchedulerError {
    fn from(e: std::io::Error) -> Self {
        SchedulerError::Io(e.to_string())
    }
}

impl SchedulerError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The caller can fix the text and try again
            SchedulerError::InvalidInput(_) => true,
            // Device hiccups are typically transient; the next speak may work
            SchedulerError::Device(_) => true,
            // The device may still come up later
            SchedulerError::ReadinessTimeout(_) => true,
            SchedulerError::Config(_) => false,
            // The scheduler worker is gone
            SchedulerError::Channel(_) => false,
            SchedulerError::Io(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            SchedulerError::InvalidInput(_) => "Nothing to say.".to_string(),
            SchedulerError::Device(_) => {
                "Speech output failed. Please check the speech engine.".to_string()
            }
            SchedulerError::ReadinessTimeout(_) => {
                "Speech engine is still starting. Please try again.".to_string()
            }
            SchedulerError::Config(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            SchedulerError::Channel(_) => {
                "Speech scheduler has shut down. Please restart the application.".to_string()
            }
            SchedulerError::Io(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
