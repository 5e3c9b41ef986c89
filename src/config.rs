//! Configuration for the scheduler and the simulated device
//!
//! Both structs deserialize from TOML with every field optional:
//!
//! ```toml
//! [scheduler]
//! speech_rate = 0.7
//! default_priority = "normal"
//! ready_timeout_ms = 5000
//!
//! [device]
//! words_per_minute = 180
//! ```

use crate::speech::Priority;
use crate::{Result, SchedulerError};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for `SpeechScheduler`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Rate passed to the device once during initialization
    pub speech_rate: f32,

    /// Whether `speech_rate` is on the device's normalized scale
    pub rate_normalized: bool,

    /// Priority used when a `speak` call does not name one
    pub default_priority: Priority,

    /// Fail requests that wait longer than this for device readiness.
    /// `None` waits indefinitely.
    pub ready_timeout_ms: Option<u64>,

    /// Number of samples kept for playback timing statistics
    pub metrics_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            speech_rate: 0.7,
            rate_normalized: true,
            default_priority: Priority::Normal,
            ready_timeout_ms: None,
            metrics_window: 50,
        }
    }
}

impl SchedulerConfig {
    /// Set the speech rate
    pub fn with_rate(mut self, rate: f32, normalized: bool) -> Self {
        self.speech_rate = rate;
        self.rate_normalized = normalized;
        self
    }

    /// Set the priority used when a request omits one
    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    /// Bound how long requests wait for the device to come up
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.speech_rate.is_finite() || self.speech_rate <= 0.0 {
            return Err(SchedulerError::Config(format!(
                "speech_rate must be positive, got {}",
                self.speech_rate
            )));
        }

        if self.metrics_window == 0 {
            return Err(SchedulerError::Config(
                "metrics_window must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for `SimulatedDevice`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatedDeviceConfig {
    /// Speaking pace at rate 1.0
    pub words_per_minute: u32,

    /// Shortest time any utterance plays for
    pub min_utterance_ms: u64,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        Self {
            words_per_minute: 180,
            min_utterance_ms: 250,
        }
    }
}

impl SimulatedDeviceConfig {
    pub fn with_words_per_minute(mut self, wpm: u32) -> Self {
        self.words_per_minute = wpm;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.words_per_minute == 0 {
            return Err(SchedulerError::Config(
                "words_per_minute must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level file layout
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub device: SimulatedDeviceConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.scheduler.validate()?;
        config.device.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            SchedulerError::Config(msg) => {
                SchedulerError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }
}
