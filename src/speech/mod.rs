//! Speech scheduling
//!
//! This module provides:
//! - The pending-utterance priority queue
//! - The scheduler state machine driving a single speech device
//! - The device port and a timed simulated device

pub mod device;
pub mod queue;
pub mod scheduler;
pub mod simulated;
pub mod types;

// Re-export commonly used types
pub use device::{
    DeviceError, DeviceEvent, DeviceEventSink, DeviceListeners, DeviceResult, SpeechDevice,
    Subscription, SubscriptionId,
};
pub use queue::SpeechQueue;
pub use scheduler::{SchedulerSnapshot, SpeechScheduler};
pub use simulated::SimulatedDevice;
pub use types::{PlaybackState, Priority, SpeakOptions, SpeakOutcome, Utterance};
