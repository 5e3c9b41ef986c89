use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

/// Urgency of an utterance.
///
/// Variants are declared most urgent first, so the derived `Ord` sorts
/// `Interrupt` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Flushes everything pending and preempts current speech
    Interrupt,
    High,
    Normal,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Interrupt => "interrupt",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Priority::Interrupt)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interrupt" => Ok(Priority::Interrupt),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// A pending unit of speech
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: Uuid,
    pub text: String,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

impl Utterance {
    pub fn new(text: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            priority,
            enqueued_at: Instant::now(),
        }
    }
}

/// Per-call options for `SpeechScheduler::speak`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakOptions {
    /// Falls back to the scheduler's default priority when unset
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl SpeakOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
        }
    }
}

impl From<Priority> for SpeakOptions {
    fn from(priority: Priority) -> Self {
        Self::with_priority(priority)
    }
}

/// What a `speak` call ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Text was blank; nothing happened
    Skipped,
    /// Text was sent to the device
    Dispatched,
    /// Text was deferred into the pending queue
    Queued,
    /// The request was still waiting for readiness when `stop()` dropped it
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Uninitialized,
    Idle,
    Speaking,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Uninitialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Interrupt < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("interrupt".parse::<Priority>(), Ok(Priority::Interrupt));
        assert_eq!(" HIGH ".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_serde() {
        let json = serde_json::to_string(&Priority::Interrupt).unwrap();
        assert_eq!(json, "\"interrupt\"");

        let options: SpeakOptions = serde_json::from_str(r#"{"priority":"low"}"#).unwrap();
        assert_eq!(options.priority, Some(Priority::Low));

        let options: SpeakOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.priority, None);
    }

    #[test]
    fn test_utterance_ids_unique() {
        let a = Utterance::new("one", Priority::Low);
        let b = Utterance::new("one", Priority::Low);
        assert_ne!(a.id, b.id);
    }
}
