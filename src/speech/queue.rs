//! Pending utterances ordered by priority.

use super::types::{Priority, Utterance};
use crate::{Result, SchedulerError};
use std::collections::VecDeque;
use uuid::Uuid;

/// Priority queue of utterances waiting for the device.
///
/// Always sorted by priority, most urgent first; equal priorities keep
/// their insertion order.
#[derive(Debug, Default)]
pub struct SpeechQueue {
    items: VecDeque<Utterance>,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an utterance behind everything of equal or higher urgency
    pub fn enqueue(&mut self, text: impl Into<String>, priority: Priority) -> Result<Uuid> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SchedulerError::InvalidInput(
                "cannot queue blank text".to_string(),
            ));
        }

        let utterance = Utterance::new(text, priority);
        let id = utterance.id;

        let pos = self
            .items
            .iter()
            .position(|u| u.priority > priority)
            .unwrap_or(self.items.len());
        self.items.insert(pos, utterance);

        Ok(id)
    }

    /// Remove the most urgent, earliest queued utterance
    pub fn dequeue_highest(&mut self) -> Option<Utterance> {
        self.items.pop_front()
    }

    /// Drop everything; returns how many utterances were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut SpeechQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.dequeue_highest())
            .map(|u| u.text)
            .collect()
    }

    #[test]
    fn test_dequeue_by_priority() {
        let mut queue = SpeechQueue::new();
        queue.enqueue("low", Priority::Low).unwrap();
        queue.enqueue("normal", Priority::Normal).unwrap();
        queue.enqueue("interrupt", Priority::Interrupt).unwrap();
        queue.enqueue("high", Priority::High).unwrap();

        assert_eq!(drain(&mut queue), vec!["interrupt", "high", "normal", "low"]);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = SpeechQueue::new();
        queue.enqueue("n1", Priority::Normal).unwrap();
        queue.enqueue("h1", Priority::High).unwrap();
        queue.enqueue("n2", Priority::Normal).unwrap();
        queue.enqueue("l1", Priority::Low).unwrap();
        queue.enqueue("h2", Priority::High).unwrap();
        queue.enqueue("n3", Priority::Normal).unwrap();

        assert_eq!(drain(&mut queue), vec!["h1", "h2", "n1", "n2", "n3", "l1"]);
    }

    #[test]
    fn test_dequeue_order_is_non_decreasing() {
        let priorities = [
            Priority::Low,
            Priority::High,
            Priority::Normal,
            Priority::Interrupt,
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Interrupt,
        ];

        let mut queue = SpeechQueue::new();
        for (i, p) in priorities.iter().enumerate() {
            queue.enqueue(format!("{}-{}", p, i), *p).unwrap();
        }

        let mut seen: Vec<(Priority, usize)> = Vec::new();
        while let Some(u) = queue.dequeue_highest() {
            let index: usize = u.text.rsplit('-').next().unwrap().parse().unwrap();
            seen.push((u.priority, index));
        }

        assert_eq!(seen.len(), priorities.len());
        for pair in seen.windows(2) {
            assert!(pair[0].0 <= pair[1].0);
            if pair[0].0 == pair[1].0 {
                assert!(pair[0].1 < pair[1].1);
            }
        }
    }

    #[test]
    fn test_clear_then_dequeue_is_empty() {
        let mut queue = SpeechQueue::new();
        queue.enqueue("a", Priority::High).unwrap();
        queue.enqueue("b", Priority::Low).unwrap();

        assert_eq!(queue.clear(), 2);
        assert!(queue.dequeue_highest().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_blank_text_rejected() {
        let mut queue = SpeechQueue::new();
        let err = queue.enqueue("   \n", Priority::Normal).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInput(_)));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_enqueue_returns_utterance_id() {
        let mut queue = SpeechQueue::new();
        let id = queue.enqueue("first", Priority::Normal).unwrap();
        queue.enqueue("second", Priority::Normal).unwrap();

        assert_eq!(queue.dequeue_highest().map(|u| u.id), Some(id));
        assert_eq!(queue.len(), 1);
    }
}
