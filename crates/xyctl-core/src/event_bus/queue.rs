//! Event queue implementation.
//!
//! An append-only queue drained by the presentation layer, plus a broadcast
//! channel for live subscribers. The queue has its own lock, independent of
//! the transport mutex.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::broadcast;

use super::events::Event;

/// Configuration for the event queue
#[derive(Debug, Clone)]
pub struct EventQueueConfig {
    /// Maximum number of undrained events kept; oldest are dropped first.
    pub max_pending: usize,
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            max_pending: 1000,
            channel_capacity: 256,
        }
    }
}

/// Bounded event queue with broadcast fan-out
pub struct EventQueue {
    pending: Mutex<VecDeque<Event>>,
    sender: broadcast::Sender<Event>,
    config: EventQueueConfig,
}

impl EventQueue {
    /// Create a new queue with default configuration
    pub fn new() -> Self {
        Self::with_config(EventQueueConfig::default())
    }

    /// Create a new queue with custom configuration
    pub fn with_config(config: EventQueueConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            pending: Mutex::new(VecDeque::new()),
            sender,
            config,
        }
    }

    /// Append an event
    pub fn push(&self, event: Event) {
        tracing::debug!("Event {}", event.description());
        {
            let mut pending = self.pending.lock();
            pending.push_back(event.clone());
            while pending.len() > self.config.max_pending {
                pending.pop_front();
            }
        }
        // No live subscribers is the common case
        let _ = self.sender.send(event);
    }

    /// Take every pending event, oldest first
    pub fn drain(&self) -> Vec<Event> {
        self.pending.lock().drain(..).collect()
    }

    /// Number of undrained events
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no events are pending
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Get a receiver for live events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
