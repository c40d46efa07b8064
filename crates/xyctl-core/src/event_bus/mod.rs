//! # Event Queue Module
//!
//! Controller events (limit violations, alarms, connection changes, stream
//! progress) are appended here by the controller and drained by the caller.
//!
//! ```rust,ignore
//! use xyctl_core::event_bus::{Event, EventKind, EventQueue};
//!
//! let queue = EventQueue::new();
//! queue.push(Event::new(EventKind::LimitViolation).with("detail", "X=21 outside [-20, 20]"));
//!
//! for event in queue.drain() {
//!     println!("{}", event.description());
//! }
//! ```

mod events;
mod queue;

pub use events::*;
pub use queue::*;
