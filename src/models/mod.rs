//! # Data Models
//!
//! Records shared by the dispatcher, the rule registry and the work queue.
//! Every record derives `FromRow` where a PostgreSQL row maps onto it
//! directly; queue entries go through an intermediate row type because their
//! status is stored as text.

pub mod event;
pub mod queue_entry;
pub mod queue_transition;
pub mod rule;

pub use event::{Event, NewEvent};
pub use queue_entry::{ContextSnapshot, NewQueueEntry, QueueEntry, StatusCounts};
pub use queue_transition::{NewQueueTransition, QueueTransition};
pub use rule::{NewRule, PriorityBounds, Rule};
