//! # Lifecycle Notifications
//!
//! Fire-and-forget broadcast of queue and rule lifecycle changes for external
//! monitors. Publishing never fails because nobody is listening.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishedEvent};
pub use types::LifecycleEvent;
