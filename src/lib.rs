#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Event Loop Core
//!
//! Event-triggered rule dispatch feeding a durable, priority-ordered work
//! queue.
//!
//! ## Overview
//!
//! External producers publish events. The dispatcher matches each event
//! against the registered routing rules, gates every candidate on the current
//! operating context (mode and severity) and on the rule's cooldown, and
//! enqueues one entry per firing rule. Independent workers claim pending
//! entries without blocking one another, execute the target action outside
//! the core, and report back; failures are retried up to each entry's budget
//! and then kept as terminal `FAILED` records for monitors.
//!
//! ## Key Features
//!
//! - **Fan-out routing**: one event may fire any number of rules
//! - **Atomic cooldowns**: a rule never fires twice inside its cooldown, even
//!   under concurrent dispatch
//! - **Skip-locked claiming**: no entry is ever delivered to two workers
//! - **Bounded retries**: `retry_count` never exceeds `max_retries`
//! - **Append-only audit**: every status change is recorded as a transition
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Dispatcher, claimer, completion handler, watchdog and
//!   the [`EventLoop`](orchestration::EventLoop) facade
//! - [`registry`] - Rule registration and lookup
//! - [`store`] - Storage traits with in-memory and PostgreSQL backends
//! - [`state_machine`] - Queue entry states and transitions
//! - [`models`] - Events, rules, queue entries and transitions
//! - [`context`] - Operating context injection
//! - [`events`] - Lifecycle notifications
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use event_loop_core::config::ConfigManager;
//! use event_loop_core::context::StaticContextProvider;
//! use event_loop_core::orchestration::EventLoop;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! event_loop_core::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let context = Arc::new(StaticContextProvider::new("BULL", 1));
//! let event_loop = EventLoop::connect(manager.config().clone(), context).await?;
//!
//! let event_id = event_loop
//!     .publish("regime_shift", Some("classifier"), None, serde_json::json!({}))
//!     .await?;
//! let report = event_loop.dispatch(event_id).await?;
//! println!("enqueued {} entries", report.enqueued_count());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod context;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigManager, EventLoopConfig};
pub use context::{ContextProvider, OperatingContext, StaticContextProvider};
pub use error::{EventLoopError, Result};
pub use events::{EventPublisher, LifecycleEvent};
pub use models::{Event, NewEvent, NewRule, QueueEntry, QueueTransition, Rule};
pub use orchestration::{CompletionOutcome, DispatchReport, EventLoop};
pub use registry::RuleRegistry;
pub use state_machine::QueueStatus;
pub use store::{EventLoopStore, InMemoryStore};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
