//! # Orchestration
//!
//! The moving parts between a published event and a finished unit of work.
//!
//! ## Core Components
//!
//! - **rule_matcher**: pure filter and gate pipeline deciding which rules fire
//! - **Dispatcher**: turns one event into zero or more pending queue entries
//! - **WorkClaimer**: non-blocking, exclusive claiming of pending entries
//! - **CompletionHandler**: records outcomes and applies bounded retries
//! - **QueueWatchdog**: recovers claims abandoned by crashed workers
//! - **EventLoop**: facade wiring all of the above over one store

pub mod completion_handler;
pub mod dispatcher;
pub mod event_loop;
pub mod queue_watchdog;
pub mod rule_matcher;
pub mod work_claimer;

pub use completion_handler::{CompletionHandler, CompletionOutcome};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use event_loop::{EventLoop, EventLoopBuilder};
pub use queue_watchdog::{QueueWatchdog, WatchdogReport};
pub use rule_matcher::{evaluate_rule, select_rules, GateRejection, RuleRejection, RuleSelection};
pub use work_claimer::WorkClaimer;
