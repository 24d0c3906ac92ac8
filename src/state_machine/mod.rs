//! # Queue Entry State Machine
//!
//! Pure transition rules for queue entries. Storage backends apply these
//! transitions under their own atomicity guarantees; nothing here touches
//! shared state.

pub mod errors;
pub mod events;
pub mod queue_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::QueueEvent;
pub use queue_state_machine::{FailureResolution, QueueStateMachine};
pub use states::QueueStatus;
