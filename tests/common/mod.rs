#![allow(dead_code)]

pub mod builders;
pub mod failing_store;
pub mod harness;
pub mod strategies;

pub use builders::*;
pub use failing_store::*;
pub use harness::*;
pub use strategies::*;
