//! # Rule Registry
//!
//! Registration, lookup and firing bookkeeping for routing rules.

pub mod rule_registry;

pub use rule_registry::RuleRegistry;
