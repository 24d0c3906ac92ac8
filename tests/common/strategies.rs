//! Proptest strategies for gate and retry properties

use proptest::prelude::*;

pub const MODES: [&str; 3] = ["BULL", "BEAR", "SIDEWAYS"];

pub fn mode_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(MODES.to_vec()).prop_map(str::to_string)
}

pub fn severity_strategy() -> impl Strategy<Value = i32> {
    0..10i32
}

/// `None` for "any mode", otherwise a non-empty subset of [`MODES`]
pub fn allowed_modes_strategy() -> impl Strategy<Value = Option<Vec<String>>> {
    prop::option::of(
        prop::sample::subsequence(MODES.to_vec(), 1..=MODES.len())
            .prop_map(|modes| modes.into_iter().map(str::to_string).collect()),
    )
}

pub fn cooldown_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![Just(0i64), 1..600i64]
}

pub fn retry_budget_strategy() -> impl Strategy<Value = i32> {
    0..6i32
}

/// Seconds between consecutive events
pub fn event_gaps_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0..120i64, 1..25)
}
