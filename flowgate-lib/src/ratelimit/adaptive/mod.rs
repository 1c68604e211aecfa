//! Self-tuning concurrency.
//!
//! [`AdaptiveController`] shrinks its concurrency cap when units of work are
//! throttled and grows it back after sustained success.

mod controller;
mod state;

pub use controller::{AdaptiveController, Escalated};
pub use state::Transition;
