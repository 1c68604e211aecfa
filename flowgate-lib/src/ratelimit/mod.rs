//! Admission control for calls to rate-limited resources.
//!
//! This module keeps callers under a provider's concurrency and per-interval
//! quotas, either with fixed caps or with a cap that adapts to throttling
//! errors reported by the provider.
//!
//! # Architecture
//!
//! - [`RateLimiter`]: Dual gate of a concurrency cap and a sliding throughput window
//! - [`AdaptiveController`]: Shrinks and grows a limiter's concurrency cap from observed outcomes
//! - [`Classifier`]: Decides which failures count as rate limits
//! - [`LimiterRegistry`]: Named limiters shared between components
//! - [`RateLimitConfig`] and [`AdaptiveConfig`]: Configuration of the above
//! - [`LimiterStats`] and [`AdaptiveStats`]: Statistics snapshots

mod adaptive;
mod classifier;
mod config;
mod limiter;
mod registry;
mod stats;
mod window;

pub use adaptive::{AdaptiveController, Escalated, Transition};
pub use classifier::{Classifier, is_rate_limit_message};
pub use config::{AdaptiveConfig, RateLimitConfig};
pub use limiter::{Permit, RateLimiter};
pub use registry::LimiterRegistry;
pub use stats::{AdaptiveStats, LimiterStats, LimiterStatsMap};
