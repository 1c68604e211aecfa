//! `flowgate` keeps fan-out calls to rate-limited APIs under the provider's
//! concurrency and per-interval quotas.
//!
//! Run a batch of prompts with at most 5 requests in flight and 60 per minute:
//!
//! ```
//! use flowgate_lib::dispatch::{ParallelDispatcher, Params};
//! use flowgate_lib::ratelimit::RateLimitConfig;
//!
//! #[tokio::main]
//! async fn main() -> flowgate_lib::Result<()> {
//!     let dispatcher = ParallelDispatcher::<String>::fixed(RateLimitConfig::per_minute(5, 60))?;
//!     let prompts = ["first", "second"].map(|prompt| Params::new().with("prompt", prompt));
//!
//!     let report = dispatcher
//!         .dispatch(&Params::new(), prompts, |params| async move {
//!             // call the provider here
//!             Ok(params.get_str("prompt").unwrap_or_default().len())
//!         })
//!         .await;
//!     assert!(report.is_success());
//!     Ok(())
//! }
//! ```
//!
//! When the provider's limits are not known up front, let an
//! [`AdaptiveController`](ratelimit::AdaptiveController) find them: use
//! [`ParallelDispatcher::adaptive`](dispatch::ParallelDispatcher::adaptive)
//! and it backs off on throttling errors and recovers after sustained success.
//!
//! Components that hit the same provider share one quota through a
//! [`LimiterRegistry`](ratelimit::LimiterRegistry).

mod types;

pub mod dispatch;
pub mod ratelimit;

pub use types::*;
