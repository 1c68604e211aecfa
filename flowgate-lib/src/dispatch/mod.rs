//! Fan-out of independent units of work under a shared gate.
//!
//! A [`ParallelDispatcher`] runs one unit per input item, either a closure
//! over the item's [`Params`] or a fresh [`PipelineInstance`] built from a
//! [`PipelineTemplate`], and collects an index-aligned [`DispatchReport`].

mod dispatcher;
mod params;
mod pipeline;
mod report;

pub use dispatcher::ParallelDispatcher;
pub use params::Params;
pub use pipeline::{PipelineInstance, PipelineTemplate, SharedStore};
pub use report::{DispatchReport, DispatchStats, ItemOutcome};
