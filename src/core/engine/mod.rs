//! Planning and execution.
//!
//! - `graph` - "must complete before" edges derived from the component tree
//! - `scheduler` - Kahn layering into parallel batches, cycle reporting
//! - `pipeline` - Batch runner with a bounded worker pool and fail-fast cancellation
//! - `executor` - Default executor that shells out to docker, terraform and kubectl

pub mod executor;
pub mod graph;
pub mod pipeline;
pub mod scheduler;
