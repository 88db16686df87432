//! Tool registration and execution for the Reagent runtime.
//!
//! [`ToolRegistry`] maps unique tool names to descriptors and handlers;
//! [`ToolExecutor`] runs batches of tool-call requests sequentially or
//! through a bounded worker pool, always returning results in request
//! order.

pub mod executor;
pub mod registry;

pub use executor::ToolExecutor;
pub use registry::{Tool, ToolHandler, ToolRegistry};
