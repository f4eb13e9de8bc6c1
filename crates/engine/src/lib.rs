//! Worker (§4.5), Task Controller (§4.7), and Engine Registry (§4.8).
//!
//! `TaskController` owns one task's frontier, robots cache, workers, and
//! counters; `EngineRegistry` is the process-wide map from task id to
//! controller that the (out-of-scope) API layer talks to.

mod shared;
mod worker;

pub mod controller;
pub mod registry;

pub use controller::TaskController;
pub use registry::{EngineRegistry, RegistryError};
