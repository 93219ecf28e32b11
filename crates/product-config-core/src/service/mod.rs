//! Configuration controller module facade.
//!
//! Re-exports the controller API and wires the submodules implementing
//! static configuration, mutable state, and the background operation
//! bodies.

pub(crate) mod config;
mod core;
pub(crate) mod engine;
pub(crate) mod state;
#[cfg(test)]
mod tests;

pub use self::core::ProductConfigController;
pub use config::ControllerConfig;
pub use state::{ControllerSnapshot, FetchDispatch};
