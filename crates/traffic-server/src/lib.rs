//! Shared library surface for the traffic server and its tests.

pub mod config;
pub mod loops;
pub mod pipeline;
pub mod sim;
pub mod state;
