//! Background loops for continuous processing.

pub mod monitor_loop;
pub mod simulation_loop;
