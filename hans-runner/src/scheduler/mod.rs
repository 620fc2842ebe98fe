//! Scheduler layer for the runner
//!
//! Accepted requests are launched as detached tasks so webhook handlers
//! can answer immediately. Runs then queue on the board lock inside the
//! coordinator.

pub mod launcher;

pub use launcher::PipelineLauncher;
