//! Hans Runner
//!
//! Drives hardware-in-the-loop test runs on a single attached board.
//!
//! Architecture:
//! - Configuration: YAML settings file with environment overrides
//! - Command: external process execution with streamed output
//! - Lock: board ownership through an on-disk marker file
//! - Workspace: per-commit directories for clone, merge and build
//! - Pipeline: the coordinator that sequences one run end to end
//! - Services: commit statuses and result notifications
//! - Scheduler: detached launch of accepted requests
//!
//! Runs are serialized on the board lock. Every run publishes exactly one
//! terminal commit status and leaves neither its workspace nor the lock
//! behind.

pub mod command;
pub mod config;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod workspace;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use command::{CommandRunner, ExternalCommand, ProcessRunner};
pub use config::Config;
pub use lock::BoardLock;
pub use pipeline::{Coordinator, PipelineOutcome};
pub use scheduler::PipelineLauncher;
