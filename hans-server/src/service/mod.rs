//! Service Module
//!
//! Webhook handling between the HTTP layer and the runner.

pub mod dispatch;

pub use dispatch::{Dispatch, EventDispatcher, EventKind};
