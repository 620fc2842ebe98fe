//! Core domain types
//!
//! These types describe one hardware test run from the moment a webhook
//! is accepted until its terminal status is reported. They are shared
//! between the server (which builds requests) and the runner (which
//! consumes them).

pub mod notification;
pub mod pipeline;
pub mod status;
pub mod timing;
