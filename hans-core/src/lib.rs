//! Hans Core
//!
//! Core types for the hans hardware-in-the-loop CI service.
//!
//! This crate contains:
//! - Domain types: pipeline requests, commit status reports, timings, notifications
//! - DTOs: the subset of source-control webhook payloads the service consumes

pub mod domain;
pub mod dto;
