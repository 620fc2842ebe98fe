//! Data Transfer Objects for inbound webhooks
//!
//! DTOs mirror the JSON the source-control platform sends. Only the
//! fields the service actually reads are modelled; everything else in a
//! delivery is ignored by serde.

pub mod webhook;
