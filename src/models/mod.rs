//! Core data models for the bucket-watch trigger.
//!
//! Listing inputs, detected objects, post-detection actions and the
//! executions emitted for a non-empty poll. All of them are plain values
//! rebuilt on every cycle.

pub mod action;
pub mod execution;
pub mod listing;
pub mod object;
