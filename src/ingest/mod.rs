//! Raw action event ingestion
//!
//! This module defines the loosely typed input schema for user action events
//! and turns batches of raw JSON or NDJSON into validated events that can be
//! appended to the action log.

mod adapter;
mod raw_event;

pub use adapter::*;
pub use raw_event::*;
