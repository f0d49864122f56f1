//! versecut-common - Shared types for the versecut pipeline
//!
//! Provides the event vocabulary and event bus used by the processing
//! pipeline, the runners, the HTTP surface, and the CLI.

pub mod error;
pub mod events;

pub use error::{Error, Result};
