//! Shared data models for the glimpse capture pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Sources (monitored endpoints) and their mutable capture state
//! - Frame and pointer file naming
//! - Segment encoding constants

pub mod encoding;
pub mod error;
pub mod frame;
pub mod source;

pub use error::{ModelError, ModelResult};
pub use frame::{FrameName, PointerKind, FRAME_EXTENSION};
pub use source::{
    normalize_groups, validate_group_name, validate_source_name, Source, SourceUpdate,
    MAX_FREQUENCY_MINUTES,
};
