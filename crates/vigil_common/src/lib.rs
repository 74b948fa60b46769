//! Shared foundational types used across the Vigil result cache.
//!
//! This crate provides the content digest used for staleness detection and
//! human-friendly byte sizes used by the configuration layer.

#![warn(missing_docs)]

pub mod hash;
pub mod size;

pub use hash::{ContentHash, ParseHashError};
pub use size::{ByteSize, ParseByteSizeError};
