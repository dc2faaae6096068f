//! # Error Handling
//!
//! Error types for the Gantry control plane. Configuration problems surface as
//! [`GantryError`] values that callers record per resource; none of them are
//! fatal to the process.

pub mod types;

pub use types::{GantryError, Result};

/// Shorthand used throughout the crate
pub type Error = GantryError;
