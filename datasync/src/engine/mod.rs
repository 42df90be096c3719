//! Cleaning & transformation engine.
//!
//! Pure functions over in-memory records: no I/O, no clock, no randomness.
//! Every function takes its input by reference and returns fresh values, so
//! callers may mutate their input afterwards without affecting the output.

pub mod clean;
pub mod formula;
pub mod transform;

pub use clean::{clean, to_snake_case};
pub use transform::{FieldMapping, TransformKind, Transformation, transform};

/// A single flat record as it moves through the pipeline.
pub type Record = serde_json::Map<String, serde_json::Value>;
