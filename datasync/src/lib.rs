//! DataSync - BI data-source integration and sync pipeline
//!
//! This library provides the registry, mapping rules, connection tests, the
//! cleaning/transformation engine, the sync orchestrator and its REST surface.

pub mod admin;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod entity;
pub mod error;
pub mod logs;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod source_types;
pub mod sql;
pub mod strategy;
pub mod sync;
pub mod tester;

#[cfg(test)]
pub(crate) mod test_support;
