//! Catalog ingestion for the CAT pointing-catalog database.
//!
//! Remote archive → reader → adapter + quality gate → staged file → loader.

pub mod config;
pub mod constants;
pub mod convert;
pub mod error;
pub mod loader;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod pipeline;
pub mod reader;
pub mod rejects_log;
pub mod remote;
pub mod transform;
pub mod types;

pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, PipelineResult, RunOptions};
