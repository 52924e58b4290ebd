//! Mapping source rows onto the CAT pointing schema and deciding which rows
//! are fit to load.

pub mod adapters;
pub mod photometry;
pub mod quality_gate;
pub mod registry;
pub mod stats;

use crate::types::{PointingRow, RawRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use quality_gate::{Decision, QualityGate};
pub use registry::AdapterRegistry;
pub use stats::ConversionStats;

/// Why a row was not staged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Line could not be split into the header's columns
    Malformed,
    /// A required value is absent
    MissingData,
    /// A value does not parse as the expected type
    InvalidFormat,
    /// A coordinate or proper motion is outside its physical range
    OutOfRange,
    /// No V magnitude, or fainter than the catalog's limit
    TooFaint,
    /// At or south of the catalog's declination limit
    BelowDeclinationLimit,
    /// The same name was already accepted from this file
    DuplicateName,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::MissingData => "missing_data",
            RejectReason::InvalidFormat => "invalid_format",
            RejectReason::OutOfRange => "out_of_range",
            RejectReason::TooFaint => "too_faint",
            RejectReason::BelowDeclinationLimit => "below_declination_limit",
            RejectReason::DuplicateName => "duplicate_name",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectReason,
    /// Column or target field that triggered the rejection
    pub field: Option<String>,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, field: &str, message: impl Into<String>) -> Self {
        Self {
            reason,
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

/// A mapped row and the V magnitude it is judged on.
///
/// `row.vmag` is stored single precision; the magnitude cut is applied to
/// the unrounded value.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub row: PointingRow,
    pub vmag: f64,
}

impl Candidate {
    pub fn new(mut row: PointingRow, vmag: f64) -> Self {
        row.vmag = vmag as f32;
        Self { row, vmag }
    }
}

/// Per-catalog knowledge: which source columns exist and how they map onto
/// a [`PointingRow`].
pub trait CatalogAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Columns that must be present in a source file's header
    fn required_columns(&self) -> Vec<String>;

    /// Map one source row. Unit and photometric conversions happen here;
    /// range checks and cuts belong to the [`QualityGate`].
    fn transform(&self, record: &RawRecord) -> Result<Candidate, Rejection>;
}
