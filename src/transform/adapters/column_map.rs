use super::{optional_f32, parse_value, required, source_name};
use crate::config::ColumnMapConfig;
use crate::constants::COLUMN_MAP_ADAPTER;
use crate::transform::{CatalogAdapter, Candidate, RejectReason, Rejection};
use crate::types::{PointingRow, RawRecord};

/// Catalogs whose columns map one-to-one onto the CAT schema, described
/// entirely in configuration. The configured magnitude column is taken as V.
#[derive(Debug)]
pub struct ColumnMapAdapter {
    columns: ColumnMapConfig,
    default_epoch: Option<f32>,
}

impl ColumnMapAdapter {
    pub fn new(columns: ColumnMapConfig, default_epoch: Option<f32>) -> Self {
        Self {
            columns,
            default_epoch,
        }
    }
}

impl CatalogAdapter for ColumnMapAdapter {
    fn name(&self) -> &'static str {
        COLUMN_MAP_ADAPTER
    }

    fn required_columns(&self) -> Vec<String> {
        let c = &self.columns;
        [Some(&c.name), Some(&c.ra), Some(&c.dec), Some(&c.mag), c.epoch.as_ref(), c.pmra.as_ref(), c.pmdec.as_ref()]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    fn transform(&self, record: &RawRecord) -> Result<Candidate, Rejection> {
        let c = &self.columns;
        let epoch = match (&c.epoch, self.default_epoch) {
            (Some(col), fallback) => match (optional_f32(record, col)?, fallback) {
                (Some(e), _) | (None, Some(e)) => e,
                (None, None) => required::<f32>(record, col)?,
            },
            (None, Some(e)) => e,
            (None, None) => {
                return Err(Rejection {
                    reason: RejectReason::MissingData,
                    field: Some("epoch".to_string()),
                    message: "no epoch column and no default_epoch configured".to_string(),
                })
            }
        };
        let pmra = match &c.pmra {
            Some(col) => optional_f32(record, col)?,
            None => None,
        };
        let pmdec = match &c.pmdec {
            Some(col) => optional_f32(record, col)?,
            None => None,
        };
        let vmag = parse_value::<f64>(record, &c.mag)?.unwrap_or(f64::NAN);

        let row = PointingRow {
            name: source_name(record, &c.name)?,
            ra: required(record, &c.ra)?,
            dec: required(record, &c.dec)?,
            epoch,
            pmra,
            pmdec,
            vmag: f32::NAN,
            g_mag: None,
            g_bp: None,
            g_rp: None,
        };
        Ok(Candidate::new(row, vmag))
    }
}
