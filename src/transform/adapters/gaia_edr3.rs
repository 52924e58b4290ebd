use super::{optional_f32, parse_value, required, source_name};
use crate::constants::GAIA_EDR3_ADAPTER;
use crate::transform::photometry::gaia_edr3_vmag;
use crate::transform::{CatalogAdapter, Candidate, Rejection};
use crate::types::{PointingRow, RawRecord};

const SOURCE_ID: &str = "source_id";
const RA: &str = "ra";
const DEC: &str = "dec";
const REF_EPOCH: &str = "ref_epoch";
const PMRA: &str = "pmra";
const PMDEC: &str = "pmdec";
const G_MAG: &str = "phot_g_mean_mag";
const BP_MAG: &str = "phot_bp_mean_mag";
const RP_MAG: &str = "phot_rp_mean_mag";
const BP_RP: &str = "bp_rp";

/// Gaia EDR3 `gaia_source` CSV files.
///
/// Only the handful of columns CAT needs are kept; V is derived from G and
/// BP-RP. A source without photometry gets a NaN V and is culled by the gate.
#[derive(Debug, Default)]
pub struct GaiaEdr3Adapter {
    default_epoch: Option<f32>,
}

impl GaiaEdr3Adapter {
    pub fn new(default_epoch: Option<f32>) -> Self {
        Self { default_epoch }
    }
}

impl CatalogAdapter for GaiaEdr3Adapter {
    fn name(&self) -> &'static str {
        GAIA_EDR3_ADAPTER
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![SOURCE_ID, RA, DEC, PMRA, PMDEC, G_MAG, BP_MAG, RP_MAG, BP_RP];
        if self.default_epoch.is_none() {
            cols.push(REF_EPOCH);
        }
        cols.into_iter().map(String::from).collect()
    }

    fn transform(&self, record: &RawRecord) -> Result<Candidate, Rejection> {
        let name = source_name(record, SOURCE_ID)?;
        let ra: f64 = required(record, RA)?;
        let dec: f64 = required(record, DEC)?;
        let epoch = match (optional_f32(record, REF_EPOCH)?, self.default_epoch) {
            (Some(e), _) | (None, Some(e)) => e,
            (None, None) => required::<f32>(record, REF_EPOCH)?,
        };

        let g: Option<f64> = parse_value(record, G_MAG)?;
        let bp_rp: Option<f64> = parse_value(record, BP_RP)?;
        let vmag = match (g, bp_rp) {
            (Some(g), Some(c)) => gaia_edr3_vmag(g, c),
            _ => f64::NAN,
        };

        let row = PointingRow {
            name,
            ra,
            dec,
            epoch,
            pmra: optional_f32(record, PMRA)?,
            pmdec: optional_f32(record, PMDEC)?,
            vmag: f32::NAN,
            g_mag: g.map(|v| v as f32),
            g_bp: optional_f32(record, BP_MAG)?,
            g_rp: optional_f32(record, RP_MAG)?,
        };
        Ok(Candidate::new(row, vmag))
    }
}
