use std::collections::HashSet;

use super::{Candidate, RejectReason, Rejection};
use crate::config::Cuts;
use crate::types::PointingRow;

/// Quality gate decision for a row
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Row meets the catalog's requirements and is staged
    Accept,
    /// Row is logged to the reject log and dropped
    Reject(Rejection),
}

/// Range checks and the catalog's sky/magnitude cuts.
///
/// One gate is used per source file: it remembers accepted names so a name
/// appearing twice in a file is staged once.
pub struct QualityGate {
    cuts: Cuts,
    seen: HashSet<u64>,
}

impl QualityGate {
    pub fn new(cuts: Cuts) -> Self {
        Self {
            cuts,
            seen: HashSet::new(),
        }
    }

    pub fn cuts(&self) -> &Cuts {
        &self.cuts
    }

    pub fn assess(&mut self, candidate: &Candidate) -> Decision {
        match self.check(&candidate.row, candidate.vmag) {
            Ok(()) => {
                self.seen.insert(candidate.row.name);
                Decision::Accept
            }
            Err(rejection) => Decision::Reject(rejection),
        }
    }

    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    fn check(&self, row: &PointingRow, vmag: f64) -> Result<(), Rejection> {
        if !row.ra.is_finite() || !(0.0..360.0).contains(&row.ra) {
            return Err(Rejection::new(
                RejectReason::OutOfRange,
                "ra",
                format!("ra {} outside [0, 360)", row.ra),
            ));
        }
        if !row.dec.is_finite() || !(-90.0..=90.0).contains(&row.dec) {
            return Err(Rejection::new(
                RejectReason::OutOfRange,
                "dec",
                format!("dec {} outside [-90, 90]", row.dec),
            ));
        }
        for (field, value) in [("pmra", row.pmra), ("pmdec", row.pmdec)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(Rejection::new(
                        RejectReason::OutOfRange,
                        field,
                        format!("{field} is not finite"),
                    ));
                }
            }
        }

        // NaN fails this comparison, so rows without a V magnitude are culled too
        if !(vmag <= self.cuts.max_vmag) {
            return Err(Rejection::new(
                RejectReason::TooFaint,
                "vmag",
                format!("vmag {} fainter than {}", vmag, self.cuts.max_vmag),
            ));
        }
        if !(row.dec > self.cuts.min_dec) {
            return Err(Rejection::new(
                RejectReason::BelowDeclinationLimit,
                "dec",
                format!("dec {} not above {}", row.dec, self.cuts.min_dec),
            ));
        }
        if self.seen.contains(&row.name) {
            return Err(Rejection::new(
                RejectReason::DuplicateName,
                "name",
                format!("name {} already staged from this file", row.name),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: u64, dec: f64, vmag: f64) -> Candidate {
        let row = PointingRow {
            name,
            ra: 120.0,
            dec,
            epoch: 2016.0,
            pmra: Some(1.0),
            pmdec: Some(-2.0),
            vmag: f32::NAN,
            g_mag: None,
            g_bp: None,
            g_rp: None,
        };
        Candidate::new(row, vmag)
    }

    fn reason(decision: Decision) -> Option<RejectReason> {
        match decision {
            Decision::Accept => None,
            Decision::Reject(r) => Some(r.reason),
        }
    }

    #[test]
    fn test_magnitude_limit_is_inclusive() {
        let mut gate = QualityGate::new(Cuts::default());
        assert_eq!(gate.assess(&row(1, 10.0, 18.0)), Decision::Accept);
        assert_eq!(reason(gate.assess(&row(2, 10.0, 18.01))), Some(RejectReason::TooFaint));
        assert_eq!(reason(gate.assess(&row(3, 10.0, f64::NAN))), Some(RejectReason::TooFaint));
    }

    #[test]
    fn test_declination_limit_is_strict() {
        let mut gate = QualityGate::new(Cuts::default());
        assert_eq!(
            reason(gate.assess(&row(1, -40.0, 10.0))),
            Some(RejectReason::BelowDeclinationLimit)
        );
        assert_eq!(gate.assess(&row(2, -39.999, 10.0)), Decision::Accept);
    }

    #[test]
    fn test_coordinate_ranges() {
        let mut gate = QualityGate::new(Cuts::default());
        let mut r = row(1, 10.0, 10.0);
        r.row.ra = 360.0;
        assert_eq!(reason(gate.assess(&r)), Some(RejectReason::OutOfRange));
        r.row.ra = -0.1;
        assert_eq!(reason(gate.assess(&r)), Some(RejectReason::OutOfRange));
        r.row.ra = 0.0;
        r.row.dec = 90.5;
        assert_eq!(reason(gate.assess(&r)), Some(RejectReason::OutOfRange));
        r.row.dec = f64::NAN;
        assert_eq!(reason(gate.assess(&r)), Some(RejectReason::OutOfRange));
        r.row.dec = 10.0;
        r.row.pmdec = Some(f32::INFINITY);
        assert_eq!(reason(gate.assess(&r)), Some(RejectReason::OutOfRange));
    }

    #[test]
    fn test_duplicates_within_a_file() {
        let mut gate = QualityGate::new(Cuts::default());
        assert_eq!(gate.assess(&row(7, 10.0, 10.0)), Decision::Accept);
        assert_eq!(reason(gate.assess(&row(7, 11.0, 11.0))), Some(RejectReason::DuplicateName));
    }

    #[test]
    fn test_rejected_names_are_not_remembered() {
        let mut gate = QualityGate::new(Cuts::default());
        assert!(reason(gate.assess(&row(7, -80.0, 10.0))).is_some());
        assert_eq!(gate.assess(&row(7, 10.0, 10.0)), Decision::Accept);
    }

    #[test]
    fn test_custom_cuts() {
        let mut gate = QualityGate::new(Cuts { max_vmag: 6.5, min_dec: -90.0 });
        assert_eq!(gate.assess(&row(1, -89.0, 6.0)), Decision::Accept);
        assert_eq!(reason(gate.assess(&row(2, 10.0, 7.0))), Some(RejectReason::TooFaint));
    }

    #[test]
    fn test_magnitude_cut_uses_unrounded_value() {
        let mut gate = QualityGate::new(Cuts::default());
        let just_fainter = row(1, 10.0, 18.000_000_4);
        assert_eq!(just_fainter.row.vmag, 18.0);
        assert_eq!(reason(gate.assess(&just_fainter)), Some(RejectReason::TooFaint));
    }
}
