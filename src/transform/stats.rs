use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::RejectReason;
use crate::types::PointingRow;

/// Min/max over accepted rows; `None` until the first value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Span {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Span {
    fn observe(&mut self, v: f64) {
        if v.is_nan() {
            return;
        }
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn merge(&mut self, other: &Span) {
        if let Some(v) = other.min {
            self.observe(v);
        }
        if let Some(v) = other.max {
            self.observe(v);
        }
    }
}

/// Counts and coordinate/magnitude ranges for one conversion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub rows_read: u64,
    pub accepted: u64,
    /// Lines the reader could not split into fields
    pub read_errors: u64,
    pub rejected: BTreeMap<RejectReason, u64>,
    pub ra: Span,
    pub dec: Span,
    pub vmag: Span,
}

impl ConversionStats {
    pub fn record_accepted(&mut self, row: &PointingRow) {
        self.rows_read += 1;
        self.accepted += 1;
        self.ra.observe(row.ra);
        self.dec.observe(row.dec);
        self.vmag.observe(row.vmag as f64);
    }

    pub fn record_rejected(&mut self, reason: RejectReason) {
        self.rows_read += 1;
        *self.rejected.entry(reason).or_insert(0) += 1;
    }

    pub fn record_read_error(&mut self) {
        self.rows_read += 1;
        self.read_errors += 1;
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }

    pub fn merge(&mut self, other: &ConversionStats) {
        self.rows_read += other.rows_read;
        self.accepted += other.accepted;
        self.read_errors += other.read_errors;
        for (reason, n) in &other.rejected {
            *self.rejected.entry(*reason).or_insert(0) += n;
        }
        self.ra.merge(&other.ra);
        self.dec.merge(&other.dec);
        self.vmag.merge(&other.vmag);
    }
}

fn fmt_span(span: &Span, precision: usize) -> String {
    match (span.min, span.max) {
        (Some(lo), Some(hi)) => format!("{lo:.precision$} - {hi:.precision$}"),
        _ => "n/a".to_string(),
    }
}

impl fmt::Display for ConversionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   Rows read: {}", self.rows_read)?;
        writeln!(f, "   Accepted: {}", self.accepted)?;
        if self.read_errors > 0 {
            writeln!(f, "   Unreadable lines: {}", self.read_errors)?;
        }
        writeln!(f, "   Rejected: {}", self.total_rejected())?;
        for (reason, n) in &self.rejected {
            writeln!(f, "     {reason}: {n}")?;
        }
        writeln!(f, "   R.A. range: {}", fmt_span(&self.ra, 4))?;
        writeln!(f, "   Dec. range: {}", fmt_span(&self.dec, 4))?;
        write!(f, "   Vmag range: {}", fmt_span(&self.vmag, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ra: f64, dec: f64, vmag: f32) -> PointingRow {
        PointingRow {
            name: 1,
            ra,
            dec,
            epoch: 2016.0,
            pmra: None,
            pmdec: None,
            vmag,
            g_mag: None,
            g_bp: None,
            g_rp: None,
        }
    }

    #[test]
    fn test_ranges_track_accepted_rows_only() {
        let mut stats = ConversionStats::default();
        stats.record_accepted(&row(10.0, -5.0, 12.0));
        stats.record_accepted(&row(350.0, 60.0, 9.5));
        stats.record_rejected(RejectReason::TooFaint);
        stats.record_rejected(RejectReason::TooFaint);
        stats.record_rejected(RejectReason::Malformed);
        stats.record_read_error();

        assert_eq!(stats.rows_read, 6);
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.total_rejected(), 3);
        assert_eq!(stats.rejected[&RejectReason::TooFaint], 2);
        assert_eq!(stats.ra, Span { min: Some(10.0), max: Some(350.0) });
        assert_eq!(stats.vmag, Span { min: Some(9.5), max: Some(12.0) });
    }

    #[test]
    fn test_merge_combines_counts_and_ranges() {
        let mut a = ConversionStats::default();
        a.record_accepted(&row(10.0, 0.0, 10.0));
        a.record_rejected(RejectReason::DuplicateName);
        let mut b = ConversionStats::default();
        b.record_accepted(&row(5.0, 20.0, 11.0));
        b.record_rejected(RejectReason::DuplicateName);

        a.merge(&b);
        assert_eq!(a.rows_read, 4);
        assert_eq!(a.rejected[&RejectReason::DuplicateName], 2);
        assert_eq!(a.ra, Span { min: Some(5.0), max: Some(10.0) });
        assert_eq!(a.dec, Span { min: Some(0.0), max: Some(20.0) });
    }

    #[test]
    fn test_display_without_rows() {
        let text = ConversionStats::default().to_string();
        assert!(text.contains("R.A. range: n/a"));
    }
}
