use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One row of a CAT pointing catalog table, in target column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointingRow {
    pub name: u64,
    /// Right ascension, degrees (ICRS)
    pub ra: f64,
    /// Declination, degrees (ICRS)
    pub dec: f64,
    /// Reference epoch, Julian years
    pub epoch: f32,
    /// Proper motion in RA * cos(dec), mas/yr
    pub pmra: Option<f32>,
    /// Proper motion in Dec, mas/yr
    pub pmdec: Option<f32>,
    /// Johnson V magnitude
    pub vmag: f32,
    pub g_mag: Option<f32>,
    pub g_bp: Option<f32>,
    pub g_rp: Option<f32>,
}

/// Column-name lookup shared by every record of one source file.
#[derive(Debug)]
pub struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.trim().to_string(), i))
            .collect();
        Self { names, index }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A source catalog row, keyed by the file's header.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub header: Arc<Header>,
    pub fields: Vec<String>,
    /// 1-based line number in the source file, for reject logs
    pub line: u64,
}

impl RawRecord {
    /// The trimmed value of `column`, or `None` when the column is unknown or
    /// the value is one of the missing-value sentinels.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.header.position(column)?;
        let value = self.fields.get(idx)?.trim();
        if is_missing(value) {
            None
        } else {
            Some(value)
        }
    }
}

fn is_missing(value: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value.eq_ignore_ascii_case("nan")
        || value == "--"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> RawRecord {
        let header = Arc::new(Header::new(vec![
            "source_id".to_string(),
            " ra ".to_string(),
            "pmra".to_string(),
        ]));
        RawRecord {
            header,
            fields: fields.iter().map(|s| s.to_string()).collect(),
            line: 2,
        }
    }

    #[test]
    fn test_get_trims_header_and_values() {
        let r = record(&["42", " 10.5 ", "1.0"]);
        assert_eq!(r.get("ra"), Some("10.5"));
        assert_eq!(r.get("source_id"), Some("42"));
        assert_eq!(r.get("dec"), None);
    }

    #[test]
    fn test_missing_sentinels_read_as_absent() {
        for sentinel in ["", "null", "NULL", "NaN", "nan", "--"] {
            let r = record(&["42", "10.5", sentinel]);
            assert_eq!(r.get("pmra"), None, "sentinel {:?}", sentinel);
        }
    }

    #[test]
    fn test_short_row_reads_as_absent() {
        let r = record(&["42"]);
        assert_eq!(r.get("pmra"), None);
    }
}
