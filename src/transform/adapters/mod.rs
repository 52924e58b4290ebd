mod column_map;
mod gaia_edr3;

pub use column_map::ColumnMapAdapter;
pub use gaia_edr3::GaiaEdr3Adapter;

use super::{RejectReason, Rejection};
use crate::types::RawRecord;
use std::str::FromStr;

fn parse_value<T: FromStr>(record: &RawRecord, column: &str) -> Result<Option<T>, Rejection> {
    match record.get(column) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            Rejection::new(
                RejectReason::InvalidFormat,
                column,
                format!("cannot parse '{raw}' in column {column}"),
            )
        }),
    }
}

pub(crate) fn required<T: FromStr>(record: &RawRecord, column: &str) -> Result<T, Rejection> {
    parse_value(record, column)?.ok_or_else(|| {
        Rejection::new(
            RejectReason::MissingData,
            column,
            format!("missing value in column {column}"),
        )
    })
}

pub(crate) fn optional_f32(record: &RawRecord, column: &str) -> Result<Option<f32>, Rejection> {
    Ok(parse_value::<f64>(record, column)?.map(|v| v as f32))
}

/// Source identifiers are integers, but some exports write them as floats
/// (`4.29e+17` would lose digits, so only exact integral values are allowed).
pub(crate) fn source_name(record: &RawRecord, column: &str) -> Result<u64, Rejection> {
    let raw = record.get(column).ok_or_else(|| {
        Rejection::new(RejectReason::MissingData, column, "missing source name")
    })?;
    if let Ok(v) = raw.parse::<u64>() {
        return Ok(v);
    }
    match raw.strip_suffix(".0").map(str::parse::<u64>) {
        Some(Ok(v)) => Ok(v),
        _ => Err(Rejection::new(
            RejectReason::InvalidFormat,
            column,
            format!("'{raw}' is not an unsigned integer name"),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::{Header, RawRecord};
    use std::sync::Arc;

    pub fn record(pairs: &[(&str, &str)]) -> RawRecord {
        let header = Arc::new(Header::new(
            pairs.iter().map(|(k, _)| k.to_string()).collect(),
        ));
        RawRecord {
            header,
            fields: pairs.iter().map(|(_, v)| v.to_string()).collect(),
            line: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn test_source_name_forms() {
        let r = record(&[("a", "42"), ("b", "42.0"), ("c", "-1"), ("d", "4.2e1"), ("e", "")]);
        assert_eq!(source_name(&r, "a").unwrap(), 42);
        assert_eq!(source_name(&r, "b").unwrap(), 42);
        assert_eq!(source_name(&r, "c").unwrap_err().reason, RejectReason::InvalidFormat);
        assert_eq!(source_name(&r, "d").unwrap_err().reason, RejectReason::InvalidFormat);
        assert_eq!(source_name(&r, "e").unwrap_err().reason, RejectReason::MissingData);
    }

    #[test]
    fn test_required_and_optional() {
        let r = record(&[("ra", "10.5"), ("pm", ""), ("bad", "x")]);
        assert_eq!(required::<f64>(&r, "ra").unwrap(), 10.5);
        assert_eq!(required::<f64>(&r, "pm").unwrap_err().reason, RejectReason::MissingData);
        assert_eq!(optional_f32(&r, "pm").unwrap(), None);
        assert_eq!(
            optional_f32(&r, "bad").unwrap_err().field.as_deref(),
            Some("bad")
        );
    }
}
