//! Read → transform → gate → stage for one source file.

use crate::config::Cuts;
use crate::error::{IngestError, Result};
use crate::reader::{staged_file_name, CsvCatalogReader, StagedWriter};
use crate::rejects_log::{rejects_file_name, RejectsLog};
use crate::transform::{CatalogAdapter, ConversionStats, Decision, QualityGate, RejectReason, Rejection};
use metrics::counter;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ConvertOutcome {
    pub source: PathBuf,
    pub staged_path: PathBuf,
    pub rejects_path: PathBuf,
    pub stats: ConversionStats,
}

/// Convert one source file into a staged file plus a reject log.
///
/// Blocking; the pipeline runs it under `spawn_blocking`. Row problems are
/// counted and logged, never returned: an `Err` means the file itself could
/// not be processed (unreadable, or missing a required column), and in that
/// case no staged file is left behind.
pub fn convert_file(
    source: &Path,
    staged_dir: &Path,
    rejects_dir: &Path,
    adapter: &dyn CatalogAdapter,
    cuts: Cuts,
) -> Result<ConvertOutcome> {
    let source_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| IngestError::Config(format!("not a file path: {}", source.display())))?;
    let span = info_span!("convert", file = %source_name, adapter = adapter.name());
    let _enter = span.enter();

    let mut reader = CsvCatalogReader::open(source)?;
    let missing: Vec<String> = adapter
        .required_columns()
        .into_iter()
        .filter(|c| !reader.header().contains(c))
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumn(missing.join(", ")));
    }

    let staged_path = staged_dir.join(staged_file_name(&source_name));
    let rejects_path = rejects_dir.join(rejects_file_name(&source_name));
    let mut staged = StagedWriter::create(&staged_path)?;
    let mut rejects = RejectsLog::create(&rejects_path, &source_name)?;
    let mut gate = QualityGate::new(cuts);
    let mut stats = ConversionStats::default();

    while let Some(next) = reader.next_record()? {
        let record = match next {
            Ok(record) => record,
            Err(e) => {
                debug!("Unreadable line {}: {}", e.line, e.message);
                stats.record_read_error();
                rejects.append(
                    e.line,
                    &Rejection {
                        reason: RejectReason::Malformed,
                        field: None,
                        message: e.message,
                    },
                )?;
                continue;
            }
        };

        let candidate = match adapter.transform(&record) {
            Ok(candidate) => candidate,
            Err(rejection) => {
                stats.record_rejected(rejection.reason);
                rejects.append(record.line, &rejection)?;
                continue;
            }
        };

        match gate.assess(&candidate) {
            Decision::Accept => {
                staged.write(&candidate.row)?;
                stats.record_accepted(&candidate.row);
            }
            Decision::Reject(rejection) => {
                stats.record_rejected(rejection.reason);
                rejects.append(record.line, &rejection)?;
            }
        }
    }

    let written = staged.finish()?;
    rejects.finish()?;
    if written != stats.accepted {
        warn!("Staged {} rows but accepted {}", written, stats.accepted);
    }

    counter!("cat_ingest_rows_read_total", "adapter" => adapter.name()).increment(stats.rows_read);
    counter!("cat_ingest_rows_accepted_total", "adapter" => adapter.name()).increment(stats.accepted);
    for (reason, n) in &stats.rejected {
        counter!("cat_ingest_rows_rejected_total", "reason" => reason.as_str()).increment(*n);
    }
    info!(
        "Converted {}: {} read, {} accepted, {} rejected, {} unreadable",
        source_name,
        stats.rows_read,
        stats.accepted,
        stats.total_rejected(),
        stats.read_errors
    );

    Ok(ConvertOutcome {
        source: source.to_path_buf(),
        staged_path,
        rejects_path,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_staged;
    use crate::transform::adapters::GaiaEdr3Adapter;
    use tempfile::TempDir;

    const HEADER: &str = "source_id,ra,dec,ref_epoch,pmra,pmdec,phot_g_mean_mag,phot_bp_mean_mag,phot_rp_mean_mag,bp_rp";

    fn cuts() -> Cuts {
        Cuts {
            max_vmag: 18.0,
            min_dec: -40.0,
        }
    }

    #[test]
    fn test_converts_and_logs_rejects() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("GaiaSource_1-2.csv");
        let body = [
            HEADER,
            "1,10.0,20.0,2016.0,1.0,-1.0,12.0,12.4,11.6,0.8",
            // faint
            "2,11.0,21.0,2016.0,,,19.5,19.9,19.1,0.8",
            // south of the limit
            "3,12.0,-40.0,2016.0,,,12.0,12.4,11.6,0.8",
            // no colour: no V magnitude
            "4,13.0,22.0,2016.0,,,12.0,,,",
            // duplicate of 1
            "1,10.0,20.0,2016.0,1.0,-1.0,12.0,12.4,11.6,0.8",
            // wrong field count
            "5,14.0",
            "6,15.0,23.0,2016.0,,,13.0,13.3,12.5,0.8",
        ]
        .join("\n");
        std::fs::write(&source, body).unwrap();

        let out = convert_file(
            &source,
            &dir.path().join("staged"),
            &dir.path().join("rejects"),
            &GaiaEdr3Adapter::default(),
            cuts(),
        )
        .unwrap();

        assert_eq!(out.stats.rows_read, 7);
        assert_eq!(out.stats.accepted, 2);
        assert_eq!(out.stats.read_errors, 1);
        assert_eq!(out.stats.rejected[&RejectReason::TooFaint], 2);
        assert_eq!(out.stats.rejected[&RejectReason::BelowDeclinationLimit], 1);
        assert_eq!(out.stats.rejected[&RejectReason::DuplicateName], 1);

        assert_eq!(out.staged_path.file_name().unwrap(), "GaiaSource_1-2.csv");
        let staged = read_staged(&out.staged_path).unwrap();
        let names: Vec<u64> = staged.iter().map(|r| r.name).collect();
        assert_eq!(names, vec![1, 6]);

        let rejects = std::fs::read_to_string(&out.rejects_path).unwrap();
        assert_eq!(rejects.lines().count(), 5);
    }

    #[test]
    fn test_missing_required_column_fails_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bad.csv");
        std::fs::write(&source, "source_id,ra\n1,2\n").unwrap();
        let staged_dir = dir.path().join("staged");

        let err = convert_file(
            &source,
            &staged_dir,
            &dir.path().join("rejects"),
            &GaiaEdr3Adapter::default(),
            cuts(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn(ref cols) if cols.contains("dec")));
        assert!(!staged_dir.join("bad.csv").exists());
    }

    #[test]
    fn test_truncated_gzip_leaves_no_partial_output() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = TempDir::new().unwrap();
        let mut body = String::from(HEADER);
        for i in 0..2000 {
            body.push_str(&format!("\n{},{}.0,20.0,2016.0,,,{}.5,12.4,11.6,0.8", i + 1, i % 360, 10 + i % 5));
        }
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(body.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();
        let source = dir.path().join("GaiaSource_9.csv.gz");
        std::fs::write(&source, &gz[..gz.len() / 2]).unwrap();
        let staged_dir = dir.path().join("staged");

        let result = convert_file(
            &source,
            &staged_dir,
            &dir.path().join("rejects"),
            &GaiaEdr3Adapter::default(),
            cuts(),
        );

        assert!(result.is_err());
        assert!(!staged_dir.join("GaiaSource_9.csv").exists());
        assert!(!staged_dir.join("GaiaSource_9.csv.tmp").exists());
    }
}
