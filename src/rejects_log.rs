use crate::error::Result;
use crate::transform::Rejection;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct RejectLine<'a> {
    source_file: &'a str,
    line: u64,
    #[serde(flatten)]
    rejection: &'a Rejection,
}

/// NDJSON log of the rows one conversion rejected, one object per line.
///
/// The file is recreated on every conversion of the same source file.
pub struct RejectsLog {
    writer: BufWriter<File>,
    path: PathBuf,
    source_file: String,
    written: u64,
}

impl RejectsLog {
    pub fn create(path: &Path, source_file: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            source_file: source_file.to_string(),
            written: 0,
        })
    }

    pub fn append(&mut self, line: u64, rejection: &Rejection) -> Result<()> {
        let entry = RejectLine {
            source_file: &self.source_file,
            line,
            rejection,
        };
        let json = serde_json::to_string(&entry)?;
        writeln!(self.writer, "{}", json)?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

/// Reject log path for a source file: `<dir>/<stem>.ndjson`
pub fn rejects_file_name(source_name: &str) -> String {
    let stem = source_name.split('.').next().unwrap_or(source_name);
    format!("{stem}.ndjson")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::RejectReason;

    #[test]
    fn test_appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rejects").join("GaiaSource_1.ndjson");
        let mut log = RejectsLog::create(&path, "GaiaSource_1.csv.gz").unwrap();
        log.append(3, &Rejection::new(RejectReason::TooFaint, "vmag", "vmag 19.2 > 18"))
            .unwrap();
        log.append(7, &Rejection::new(RejectReason::MissingData, "ra", "ra is absent"))
            .unwrap();
        assert_eq!(log.finish().unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["line"], 3);
        assert_eq!(lines[0]["reason"], "too_faint");
        assert_eq!(lines[0]["field"], "vmag");
        assert_eq!(lines[1]["source_file"], "GaiaSource_1.csv.gz");
    }

    #[test]
    fn test_rejects_file_name() {
        assert_eq!(rejects_file_name("GaiaSource_1-2.csv.gz"), "GaiaSource_1-2.ndjson");
    }
}
