use crate::error::{IngestError, Result};
use crate::types::PointingRow;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Writes accepted rows of one source file in CAT column order.
///
/// Output goes to `<path>.tmp` and is renamed into place by [`finish`], so a
/// staged file that exists is always complete. Dropping the writer without
/// finishing removes the `.tmp` file.
///
/// [`finish`]: StagedWriter::finish
pub struct StagedWriter {
    writer: Option<csv::Writer<File>>,
    tmp: PathBuf,
    path: PathBuf,
    rows: u64,
}

impl StagedWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let writer = csv::Writer::from_path(&tmp)?;
        Ok(Self {
            writer: Some(writer),
            tmp,
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>> {
        self.writer.as_mut().ok_or_else(|| {
            IngestError::Io(io::Error::new(io::ErrorKind::Other, "staged writer already finished"))
        })
    }

    pub fn write(&mut self, row: &PointingRow) -> Result<()> {
        self.writer()?.serialize(row)?;
        self.rows += 1;
        Ok(())
    }

    /// Flush, move into place and return the number of rows written.
    pub fn finish(mut self) -> Result<u64> {
        let rows = self.rows;
        let writer = self.writer()?;
        if rows == 0 {
            // serialize() writes the header with the first row
            writer.write_record(crate::constants::POINTING_COLUMNS)?;
        }
        writer.flush()?;
        drop(self.writer.take());
        fs::rename(&self.tmp, &self.path)?;
        Ok(rows)
    }
}

impl Drop for StagedWriter {
    fn drop(&mut self) {
        drop(self.writer.take());
        // after a successful finish there is nothing left to remove
        let _ = fs::remove_file(&self.tmp);
    }
}

/// Read a staged file back into rows.
pub fn read_staged(path: &Path) -> Result<Vec<PointingRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// The staged file name for a source file: everything before the first `.`
/// of its name, plus `.csv`.
pub fn staged_file_name(source_name: &str) -> String {
    let stem = source_name.split('.').next().unwrap_or(source_name);
    format!("{stem}.csv")
}
