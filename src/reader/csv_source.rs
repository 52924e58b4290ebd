use crate::error::{IngestError, Result};
use crate::types::{Header, RawRecord};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A row that could not be read; the stream continues past it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowReadError {
    pub line: u64,
    pub message: String,
}

/// Reads a delimited catalog file with a header row, transparently
/// decompressing gzip input. Lines starting with `#` are comments.
pub struct CsvCatalogReader {
    reader: csv::Reader<Box<dyn Read + Send>>,
    header: Arc<Header>,
    record: csv::StringRecord,
}

impl CsvCatalogReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut buffered = BufReader::new(file);
        let gzip = path.extension().is_some_and(|e| e == "gz")
            || buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
        let input: Box<dyn Read + Send> = if gzip {
            Box::new(MultiGzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };
        Self::from_reader(input, b',')
    }

    pub fn from_reader(input: Box<dyn Read + Send>, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .delimiter(delimiter)
            .trim(csv::Trim::Headers)
            .from_reader(input);
        let names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if names.is_empty() || names.iter().all(|n| n.is_empty()) {
            return Err(IngestError::MissingColumn("header row".to_string()));
        }
        Ok(Self {
            reader,
            header: Arc::new(Header::new(names)),
            record: csv::StringRecord::new(),
        })
    }

    pub fn header(&self) -> &Arc<Header> {
        &self.header
    }

    /// The next row: `Ok(None)` at end of input, `Ok(Some(Err(_)))` for a
    /// malformed row, `Err(_)` when the underlying stream is broken.
    pub fn next_record(&mut self) -> Result<Option<std::result::Result<RawRecord, RowReadError>>> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => Ok(None),
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                Ok(Some(Ok(RawRecord {
                    header: Arc::clone(&self.header),
                    fields: self.record.iter().map(str::to_string).collect(),
                    line,
                })))
            }
            Err(e) if e.is_io_error() => Err(e.into()),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                Ok(Some(Err(RowReadError {
                    line,
                    message: e.to_string(),
                })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SAMPLE: &str = "# comment line\nsource_id,ra,dec\n1,10.0,20.0\n2,11.0,\n";

    fn collect(mut reader: CsvCatalogReader) -> Vec<std::result::Result<RawRecord, RowReadError>> {
        let mut out = Vec::new();
        while let Some(r) = reader.next_record().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_plain_and_gzip_read_identically() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("sample.csv");
        std::fs::write(&plain, SAMPLE).unwrap();

        // gzip without the .gz extension exercises magic-byte detection
        let gz = dir.path().join("sample.dat");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(SAMPLE.as_bytes()).unwrap();
        std::fs::write(&gz, enc.finish().unwrap()).unwrap();

        let a = collect(CsvCatalogReader::open(&plain).unwrap());
        let b = collect(CsvCatalogReader::open(&gz).unwrap());
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.as_ref().unwrap().fields, y.as_ref().unwrap().fields);
        }
        let second = a[1].as_ref().unwrap();
        assert_eq!(second.get("ra"), Some("11.0"));
        assert_eq!(second.get("dec"), None);
    }

    #[test]
    fn test_malformed_row_does_not_stop_the_stream() {
        let input = "source_id,ra,dec\n1,10.0,20.0\n2,11.0\n3,12.0,22.0\n";
        let reader = CsvCatalogReader::from_reader(Box::new(input.as_bytes()), b',').unwrap();
        let rows = collect(reader);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        let err = rows[1].as_ref().unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(rows[2].as_ref().unwrap().get("source_id"), Some("3"));
    }

    #[test]
    fn test_records_carry_line_numbers() {
        let input = "a,b\n1,2\n3,4\n";
        let reader = CsvCatalogReader::from_reader(Box::new(input.as_bytes()), b',').unwrap();
        let rows = collect(reader);
        assert_eq!(rows[0].as_ref().unwrap().line, 2);
        assert_eq!(rows[1].as_ref().unwrap().line, 3);
    }

    #[test]
    fn test_pipe_delimited_input() {
        let input = "a|b\n1|2\n";
        let reader = CsvCatalogReader::from_reader(Box::new(input.as_bytes()), b'|').unwrap();
        assert!(reader.header().contains("b"));
    }
}
