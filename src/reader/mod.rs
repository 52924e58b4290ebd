pub mod csv_source;
pub mod staged;

pub use csv_source::{CsvCatalogReader, RowReadError};
pub use staged::{read_staged, staged_file_name, StagedWriter};
