use crate::constants;
use crate::error::{IngestError, Result};
use crate::loader::sql::validate_identifier;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default = "default_catalogs", rename = "catalog")]
    pub catalogs: Vec<CatalogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// MySQL URL of the CAT database; `CAT_DATABASE_URL` wins when set.
    pub url: Option<String>,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub conflict: ConflictPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    #[serde(default)]
    pub throttle: bool,
    #[serde(default = "default_throttle_rate")]
    pub throttle_bytes_per_sec: u64,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// One catalog the pipeline knows how to ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub name: String,
    pub adapter: String,
    pub source_url: Option<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    pub table: String,
    #[serde(default)]
    pub cuts: Cuts,
    /// Source column names, required by the `column_map` adapter.
    pub columns: Option<ColumnMapConfig>,
    /// Epoch used when the source has no per-row epoch column.
    pub default_epoch: Option<f32>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Cuts {
    #[serde(default = "default_max_vmag")]
    pub max_vmag: f64,
    #[serde(default = "default_min_dec")]
    pub min_dec: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ColumnMapConfig {
    pub name: String,
    pub ra: String,
    pub dec: String,
    pub mag: String,
    pub epoch: Option<String>,
    pub pmra: Option<String>,
    pub pmdec: Option<String>,
}

/// What to do when a row's `name` already exists in the target table.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Abort and roll back the whole batch
    #[default]
    Fail,
    /// Skip the duplicate row
    Ignore,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/staging.db")
}
fn default_batch_size() -> usize {
    1000
}
fn default_throttle_rate() -> u64 {
    512_000
}
fn default_chunk_bytes() -> usize {
    100 * 1024
}
fn default_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    5
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_extension() -> String {
    "gz".to_string()
}
fn default_max_vmag() -> f64 {
    constants::DEFAULT_MAX_VMAG
}
fn default_min_dec() -> f64 {
    constants::DEFAULT_MIN_DEC
}

fn default_catalogs() -> Vec<CatalogConfig> {
    vec![CatalogConfig::gaia_edr3()]
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: default_sqlite_path(),
            batch_size: default_batch_size(),
            conflict: ConflictPolicy::default(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            throttle: false,
            throttle_bytes_per_sec: default_throttle_rate(),
            chunk_bytes: default_chunk_bytes(),
            timeout_seconds: default_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for Cuts {
    fn default() -> Self {
        Self {
            max_vmag: default_max_vmag(),
            min_dec: default_min_dec(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            download: DownloadConfig::default(),
            paths: PathsConfig::default(),
            catalogs: default_catalogs(),
        }
    }
}

impl CatalogConfig {
    /// The built-in Gaia EDR3 definition, used when no config file exists.
    pub fn gaia_edr3() -> Self {
        Self {
            name: constants::GAIA_EDR3_CATALOG.to_string(),
            adapter: constants::GAIA_EDR3_ADAPTER.to_string(),
            source_url: Some(constants::GAIA_EDR3_URL.to_string()),
            extension: default_extension(),
            table: constants::GAIA_EDR3_CATALOG.to_string(),
            cuts: Cuts::default(),
            columns: None,
            default_epoch: None,
        }
    }
}

impl Config {
    /// Load the config file at `path`. A missing file at the default location
    /// falls back to built-in defaults; a missing explicit path is an error.
    ///
    /// Runs before logging is set up, so it logs nothing; the caller reports
    /// which config is in use.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !path.exists() && !explicit {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for catalog in &self.catalogs {
            if !seen.insert(catalog.name.as_str()) {
                return Err(IngestError::Config(format!(
                    "catalog '{}' is defined more than once",
                    catalog.name
                )));
            }
            validate_identifier(&catalog.table)?;
            if catalog.adapter == constants::COLUMN_MAP_ADAPTER && catalog.columns.is_none() {
                return Err(IngestError::Config(format!(
                    "catalog '{}' uses the column_map adapter but has no [catalog.columns] table",
                    catalog.name
                )));
            }
        }
        if self.database.batch_size == 0 {
            return Err(IngestError::Config("database.batch_size must be positive".into()));
        }
        if self.download.max_attempts == 0 {
            return Err(IngestError::Config("download.max_attempts must be positive".into()));
        }
        if self.download.chunk_bytes == 0 {
            return Err(IngestError::Config("download.chunk_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn catalog(&self, name: &str) -> Result<&CatalogConfig> {
        self.catalogs
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| IngestError::UnknownCatalog(name.to_string()))
    }

    /// The MySQL URL from the environment, falling back to the config file.
    pub fn database_url(&self) -> Option<String> {
        std::env::var(constants::DATABASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.database.url.clone())
    }

    pub fn raw_dir(&self, catalog: &str) -> PathBuf {
        self.paths.work_dir.join(catalog).join("raw")
    }

    pub fn staged_dir(&self, catalog: &str) -> PathBuf {
        self.paths.work_dir.join(catalog).join("staged")
    }

    pub fn rejects_dir(&self, catalog: &str) -> PathBuf {
        self.paths.work_dir.join(catalog).join("rejects")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.paths.work_dir.join("manifest.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_gaia_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.catalogs.len(), 1);
        let gaia = config.catalog("gaia_edr3").unwrap();
        assert_eq!(gaia.cuts.max_vmag, 18.0);
        assert_eq!(gaia.cuts.min_dec, -40.0);
        assert_eq!(gaia.extension, "gz");
        assert_eq!(config.database.batch_size, 1000);
        assert_eq!(config.database.conflict, ConflictPolicy::Fail);
        assert_eq!(config.download.chunk_bytes, 102_400);
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat_ingest.toml");

        let config = Config::load(&path, false).unwrap();
        assert_eq!(config.catalogs.len(), Config::default().catalogs.len());
        assert!(matches!(Config::load(&path, true), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_column_map_catalog_parses() {
        let config = Config::from_toml_str(
            r#"
            [database]
            conflict = "ignore"
            batch_size = 50

            [[catalog]]
            name = "bright"
            adapter = "column_map"
            table = "bright_stars"
            default_epoch = 2000.0
            [catalog.cuts]
            max_vmag = 6.5
            [catalog.columns]
            name = "HR"
            ra = "RAdeg"
            dec = "DEdeg"
            mag = "Vmag"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.conflict, ConflictPolicy::Ignore);
        let bright = config.catalog("bright").unwrap();
        assert_eq!(bright.cuts.max_vmag, 6.5);
        assert_eq!(bright.cuts.min_dec, -40.0);
        assert_eq!(bright.columns.as_ref().unwrap().mag, "Vmag");
        assert!(config.catalog("gaia_edr3").is_err());
    }

    #[test]
    fn test_column_map_without_columns_is_rejected() {
        let result = Config::from_toml_str(
            r#"
            [[catalog]]
            name = "bright"
            adapter = "column_map"
            table = "bright_stars"
            "#,
        );
        assert!(matches!(result, Err(IngestError::Config(_))));
    }

    #[test]
    fn test_bad_table_name_is_rejected() {
        let result = Config::from_toml_str(
            r#"
            [[catalog]]
            name = "gaia"
            adapter = "gaia_edr3"
            table = "gaia; DROP TABLE stars"
            "#,
        );
        assert!(matches!(result, Err(IngestError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_duplicate_catalog_names_are_rejected() {
        let result = Config::from_toml_str(
            r#"
            [[catalog]]
            name = "gaia"
            adapter = "gaia_edr3"
            table = "a"

            [[catalog]]
            name = "gaia"
            adapter = "gaia_edr3"
            table = "b"
            "#,
        );
        assert!(result.is_err());
    }
}
