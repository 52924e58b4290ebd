use crate::error::{IngestError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const STATUS_DOWNLOADED: &str = "downloaded";
pub const STATUS_STAGED: &str = "staged";

/// What the local work directory knows about one source file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub catalog: String,
    pub file_name: String,
    pub url: Option<String>,
    pub sha256: Option<String>,
    pub staged_path: Option<PathBuf>,
    pub rows_read: u64,
    pub rows_accepted: u64,
    pub status: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadEntry {
    pub batch_id: String,
    pub row_count: u64,
    pub loaded_at: i64,
}

/// Local record of downloads, staged files and the batches they became,
/// so interrupted or repeated runs pick up where they stopped.
pub struct Manifest {
    conn: Mutex<Connection>,
}

impl Manifest {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS files (
                catalog        TEXT NOT NULL,
                file_name      TEXT NOT NULL,
                url            TEXT,
                sha256         TEXT,
                staged_path    TEXT,
                rows_read      INTEGER NOT NULL DEFAULT 0,
                rows_accepted  INTEGER NOT NULL DEFAULT 0,
                status         TEXT NOT NULL,
                updated_at     INTEGER NOT NULL,
                PRIMARY KEY (catalog, file_name)
            );
            CREATE TABLE IF NOT EXISTS loads (
                catalog     TEXT NOT NULL,
                file_name   TEXT NOT NULL,
                target      TEXT NOT NULL,
                batch_id    TEXT NOT NULL PRIMARY KEY,
                row_count   INTEGER NOT NULL,
                loaded_at   INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Safety("manifest lock poisoned".to_string()))
    }

    pub fn record_download(
        &self,
        catalog: &str,
        file_name: &str,
        url: &str,
        sha256: &str,
    ) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO files (catalog, file_name, url, sha256, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(catalog, file_name) DO UPDATE SET
                url=excluded.url, sha256=excluded.sha256,
                status=CASE WHEN files.status = 'staged' THEN files.status ELSE excluded.status END,
                updated_at=excluded.updated_at",
            params![catalog, file_name, url, sha256, STATUS_DOWNLOADED, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn record_staged(
        &self,
        catalog: &str,
        file_name: &str,
        staged_path: &Path,
        rows_read: u64,
        rows_accepted: u64,
    ) -> Result<()> {
        let staged = staged_path.to_string_lossy();
        self.conn()?.execute(
            "INSERT INTO files (catalog, file_name, staged_path, rows_read, rows_accepted, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(catalog, file_name) DO UPDATE SET
                staged_path=excluded.staged_path, rows_read=excluded.rows_read,
                rows_accepted=excluded.rows_accepted, status=excluded.status,
                updated_at=excluded.updated_at",
            params![
                catalog,
                file_name,
                staged.as_ref(),
                rows_read as i64,
                rows_accepted as i64,
                STATUS_STAGED,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn file(&self, catalog: &str, file_name: &str) -> Result<Option<FileEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT catalog, file_name, url, sha256, staged_path, rows_read, rows_accepted, status, updated_at
                 FROM files WHERE catalog = ?1 AND file_name = ?2",
                params![catalog, file_name],
                |r| {
                    Ok(FileEntry {
                        catalog: r.get(0)?,
                        file_name: r.get(1)?,
                        url: r.get(2)?,
                        sha256: r.get(3)?,
                        staged_path: r.get::<_, Option<String>>(4)?.map(PathBuf::from),
                        rows_read: r.get::<_, i64>(5)? as u64,
                        rows_accepted: r.get::<_, i64>(6)? as u64,
                        status: r.get(7)?,
                        updated_at: r.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// True when the file was staged and the staged file is still on disk
    pub fn is_staged(&self, catalog: &str, file_name: &str) -> Result<bool> {
        Ok(self
            .file(catalog, file_name)?
            .filter(|f| f.status == STATUS_STAGED)
            .and_then(|f| f.staged_path)
            .is_some_and(|p| p.exists()))
    }

    pub fn record_load(
        &self,
        catalog: &str,
        file_name: &str,
        target: &str,
        batch_id: Uuid,
        row_count: u64,
    ) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO loads (catalog, file_name, target, batch_id, row_count, loaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                catalog,
                file_name,
                target,
                batch_id.to_string(),
                row_count as i64,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// Batches loaded from a staged file into `target`, oldest first
    pub fn loads_for(&self, catalog: &str, file_name: &str, target: &str) -> Result<Vec<LoadEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT batch_id, row_count, loaded_at FROM loads
             WHERE catalog = ?1 AND file_name = ?2 AND target = ?3
             ORDER BY loaded_at, rowid",
        )?;
        let rows = stmt.query_map(params![catalog, file_name, target], |r| {
            Ok(LoadEntry {
                batch_id: r.get(0)?,
                row_count: r.get::<_, i64>(1)? as u64,
                loaded_at: r.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Forget a load after its batch was rolled back
    pub fn forget_load(&self, batch_id: Uuid) -> Result<bool> {
        let n = self.conn()?.execute(
            "DELETE FROM loads WHERE batch_id = ?1",
            params![batch_id.to_string()],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_staged_requires_file_on_disk() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path().join("manifest.db")).unwrap();
        let staged = dir.path().join("a.csv");

        manifest.record_download("gaia", "a.csv.gz", "http://x/a.csv.gz", "abcd").unwrap();
        assert!(!manifest.is_staged("gaia", "a.csv.gz").unwrap());

        manifest.record_staged("gaia", "a.csv.gz", &staged, 10, 7).unwrap();
        assert!(!manifest.is_staged("gaia", "a.csv.gz").unwrap());

        std::fs::write(&staged, "name\n").unwrap();
        assert!(manifest.is_staged("gaia", "a.csv.gz").unwrap());

        let entry = manifest.file("gaia", "a.csv.gz").unwrap().unwrap();
        assert_eq!(entry.url.as_deref(), Some("http://x/a.csv.gz"));
        assert_eq!(entry.sha256.as_deref(), Some("abcd"));
        assert_eq!(entry.rows_accepted, 7);
    }

    #[test]
    fn test_redownload_keeps_staged_status() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path().join("manifest.db")).unwrap();
        manifest.record_staged("gaia", "a.csv.gz", Path::new("a.csv"), 1, 1).unwrap();
        manifest.record_download("gaia", "a.csv.gz", "http://x/a.csv.gz", "ef01").unwrap();
        let entry = manifest.file("gaia", "a.csv.gz").unwrap().unwrap();
        assert_eq!(entry.status, STATUS_STAGED);
        assert_eq!(entry.sha256.as_deref(), Some("ef01"));
    }

    #[test]
    fn test_loads_are_tracked_per_target() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path().join("manifest.db")).unwrap();
        let batch = Uuid::new_v4();
        manifest.record_load("gaia", "a.csv", "sqlite://cat.db", batch, 5).unwrap();

        assert_eq!(manifest.loads_for("gaia", "a.csv", "sqlite://cat.db").unwrap().len(), 1);
        assert!(manifest.loads_for("gaia", "a.csv", "mysql://db/cat").unwrap().is_empty());

        assert!(manifest.forget_load(batch).unwrap());
        assert!(manifest.loads_for("gaia", "a.csv", "sqlite://cat.db").unwrap().is_empty());
    }
}
