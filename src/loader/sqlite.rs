use super::sql::{self, Dialect};
use super::{
    now_rfc3339, BatchRecord, CatalogSink, LoadBatch, LoadReport, ReplaceReport,
    STATUS_COMMITTED, STATUS_ROLLED_BACK,
};
use crate::config::ConflictPolicy;
use crate::error::{IngestError, Result};
use crate::types::PointingRow;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

/// A local SQLite file with the CAT table layout, for staging and
/// rehearsing loads without a MySQL server.
pub struct SqliteSink {
    conn: Mutex<Connection>,
    path: PathBuf,
    conflict: ConflictPolicy,
}

impl SqliteSink {
    pub fn open<P: AsRef<Path>>(path: P, conflict: ConflictPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            conflict,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Safety("sqlite connection lock poisoned".to_string()))
    }

    /// Rows currently in `table`, regardless of batch
    pub fn table_row_count(&self, table: &str) -> Result<u64> {
        sql::validate_identifier(table)?;
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", sql::quote(table)),
            [],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn fetch_rows(&self, table: &str) -> Result<Vec<PointingRow>> {
        sql::validate_identifier(table)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT `name`, `ra`, `dec`, `epoch`, `pmra`, `pmdec`, `vmag`, `g_mag`, `g_bp`, `g_rp` \
             FROM {} ORDER BY `name`",
            sql::quote(table)
        ))?;
        let rows = stmt.query_map([], |r| {
            let name: i64 = r.get(0)?;
            Ok(PointingRow {
                name: name as u64,
                ra: r.get(1)?,
                dec: r.get(2)?,
                epoch: r.get::<_, f64>(3)? as f32,
                pmra: r.get::<_, Option<f64>>(4)?.map(|v| v as f32),
                pmdec: r.get::<_, Option<f64>>(5)?.map(|v| v as f32),
                vmag: r.get::<_, f64>(6)? as f32,
                g_mag: r.get::<_, Option<f64>>(7)?.map(|v| v as f32),
                g_bp: r.get::<_, Option<f64>>(8)?.map(|v| v as f32),
                g_rp: r.get::<_, Option<f64>>(9)?.map(|v| v as f32),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Insert `rows` and the ledger entry; the caller owns the transaction.
    fn insert_batch(&self, conn: &Connection, batch: &LoadBatch, rows: &[PointingRow]) -> Result<u64> {
        let batch_id = batch.batch_id.to_string();
        let insert = sql::insert_rows_sql(Dialect::Sqlite, &batch.table, 1, self.conflict)?;
        let mut inserted: u64 = 0;
        let mut stmt = conn.prepare(&insert)?;
        for row in rows {
            let name = i64::try_from(row.name).map_err(|_| {
                IngestError::Safety(format!("name {} does not fit a SQLite integer", row.name))
            })?;
            inserted += stmt.execute(params![
                name,
                row.ra,
                row.dec,
                row.epoch as f64,
                row.pmra.map(f64::from),
                row.pmdec.map(f64::from),
                row.vmag as f64,
                row.g_mag.map(f64::from),
                row.g_bp.map(f64::from),
                row.g_rp.map(f64::from),
                batch_id,
            ])? as u64;
        }
        conn.execute(
            &sql::insert_ledger_sql(),
            params![
                batch_id,
                batch.catalog,
                batch.table,
                batch.source_file,
                inserted as i64,
                STATUS_COMMITTED,
                now_rfc3339(),
            ],
        )?;
        Ok(inserted)
    }

    fn committed(batch: &LoadBatch, rows: &[PointingRow], inserted: u64) -> LoadReport {
        metrics::counter!("cat_ingest_rows_inserted_total").increment(inserted);
        info!(
            "Committed batch {} to {}: {} of {} rows",
            batch.batch_id,
            batch.table,
            inserted,
            rows.len()
        );
        LoadReport {
            batch_id: batch.batch_id,
            rows_offered: rows.len() as u64,
            rows_inserted: inserted,
            dry_run: false,
        }
    }

    /// Delete a batch's rows and mark it rolled back inside the caller's
    /// transaction. An already rolled-back batch deletes nothing.
    fn delete_batch(conn: &Connection, id: &str) -> Result<u64> {
        let (table, status) = Self::ledger_entry(conn, id)?;
        if status == STATUS_ROLLED_BACK {
            warn!("Batch {} was already rolled back", id);
            return Ok(0);
        }
        let deleted = conn.execute(&sql::delete_batch_sql(&table)?, params![id])? as u64;
        conn.execute(&sql::mark_rolled_back_sql(), params![id])?;
        info!("Rolled back batch {}: {} rows deleted from {}", id, deleted, table);
        Ok(deleted)
    }

    fn ledger_entry(conn: &Connection, batch_id: &str) -> Result<(String, String)> {
        conn.query_row(&sql::select_ledger_entry_sql(), params![batch_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .optional()?
        .ok_or_else(|| IngestError::BatchNotFound(batch_id.to_string()))
    }
}

#[async_trait]
impl CatalogSink for SqliteSink {
    fn describe(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    async fn prepare(&self, table: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "{};\n{};\n{};",
            sql::create_table_sql(Dialect::Sqlite, table)?,
            sql::create_batch_index_sql(table)?,
            sql::create_ledger_sql(Dialect::Sqlite)
        ))?;
        Ok(())
    }

    async fn load_batch(&self, batch: &LoadBatch, rows: &[PointingRow]) -> Result<LoadReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let inserted = self.insert_batch(&tx, batch, rows)?;
        tx.commit()?;
        Ok(Self::committed(batch, rows, inserted))
    }

    async fn replace_batches(
        &self,
        prior: &[Uuid],
        batch: &LoadBatch,
        rows: &[PointingRow],
    ) -> Result<ReplaceReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for id in prior {
            match Self::delete_batch(&tx, &id.to_string()) {
                Ok(n) => deleted += n,
                Err(IngestError::BatchNotFound(id)) => warn!("Batch {} is not in the ledger", id),
                Err(e) => return Err(e),
            }
        }
        // An error here drops `tx`, which restores the earlier batches
        let inserted = self.insert_batch(&tx, batch, rows)?;
        tx.commit()?;
        info!("Replaced {} earlier batches ({} rows) with {}", prior.len(), deleted, batch.batch_id);
        Ok(ReplaceReport {
            load: Self::committed(batch, rows, inserted),
            rows_rolled_back: deleted,
        })
    }

    async fn rollback_batch(&self, batch_id: Uuid) -> Result<u64> {
        let id = batch_id.to_string();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let deleted = Self::delete_batch(&tx, &id)?;
        tx.commit()?;
        Ok(deleted)
    }

    async fn count_batch_rows(&self, batch_id: Uuid) -> Result<u64> {
        let id = batch_id.to_string();
        let conn = self.conn()?;
        let (table, _) = Self::ledger_entry(&conn, &id)?;
        let n: i64 = conn.query_row(&sql::count_batch_sql(&table)?, params![id], |r| r.get(0))?;
        Ok(n as u64)
    }

    async fn list_batches(&self) -> Result<Vec<BatchRecord>> {
        let conn = self.conn()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![crate::constants::BATCH_LEDGER_TABLE],
            |r| r.get(0),
        )?;
        if exists == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&sql::select_ledger_sql())?;
        let rows = stmt.query_map([], |r| {
            Ok(BatchRecord {
                batch_id: r.get(0)?,
                catalog: r.get(1)?,
                target_table: r.get(2)?,
                source_file: r.get(3)?,
                row_count: r.get(4)?,
                status: r.get(5)?,
                loaded_at: r.get(6)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
