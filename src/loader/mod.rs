//! Writing staged rows into a relational store.
//!
//! Every staged file is loaded as one batch in one transaction, together
//! with its ledger entry, so the store never holds part of a batch and
//! every row can be traced back to (and removed with) the batch that
//! inserted it.

pub mod dry_run;
pub mod mysql;
pub mod sql;
pub mod sqlite;

use crate::error::Result;
use crate::types::PointingRow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use dry_run::DryRunSink;
pub use mysql::MysqlSink;
pub use sqlite::SqliteSink;

pub const STATUS_COMMITTED: &str = "committed";
pub const STATUS_ROLLED_BACK: &str = "rolled_back";

/// The rows of one staged file, headed for one table
#[derive(Debug, Clone)]
pub struct LoadBatch {
    pub batch_id: Uuid,
    pub catalog: String,
    pub table: String,
    pub source_file: String,
}

impl LoadBatch {
    pub fn new(catalog: &str, table: &str, source_file: &str) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            catalog: catalog.to_string(),
            table: table.to_string(),
            source_file: source_file.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub batch_id: Uuid,
    pub rows_offered: u64,
    pub rows_inserted: u64,
    pub dry_run: bool,
}

/// Outcome of loading a batch in place of earlier ones
#[derive(Debug, Clone, Serialize)]
pub struct ReplaceReport {
    pub load: LoadReport,
    /// Rows of the earlier batches that were (or would be) deleted
    pub rows_rolled_back: u64,
}

/// A ledger entry in the target store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub catalog: String,
    pub target_table: String,
    pub source_file: String,
    pub row_count: i64,
    pub status: String,
    pub loaded_at: String,
}

/// A relational store that accepts catalog batches
#[async_trait]
pub trait CatalogSink: Send + Sync {
    /// Stable description of the target, also used as the manifest key.
    /// Never contains credentials.
    fn describe(&self) -> String;

    fn is_dry_run(&self) -> bool {
        false
    }

    /// Create the catalog table and the batch ledger if missing
    async fn prepare(&self, table: &str) -> Result<()>;

    /// Insert all rows and the ledger entry in one transaction
    async fn load_batch(&self, batch: &LoadBatch, rows: &[PointingRow]) -> Result<LoadReport>;

    /// Roll back `prior` and load `rows` as `batch` in one transaction.
    ///
    /// If any step fails nothing changes: the earlier batches keep their
    /// rows. Prior batches the ledger does not know are skipped.
    async fn replace_batches(
        &self,
        prior: &[Uuid],
        batch: &LoadBatch,
        rows: &[PointingRow],
    ) -> Result<ReplaceReport>;

    /// Delete a batch's rows and mark it rolled back; returns rows deleted.
    /// Rolling back an already rolled-back batch deletes nothing.
    async fn rollback_batch(&self, batch_id: Uuid) -> Result<u64>;

    /// Rows currently in the store that belong to `batch_id`
    async fn count_batch_rows(&self, batch_id: Uuid) -> Result<u64>;

    async fn list_batches(&self) -> Result<Vec<BatchRecord>>;
}

pub(crate) fn now_rfc3339() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339()
}
