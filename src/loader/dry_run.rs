use super::{BatchRecord, CatalogSink, LoadBatch, LoadReport, ReplaceReport};
use crate::error::IngestError;
use crate::error::Result;
use crate::types::PointingRow;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Reports what a load would do and writes nothing.
///
/// With an inner sink, read-only questions (batch counts, the ledger) are
/// answered from the real store so a rehearsed rollback can say how many
/// rows it would remove.
pub struct DryRunSink {
    inner: Option<Arc<dyn CatalogSink>>,
}

impl DryRunSink {
    pub fn new(inner: Option<Arc<dyn CatalogSink>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CatalogSink for DryRunSink {
    fn describe(&self) -> String {
        match &self.inner {
            Some(inner) => inner.describe(),
            None => "dry-run".to_string(),
        }
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn prepare(&self, table: &str) -> Result<()> {
        info!("[dry run] would create table {} if missing", table);
        Ok(())
    }

    async fn load_batch(&self, batch: &LoadBatch, rows: &[PointingRow]) -> Result<LoadReport> {
        info!(
            "[dry run] would insert {} rows into {} as batch {}",
            rows.len(),
            batch.table,
            batch.batch_id
        );
        Ok(LoadReport {
            batch_id: batch.batch_id,
            rows_offered: rows.len() as u64,
            rows_inserted: 0,
            dry_run: true,
        })
    }

    async fn replace_batches(
        &self,
        prior: &[Uuid],
        batch: &LoadBatch,
        rows: &[PointingRow],
    ) -> Result<ReplaceReport> {
        let mut would_delete = 0;
        for id in prior {
            match self.count_batch_rows(*id).await {
                Ok(n) => would_delete += n,
                Err(IngestError::BatchNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!("[dry run] would replace {} rows of {} earlier batches", would_delete, prior.len());
        Ok(ReplaceReport {
            load: self.load_batch(batch, rows).await?,
            rows_rolled_back: would_delete,
        })
    }

    /// Returns the rows a real rollback would delete
    async fn rollback_batch(&self, batch_id: Uuid) -> Result<u64> {
        let n = self.count_batch_rows(batch_id).await?;
        info!("[dry run] would delete {} rows of batch {}", n, batch_id);
        Ok(n)
    }

    async fn count_batch_rows(&self, batch_id: Uuid) -> Result<u64> {
        match &self.inner {
            Some(inner) => inner.count_batch_rows(batch_id).await,
            None => Ok(0),
        }
    }

    async fn list_batches(&self) -> Result<Vec<BatchRecord>> {
        match &self.inner {
            Some(inner) => inner.list_batches().await,
            None => Ok(Vec::new()),
        }
    }
}
