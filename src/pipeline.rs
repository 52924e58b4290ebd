use crate::config::{CatalogConfig, Config};
use crate::convert::{convert_file, ConvertOutcome};
use crate::error::{IngestError, Result};
use crate::loader::{BatchRecord, CatalogSink, LoadBatch, LoadReport};
use crate::manifest::Manifest;
use crate::reader::read_staged;
use crate::remote::{file_name_from_url, RemoteSource};
use crate::transform::{AdapterRegistry, CatalogAdapter, ConversionStats};
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Knobs shared by the fetch, convert, load and run stages
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many source files
    pub limit: Option<usize>,
    /// Keep raw downloads after conversion and reuse ones already on disk
    pub keep_raw: bool,
    /// Convert these local files instead of the catalog's raw directory
    pub files: Vec<PathBuf>,
    /// Re-convert files the manifest already lists as staged
    pub force: bool,
    /// Roll back earlier batches of a staged file before loading it again
    pub replace: bool,
}

/// Result of a pipeline stage or a complete run
#[derive(Debug, Default, Serialize)]
pub struct PipelineResult {
    pub catalog: String,
    pub target: String,
    pub dry_run: bool,
    pub files_seen: usize,
    pub files_skipped: usize,
    pub files_downloaded: usize,
    pub files_converted: usize,
    pub files_loaded: usize,
    pub bytes_downloaded: u64,
    pub stats: ConversionStats,
    pub rows_inserted: u64,
    pub rows_rolled_back: u64,
    pub batches: Vec<LoadReport>,
    pub errors: Vec<String>,
}

impl PipelineResult {
    fn new(catalog: &str, sink: &dyn CatalogSink) -> Self {
        Self {
            catalog: catalog.to_string(),
            target: sink.describe(),
            dry_run: sink.is_dry_run(),
            ..Default::default()
        }
    }

    fn absorb(&mut self, other: PipelineResult) {
        self.files_seen = self.files_seen.max(other.files_seen);
        self.files_skipped += other.files_skipped;
        self.files_downloaded += other.files_downloaded;
        self.files_converted += other.files_converted;
        self.files_loaded += other.files_loaded;
        self.bytes_downloaded += other.bytes_downloaded;
        self.stats.merge(&other.stats);
        self.rows_inserted += other.rows_inserted;
        self.rows_rolled_back += other.rows_rolled_back;
        self.batches.extend(other.batches);
        self.errors.extend(other.errors);
    }

    fn fail(&mut self, file: &str, stage: &str, e: &IngestError) {
        error!("{} failed for {}: {}", stage, file, e);
        counter!("cat_ingest_file_errors_total", "stage" => stage.to_string()).increment(1);
        self.errors.push(format!("{stage} {file}: {e}"));
    }
}

pub struct Pipeline {
    config: Config,
    remote: Arc<dyn RemoteSource>,
    registry: AdapterRegistry,
    sink: Arc<dyn CatalogSink>,
    manifest: Manifest,
}

impl Pipeline {
    pub fn new(
        config: Config,
        remote: Arc<dyn RemoteSource>,
        registry: AdapterRegistry,
        sink: Arc<dyn CatalogSink>,
        manifest: Manifest,
    ) -> Self {
        Self {
            config,
            remote,
            registry,
            sink,
            manifest,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn CatalogSink> {
        &self.sink
    }

    fn source_url(catalog: &CatalogConfig) -> Result<&str> {
        catalog.source_url.as_deref().ok_or_else(|| {
            IngestError::Config(format!("catalog '{}' has no source_url", catalog.name))
        })
    }

    /// Remote files of a catalog, in listing order
    pub async fn list(&self, catalog: &str) -> Result<Vec<String>> {
        let cat = self.config.catalog(catalog)?;
        self.remote.list(Self::source_url(cat)?, &cat.extension).await
    }

    /// Download remote files into the catalog's raw directory.
    #[instrument(skip(self, opts))]
    pub async fn fetch(&self, catalog: &str, opts: &RunOptions) -> Result<PipelineResult> {
        let cat = self.config.catalog(catalog)?;
        let mut result = PipelineResult::new(catalog, self.sink.as_ref());
        let urls = self.list(catalog).await?;
        result.files_seen = urls.len();
        let raw_dir = self.config.raw_dir(&cat.name);

        for url in urls.iter().take(opts.limit.unwrap_or(usize::MAX)) {
            let name = file_name_from_url(url);
            let dest = raw_dir.join(&name);
            if dest.exists() {
                debug!("{} already downloaded", name);
                result.files_skipped += 1;
                continue;
            }
            match self.download(cat, url, &name, &dest).await {
                Ok(bytes) => {
                    result.files_downloaded += 1;
                    result.bytes_downloaded += bytes;
                }
                Err(e) => result.fail(&name, "fetch", &e),
            }
        }
        Ok(result)
    }

    async fn download(&self, cat: &CatalogConfig, url: &str, name: &str, dest: &Path) -> Result<u64> {
        let report = self.remote.fetch(url, dest).await?;
        self.manifest
            .record_download(&cat.name, name, url, &report.sha256)?;
        Ok(report.bytes)
    }

    /// Whether `path` is the file the manifest recorded downloading
    async fn matches_download(&self, cat: &CatalogConfig, name: &str, path: &Path) -> Result<bool> {
        let expected = match self.manifest.file(&cat.name, name)?.and_then(|f| f.sha256) {
            Some(sha) => sha,
            None => return Ok(false),
        };
        let path = path.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut hasher = Sha256::new();
            std::io::copy(&mut std::fs::File::open(&path)?, &mut hasher)?;
            Ok(hex::encode(hasher.finalize()))
        })
        .await??;
        Ok(actual == expected)
    }

    /// Convert local source files into staged files.
    ///
    /// Uses `opts.files` when given, otherwise every file in the catalog's raw
    /// directory that carries the catalog's extension.
    #[instrument(skip(self, opts))]
    pub async fn convert(&self, catalog: &str, opts: &RunOptions) -> Result<PipelineResult> {
        let cat = self.config.catalog(catalog)?;
        let adapter = self.registry.get(catalog)?;
        let mut result = PipelineResult::new(catalog, self.sink.as_ref());

        let sources = if opts.files.is_empty() {
            list_local(&self.config.raw_dir(&cat.name), &cat.extension)?
        } else {
            opts.files.clone()
        };
        result.files_seen = sources.len();

        for source in sources.iter().take(opts.limit.unwrap_or(usize::MAX)) {
            let name = display_name(source);
            if !opts.force && self.manifest.is_staged(&cat.name, &name)? {
                info!("⏭️  {} already staged", name);
                result.files_skipped += 1;
                continue;
            }
            match self.convert_one(cat, adapter.clone(), source).await {
                Ok(outcome) => {
                    result.files_converted += 1;
                    result.stats.merge(&outcome.stats);
                }
                Err(e) => result.fail(&name, "convert", &e),
            }
        }
        Ok(result)
    }

    async fn convert_one(
        &self,
        cat: &CatalogConfig,
        adapter: Arc<dyn CatalogAdapter>,
        source: &Path,
    ) -> Result<ConvertOutcome> {
        let name = display_name(source);
        let started = Instant::now();
        let source_path = source.to_path_buf();
        let staged_dir = self.config.staged_dir(&cat.name);
        let rejects_dir = self.config.rejects_dir(&cat.name);
        let cuts = cat.cuts;

        let outcome = tokio::task::spawn_blocking(move || {
            convert_file(&source_path, &staged_dir, &rejects_dir, adapter.as_ref(), cuts)
        })
        .await??;

        self.manifest.record_staged(
            &cat.name,
            &name,
            &outcome.staged_path,
            outcome.stats.rows_read,
            outcome.stats.accepted,
        )?;
        info!(
            "🔧 {} staged {} of {} rows in {:.1}s",
            name,
            outcome.stats.accepted,
            outcome.stats.rows_read,
            started.elapsed().as_secs_f64()
        );
        Ok(outcome)
    }

    /// Load staged files that have not yet been loaded into the sink's target.
    #[instrument(skip(self, opts), fields(target = %self.sink.describe()))]
    pub async fn load(&self, catalog: &str, opts: &RunOptions) -> Result<PipelineResult> {
        let cat = self.config.catalog(catalog)?;
        if opts.replace && self.sink.is_dry_run() {
            return Err(IngestError::Safety(
                "--replace rolls back loaded batches and requires --commit".to_string(),
            ));
        }
        let mut result = PipelineResult::new(catalog, self.sink.as_ref());
        let staged = list_local(&self.config.staged_dir(&cat.name), ".csv")?;
        result.files_seen = staged.len();
        if staged.is_empty() {
            info!("No staged files for {}", catalog);
            return Ok(result);
        }
        self.sink.prepare(&cat.table).await?;

        for path in &staged {
            let name = display_name(path);
            match self.load_one(cat, path, &name, opts.replace, &mut result).await {
                Ok(Some(report)) => {
                    result.files_loaded += 1;
                    result.rows_inserted += report.rows_inserted;
                    result.batches.push(report);
                }
                Ok(None) => result.files_skipped += 1,
                Err(e) => result.fail(&name, "load", &e),
            }
        }
        Ok(result)
    }

    async fn load_one(
        &self,
        cat: &CatalogConfig,
        path: &Path,
        name: &str,
        replace: bool,
        result: &mut PipelineResult,
    ) -> Result<Option<LoadReport>> {
        let target = self.sink.describe();
        let prior = self.manifest.loads_for(&cat.name, name, &target)?;
        if !prior.is_empty() && !replace {
            debug!("{} already loaded into {}", name, target);
            return Ok(None);
        }
        let prior_ids = prior
            .iter()
            .map(|load| {
                Uuid::parse_str(&load.batch_id)
                    .map_err(|e| IngestError::Config(format!("bad batch id in manifest: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let staged_path = path.to_path_buf();
        let rows = tokio::task::spawn_blocking(move || read_staged(&staged_path)).await??;
        let batch = LoadBatch::new(&cat.name, &cat.table, name);
        let report = if prior_ids.is_empty() {
            self.sink.load_batch(&batch, &rows).await?
        } else {
            let replaced = self.sink.replace_batches(&prior_ids, &batch, &rows).await?;
            warn!(
                "Replacing {}: rolled back {} batches ({} rows)",
                name,
                prior_ids.len(),
                replaced.rows_rolled_back
            );
            result.rows_rolled_back += replaced.rows_rolled_back;
            replaced.load
        };
        if !report.dry_run {
            for batch_id in &prior_ids {
                self.manifest.forget_load(*batch_id)?;
            }
            self.manifest
                .record_load(&cat.name, name, &target, batch.batch_id, report.rows_inserted)?;
        }
        info!(
            "💾 {} → {}: {} rows (batch {}{})",
            name,
            cat.table,
            if report.dry_run { report.rows_offered } else { report.rows_inserted },
            batch.batch_id,
            if report.dry_run { ", dry run" } else { "" }
        );
        Ok(Some(report))
    }

    /// Download, convert and load, one source file at a time.
    ///
    /// With `opts.files` the remote is not consulted.
    #[instrument(skip(self, opts))]
    pub async fn run(&self, catalog: &str, opts: &RunOptions) -> Result<PipelineResult> {
        let started = Instant::now();
        counter!("cat_ingest_runs_total", "catalog" => catalog.to_string()).increment(1);
        let mut result = if opts.files.is_empty() {
            self.fetch_and_convert(catalog, opts).await?
        } else {
            self.convert(catalog, opts).await?
        };
        let loaded = self.load(catalog, opts).await?;
        result.absorb(loaded);
        info!(
            "Run for {} finished in {:.1}s with {} errors",
            catalog,
            started.elapsed().as_secs_f64(),
            result.errors.len()
        );
        Ok(result)
    }

    async fn fetch_and_convert(&self, catalog: &str, opts: &RunOptions) -> Result<PipelineResult> {
        let cat = self.config.catalog(catalog)?;
        let adapter = self.registry.get(catalog)?;
        let mut result = PipelineResult::new(catalog, self.sink.as_ref());
        let urls = self.list(catalog).await?;
        result.files_seen = urls.len();
        let raw_dir = self.config.raw_dir(&cat.name);

        for url in urls.iter().take(opts.limit.unwrap_or(usize::MAX)) {
            let name = file_name_from_url(url);
            if !opts.force && self.manifest.is_staged(&cat.name, &name)? {
                debug!("{} already staged", name);
                result.files_skipped += 1;
                continue;
            }

            let dest = raw_dir.join(&name);
            let reuse = dest.exists() && (opts.keep_raw || self.matches_download(cat, &name, &dest).await?);
            if reuse {
                debug!("Reusing {}", dest.display());
            } else {
                info!("📡 Fetching {}", url);
                match self.download(cat, url, &name, &dest).await {
                    Ok(bytes) => {
                        result.files_downloaded += 1;
                        result.bytes_downloaded += bytes;
                    }
                    Err(e) => {
                        result.fail(&name, "fetch", &e);
                        continue;
                    }
                }
            }

            match self.convert_one(cat, adapter.clone(), &dest).await {
                Ok(outcome) => {
                    result.files_converted += 1;
                    result.stats.merge(&outcome.stats);
                    if !opts.keep_raw {
                        if let Err(e) = std::fs::remove_file(&dest) {
                            warn!("Could not remove {}: {}", dest.display(), e);
                        }
                    }
                }
                // the raw file stays for inspection and the next run
                Err(e) => result.fail(&name, "convert", &e),
            }
        }
        Ok(result)
    }

    /// Roll back one batch; a dry-run sink only reports the row count.
    pub async fn rollback(&self, batch_id: Uuid) -> Result<u64> {
        let deleted = self.sink.rollback_batch(batch_id).await?;
        if !self.sink.is_dry_run() {
            self.manifest.forget_load(batch_id)?;
        }
        Ok(deleted)
    }

    pub async fn batches(&self) -> Result<Vec<BatchRecord>> {
        self.sink.list_batches().await
    }
}

/// Files directly under `dir` whose names end with `ext`, sorted by name.
/// A missing directory has no files.
fn list_local(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(ext))
            .unwrap_or(false);
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_local_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv.gz", "a.csv.gz", "a.csv.gz.tmp", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let files: Vec<String> = list_local(dir.path(), "gz")
            .unwrap()
            .iter()
            .map(|p| display_name(p))
            .collect();
        assert_eq!(files, vec!["a.csv.gz", "b.csv.gz"]);
    }

    #[test]
    fn test_list_local_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_local(&dir.path().join("nope"), "csv").unwrap().is_empty());
    }
}
