//! End-to-end aggregation of one logical table.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use ensagg_aggregate::{Decomposition, StatisticsEngine, StatisticsReport, decompose};
use ensagg_metadata::{Artifact, MetadataStub, Operation, build_artifact};
use ensagg_result::{Error, Result};
use ensagg_storage::ObjectStore;
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::dispatch::DispatchTask;
use crate::fetch::BlobFetcher;
use crate::orchestrator::Orchestrator;
use crate::query::{TableQuery, query_realizations, split_hits};
use crate::upload::UploadCoordinator;

/// Artifact name of the optional whole-table collection.
pub const GRAND_AGGREGATION_NAME: &str = "aggregated";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Restrict the run to these vectors. Empty aggregates every column.
    pub columns: Vec<String>,
}

impl RunOptions {
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Summary of one [`AggregationRunner::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub parent_id: String,
    /// Realizations that contributed, ascending.
    pub realizations: Vec<i32>,
    /// `(realization, reason)` for every realization that was dropped.
    pub failed_realizations: Vec<(i32, String)>,
    pub artifacts_built: usize,
    pub uploaded: usize,
    pub upload_failures: Vec<String>,
    /// Non-numeric vectors that only got a collection artifact.
    pub skipped_vectors: Vec<String>,
    pub elapsed: Duration,
}

/// Drives query, aggregation, statistics and upload for one logical table at a time.
pub struct AggregationRunner {
    store: Arc<dyn ObjectStore>,
    config: RuntimeConfig,
    engine: Arc<StatisticsEngine>,
}

impl AggregationRunner {
    pub fn new(store: Arc<dyn ObjectStore>, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let engine = Arc::new(StatisticsEngine::new(config.stats_threads)?);
        tracing::debug!(stats_threads = engine.threads(), "created aggregation runner");
        Ok(Self {
            store,
            config,
            engine,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub async fn run_task(&self, task: &DispatchTask) -> Result<RunReport> {
        let options = RunOptions {
            columns: task.columns.clone(),
        };
        self.run(&task.query(), &options).await
    }

    /// Aggregate the table described by `query` and upload the artifacts.
    ///
    /// Succeeds when at least one artifact was uploaded. Missing realizations and failed
    /// uploads are reported, not raised.
    pub async fn run(&self, query: &TableQuery, options: &RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        tracing::info!(
            case = %query.case_uuid,
            table = %query.name,
            tag = %query.tagname,
            iteration = %query.iteration,
            columns = options.columns.len(),
            "starting aggregation"
        );

        let hits = query_realizations(self.store.as_ref(), query, self.config.page_size).await?;
        let split = split_hits(hits)?;
        let required = select_columns(&split.required_columns, &split.table_index, &options.columns);
        let handles = if split.identical_checksums() {
            tracing::warn!(
                realizations = split.handles.len(),
                "every realization has the same checksum; aggregating one representative object"
            );
            split.handles[..1].to_vec()
        } else {
            split.handles.clone()
        };
        let query_done = Instant::now();

        let fetcher = BlobFetcher::new(Arc::clone(&self.store), &self.config);
        let outcome = Orchestrator::new(fetcher, self.config.fetch_concurrency)
            .aggregate(&handles, &required)
            .await?;
        for mismatch in &outcome.mismatches {
            tracing::warn!(detail = %mismatch, "schema mismatch resolved by cast");
        }
        let fetch_done = Instant::now();

        let stub = split
            .stub
            .as_ref()
            .clone()
            .with_realization_ids(&outcome.realizations);
        let mut parts = decompose(&outcome.table, &split.table_index)?;
        if !options.columns.is_empty() {
            parts
                .collections
                .retain(|name, _| options.columns.iter().any(|c| c == name));
        }

        let engine = Arc::clone(&self.engine);
        let collections = parts.collections.clone();
        let table_index = split.table_index.clone();
        let ops = self.config.statistics.clone();
        let statistics = tokio::task::spawn_blocking(move || {
            engine.compute(&collections, &table_index, &ops)
        })
        .await
        .map_err(|e| Error::Internal(format!("statistics task failed: {e}")))?;
        let stats_done = Instant::now();

        let grand = self
            .config
            .keep_grand_aggregation
            .then_some(&outcome.table);
        let artifacts = build_artifacts(&stub, &parts, &statistics, grand);
        let artifacts_built = artifacts.len();
        if artifacts.is_empty() {
            return Err(Error::NothingUploaded { attempted: 0 });
        }

        let upload = UploadCoordinator::new(Arc::clone(&self.store), &self.config)
            .upload_all(&split.parent_id, artifacts)
            .await?;
        let upload_done = Instant::now();

        tracing::info!(
            query_ms = ms(query_done - started),
            fetch_ms = ms(fetch_done - query_done),
            statistics_ms = ms(stats_done - fetch_done),
            upload_ms = ms(upload_done - stats_done),
            realizations = outcome.realizations.len(),
            failed_realizations = outcome.failed.len(),
            artifacts = artifacts_built,
            uploaded = upload.uploaded.len(),
            "aggregation finished"
        );

        if upload.uploaded.is_empty() {
            return Err(Error::NothingUploaded {
                attempted: upload.attempted(),
            });
        }

        Ok(RunReport {
            parent_id: split.parent_id.to_string(),
            realizations: outcome.realizations,
            failed_realizations: outcome
                .failed
                .iter()
                .map(|(id, err)| (*id, err.to_string()))
                .collect(),
            artifacts_built,
            uploaded: upload.uploaded.len(),
            upload_failures: upload.failures.iter().map(ToString::to_string).collect(),
            skipped_vectors: statistics.skipped,
            elapsed: started.elapsed(),
        })
    }
}

fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Columns to fetch: the required set narrowed to `subset`, index columns always kept.
fn select_columns(
    required: &BTreeSet<String>,
    table_index: &[String],
    subset: &[String],
) -> BTreeSet<String> {
    if subset.is_empty() {
        return required.clone();
    }
    let mut selected: BTreeSet<String> = if required.is_empty() {
        subset.iter().cloned().collect()
    } else {
        subset
            .iter()
            .filter(|c| required.contains(*c))
            .cloned()
            .collect()
    };
    selected.extend(table_index.iter().cloned());
    selected
}

/// Collection, index and statistic artifacts, plus the grand aggregation when given.
///
/// A table that fails to encode is logged and left out.
fn build_artifacts(
    stub: &MetadataStub,
    parts: &Decomposition,
    statistics: &StatisticsReport,
    grand: Option<&RecordBatch>,
) -> Vec<Artifact> {
    let mut units: Vec<(&str, Operation, &RecordBatch)> = Vec::new();
    for (name, table) in &parts.collections {
        units.push((name.as_str(), Operation::Collection, table));
    }
    for (name, table) in &parts.indexes {
        units.push((name.as_str(), Operation::Index, table));
    }
    for (name, by_op) in &statistics.tables {
        for (op, table) in by_op {
            units.push((name.as_str(), *op, table));
        }
    }
    if let Some(table) = grand {
        units.push((GRAND_AGGREGATION_NAME, Operation::Collection, table));
    }

    units
        .into_iter()
        .filter_map(|(name, op, table)| match build_artifact(stub, table, name, op) {
            Ok(artifact) => Some(artifact),
            Err(err) => {
                tracing::warn!(artifact = name, operation = %op, error = %err, "failed to build artifact");
                None
            }
        })
        .collect()
}
