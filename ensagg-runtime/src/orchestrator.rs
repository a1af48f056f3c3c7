//! Fan-out over realizations, fan-in into one unified table.

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use ensagg_aggregate::{concat_reconciled, reconcile, required_from_tables};
use ensagg_result::{Error, FetchError, Result};
use ensagg_storage::ObjectId;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::fetch::BlobFetcher;

/// One realization's copy of a logical table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RealizationHandle {
    pub realization_id: i32,
    pub object_id: ObjectId,
}

impl RealizationHandle {
    pub fn new(realization_id: i32, object_id: impl Into<ObjectId>) -> Self {
        Self {
            realization_id,
            object_id: object_id.into(),
        }
    }
}

/// Result of [`Orchestrator::aggregate`].
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    /// `[REAL, required columns sorted...]`, rows grouped by ascending realization.
    pub table: RecordBatch,
    /// Realizations present in `table`, ascending.
    pub realizations: Vec<i32>,
    /// Realizations that were dropped, with the reason.
    pub failed: Vec<(i32, FetchError)>,
    /// Type conflicts resolved during concatenation.
    pub mismatches: Vec<String>,
}

impl AggregationOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct Orchestrator {
    fetcher: BlobFetcher,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(fetcher: BlobFetcher, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch and reconcile every handle, then concatenate.
    ///
    /// At most `concurrency` fetches run at once. A realization that fails is recorded in
    /// [`AggregationOutcome::failed`] and left out; only when nothing could be fetched
    /// does the call fail, with [`Error::EmptyAggregation`].
    ///
    /// An empty `required` set falls back to the union of the fetched tables' columns.
    pub async fn aggregate(
        &self,
        handles: &[RealizationHandle],
        required: &BTreeSet<String>,
    ) -> Result<AggregationOutcome> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let required = Arc::new(required.clone());
        let mut tasks = JoinSet::new();

        for handle in handles.iter().cloned() {
            let fetcher = self.fetcher.clone();
            let permits = Arc::clone(&permits);
            let required = Arc::clone(&required);
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => fetch_and_reconcile(&fetcher, &handle, &required).await,
                    Err(_) => Err(FetchError::Permanent {
                        object_id: handle.object_id.to_string(),
                        reason: "fetch pool closed".to_string(),
                    }),
                };
                (handle.realization_id, outcome)
            });
        }

        let mut fetched: Vec<(i32, RecordBatch)> = Vec::with_capacity(handles.len());
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (realization_id, outcome) =
                joined.map_err(|e| Error::Internal(format!("fetch task panicked: {e}")))?;
            match outcome {
                Ok(table) => fetched.push((realization_id, table)),
                Err(err) => {
                    tracing::warn!(realization = realization_id, error = %err, "dropping realization");
                    failed.push((realization_id, err));
                }
            }
        }

        if fetched.is_empty() {
            return Err(Error::EmptyAggregation {
                attempted: handles.len(),
            });
        }
        fetched.sort_by_key(|(realization_id, _)| *realization_id);
        failed.sort_by_key(|(realization_id, _)| *realization_id);

        let reconciled = if required.is_empty() {
            let union = required_from_tables(fetched.iter().map(|(_, table)| table));
            tracing::debug!(columns = union.len(), "required columns taken from fetched tables");
            fetched
                .iter()
                .map(|(realization_id, table)| reconcile(table, *realization_id, &union))
                .collect::<Result<Vec<_>>>()?
        } else {
            fetched.iter().map(|(_, table)| table.clone()).collect()
        };

        let unified = concat_reconciled(&reconciled)?;
        let realizations: Vec<i32> = fetched.iter().map(|(id, _)| *id).collect();
        tracing::info!(
            contributing = realizations.len(),
            failed = failed.len(),
            rows = unified.table.num_rows(),
            columns = unified.table.num_columns(),
            "aggregated realizations"
        );

        Ok(AggregationOutcome {
            table: unified.table,
            realizations,
            failed,
            mismatches: unified.mismatches,
        })
    }
}

/// Fetch one handle and, when the required set is known, reconcile it right away.
async fn fetch_and_reconcile(
    fetcher: &BlobFetcher,
    handle: &RealizationHandle,
    required: &BTreeSet<String>,
) -> std::result::Result<RecordBatch, FetchError> {
    let table = fetcher.fetch(&handle.object_id).await?;
    if required.is_empty() {
        return Ok(table);
    }
    reconcile(&table, handle.realization_id, required).map_err(|e| FetchError::Permanent {
        object_id: handle.object_id.to_string(),
        reason: format!("reconcile failed: {e}"),
    })
}
