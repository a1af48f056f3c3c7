//! Partitioning a case into independent aggregation tasks.

use std::collections::{BTreeMap, BTreeSet};

use ensagg_aggregate::REAL_COLUMN;
use ensagg_metadata::{DEFAULT_TABLE_INDEX, Metadata};
use ensagg_result::{Error, Result};
use ensagg_storage::{ObjectStore, SearchFilter};
use serde::{Deserialize, Serialize};

use crate::query::{TableQuery, collect_hits};

/// Split `items` into consecutive segments of `segment_length`; the last one may be shorter.
pub fn split_list<T: Clone>(items: &[T], segment_length: usize) -> Result<Vec<Vec<T>>> {
    if segment_length == 0 {
        return Err(Error::InvalidArgumentError(
            "segment length must be at least 1".into(),
        ));
    }
    Ok(items
        .chunks(segment_length)
        .map(<[T]>::to_vec)
        .collect())
}

/// One unit of work for a batch worker: a logical table and a slice of its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTask {
    pub case_uuid: String,
    pub iteration: String,
    pub name: String,
    pub tagname: String,
    pub table_index: Vec<String>,
    /// Vectors to aggregate. Empty means every column of the table.
    pub columns: Vec<String>,
}

impl DispatchTask {
    pub fn query(&self) -> TableQuery {
        TableQuery::new(&self.case_uuid, &self.name, &self.tagname, &self.iteration)
    }
}

#[derive(Default)]
struct TableGroup {
    table_index: Option<Vec<String>>,
    columns: BTreeSet<String>,
}

/// Scan every realization table of a case and emit one task per column segment.
///
/// Tables are grouped by `(iteration, name, tagname)`; their column lists are merged,
/// index columns and `REAL` are removed, and the rest is split into segments of
/// `segment_length`. Output order is deterministic.
pub async fn generate_dispatch_info(
    store: &dyn ObjectStore,
    case_uuid: &str,
    segment_length: usize,
    page_size: usize,
) -> Result<Vec<DispatchTask>> {
    if segment_length == 0 {
        return Err(Error::InvalidArgumentError(
            "segment length must be at least 1".into(),
        ));
    }
    let filter = SearchFilter::case_tables(case_uuid).without_aggregations();
    let hits = collect_hits(store, filter, page_size).await?;

    let mut groups: BTreeMap<(String, String, String), TableGroup> = BTreeMap::new();
    for hit in hits {
        let metadata = match Metadata::from_value(hit.source) {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(object_id = %hit.id, error = %err, "skipping unreadable metadata");
                continue;
            }
        };
        if metadata.fmu.realization.is_none() {
            continue;
        }
        let key = (
            metadata.iteration_name().to_string(),
            metadata.data.name.clone(),
            metadata.tagname().to_string(),
        );
        let group = groups.entry(key).or_default();
        if group.table_index.is_none() {
            group.table_index = metadata.table_index().map(<[String]>::to_vec);
        }
        group.columns.extend(metadata.columns().iter().cloned());
    }

    let mut tasks = Vec::new();
    for ((iteration, name, tagname), group) in groups {
        let table_index = group
            .table_index
            .unwrap_or_else(|| DEFAULT_TABLE_INDEX.iter().map(|c| c.to_string()).collect());
        let columns: Vec<String> = group
            .columns
            .into_iter()
            .filter(|c| c != REAL_COLUMN && !table_index.contains(c))
            .collect();
        let segments = if columns.is_empty() {
            vec![Vec::new()]
        } else {
            split_list(&columns, segment_length)?
        };
        tracing::debug!(
            iteration = %iteration,
            table = %name,
            tag = %tagname,
            columns = columns.len(),
            segments = segments.len(),
            "dispatching table"
        );
        for segment in segments {
            tasks.push(DispatchTask {
                case_uuid: case_uuid.to_string(),
                iteration: iteration.clone(),
                name: name.clone(),
                tagname: tagname.clone(),
                table_index: table_index.clone(),
                columns: segment,
            });
        }
    }
    tracing::info!(tasks = tasks.len(), "generated dispatch info");
    Ok(tasks)
}
