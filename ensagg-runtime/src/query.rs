//! Locating the realization tables of one logical table.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use ensagg_aggregate::REAL_COLUMN;
use ensagg_metadata::{Metadata, MetadataStub, ParameterSet};
use ensagg_result::{Error, Result};
use ensagg_storage::{ObjectId, ObjectStore, SearchFilter, SearchHit, SearchRequest};
use serde::{Deserialize, Serialize};

use crate::orchestrator::RealizationHandle;

const PIT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Identity of one logical table within a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQuery {
    pub case_uuid: String,
    pub name: String,
    /// Empty matches any tag.
    #[serde(default)]
    pub tagname: String,
    pub iteration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl TableQuery {
    pub fn new(
        case_uuid: impl Into<String>,
        name: impl Into<String>,
        tagname: impl Into<String>,
        iteration: impl Into<String>,
    ) -> Self {
        Self {
            case_uuid: case_uuid.into(),
            name: name.into(),
            tagname: tagname.into(),
            iteration: iteration.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Filter selecting the realization (non-aggregated) copies of the table.
    pub fn filter(&self) -> SearchFilter {
        let filter = SearchFilter::case_tables(&self.case_uuid)
            .with_name(&self.name)
            .with_tagname(&self.tagname)
            .with_iteration(&self.iteration)
            .without_aggregations();
        match &self.content {
            Some(content) => filter.with_content(content),
            None => filter,
        }
    }
}

/// Every hit matching `filter`, paged through one point-in-time snapshot.
pub async fn collect_hits(
    store: &dyn ObjectStore,
    filter: SearchFilter,
    page_size: usize,
) -> Result<Vec<SearchHit>> {
    let pit = store.open_point_in_time(PIT_KEEP_ALIVE).await?;
    let paged = page_through(store, filter, page_size.max(1), &pit).await;
    if let Err(err) = store.close_point_in_time(&pit).await {
        tracing::debug!(pit = %pit, error = %err, "failed to close point in time");
    }
    paged
}

async fn page_through(
    store: &dyn ObjectStore,
    filter: SearchFilter,
    page_size: usize,
    pit: &str,
) -> Result<Vec<SearchHit>> {
    let mut request = SearchRequest::new(filter, page_size);
    request.pit = Some(pit.to_string());

    let mut hits: Vec<SearchHit> = Vec::new();
    let mut total = 0u64;
    loop {
        let page = store.search(&request).await?;
        total = total.max(page.total);
        let page_len = page.hits.len();
        request.search_after = page.hits.last().map(|hit| hit.id.clone());
        hits.extend(page.hits);
        if page_len < page_size || hits.len() as u64 >= total {
            break;
        }
    }

    if (hits.len() as u64) < total {
        tracing::warn!(
            fetched = hits.len(),
            total,
            "search result truncated; aggregating the hits that were returned"
        );
    }
    tracing::debug!(hits = hits.len(), "search complete");
    Ok(hits)
}

/// Realization copies of the table described by `query`.
pub async fn query_realizations(
    store: &dyn ObjectStore,
    query: &TableQuery,
    page_size: usize,
) -> Result<Vec<SearchHit>> {
    collect_hits(store, query.filter(), page_size).await
}

/// Everything an aggregation run needs from the query result.
#[derive(Debug, Clone)]
pub struct QuerySplit {
    /// Object the artifacts are registered under.
    pub parent_id: ObjectId,
    /// Sorted by realization id.
    pub handles: Vec<RealizationHandle>,
    pub stub: Arc<MetadataStub>,
    pub table_index: Vec<String>,
    /// Union of the column lists in the realization metadata. Empty when no hit lists
    /// its columns.
    pub required_columns: BTreeSet<String>,
    /// Payload checksum per realization, for those hits that carry one.
    pub checksums: BTreeMap<i32, String>,
}

impl QuerySplit {
    /// Whether every realization reports the same payload checksum.
    ///
    /// Needs more than one handle and a checksum for each of them.
    pub fn identical_checksums(&self) -> bool {
        if self.handles.len() < 2 || self.checksums.len() != self.handles.len() {
            return false;
        }
        let mut checksums = self.checksums.values();
        let first = checksums.next();
        checksums.all(|c| Some(c) == first)
    }

    pub fn realization_ids(&self) -> Vec<i32> {
        self.handles.iter().map(|h| h.realization_id).collect()
    }
}

/// Turn search hits into handles plus the shared metadata stub.
///
/// Hits without a realization block, or already describing an aggregation, are skipped.
/// When two hits claim the same realization the first one wins.
pub fn split_hits(hits: Vec<SearchHit>) -> Result<QuerySplit> {
    let mut representative: Option<Metadata> = None;
    let mut parent_id: Option<ObjectId> = None;
    let mut handles: BTreeMap<i32, ObjectId> = BTreeMap::new();
    let mut parameters = ParameterSet::new();
    let mut columns = BTreeSet::new();
    let mut checksums = BTreeMap::new();

    for hit in hits {
        let metadata = match Metadata::from_value(hit.source) {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(object_id = %hit.id, error = %err, "skipping hit with unreadable metadata");
                continue;
            }
        };
        if metadata.fmu.aggregation.is_some() {
            tracing::debug!(object_id = %hit.id, "skipping aggregated object");
            continue;
        }
        let Some(realization) = metadata.fmu.realization.as_ref() else {
            tracing::warn!(object_id = %hit.id, "skipping hit without a realization block");
            continue;
        };
        let realization_id = realization.id;
        if let Some(existing) = handles.get(&realization_id) {
            tracing::warn!(
                realization = realization_id,
                kept = %existing,
                ignored = %hit.id,
                "duplicate realization; keeping the first object"
            );
            continue;
        }

        parameters.add_realization(realization_id, &realization.parameters);
        columns.extend(
            metadata
                .columns()
                .iter()
                .filter(|c| c.as_str() != REAL_COLUMN)
                .cloned(),
        );
        if let Some(checksum) = metadata.file.checksum_md5.as_ref() {
            checksums.insert(realization_id, checksum.clone());
        }
        handles.insert(realization_id, hit.id);

        if representative.is_none() {
            parent_id = metadata.parent_object().or_else(|| {
                metadata
                    .fmu
                    .case
                    .as_ref()
                    .map(|case| ObjectId::from(case.uuid.as_str()))
            });
            representative = Some(metadata);
        }
    }

    let Some(representative) = representative else {
        return Err(Error::NotFound(
            "no realization tables matched the query".into(),
        ));
    };
    let parent_id = parent_id.ok_or_else(|| {
        Error::InvalidArgumentError("realization metadata names no parent object".into())
    })?;

    let realization_ids: Vec<i32> = handles.keys().copied().collect();
    let stub = MetadataStub::from_realization(&representative, &realization_ids, &parameters)?;
    let table_index = stub.table_index().to_vec();
    if !columns.is_empty() {
        columns.extend(table_index.iter().cloned());
    }

    Ok(QuerySplit {
        parent_id,
        handles: handles
            .into_iter()
            .map(|(realization_id, object_id)| RealizationHandle {
                realization_id,
                object_id,
            })
            .collect(),
        stub: Arc::new(stub),
        table_index,
        required_columns: columns,
        checksums,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn hit(id: &str, realization: Option<i32>, columns: &[&str], checksum: &str) -> SearchHit {
        let mut source = json!({
            "class": "table",
            "data": {
                "name": "summary",
                "tagname": "eclipse",
                "table_index": ["DATE"],
                "spec": {"columns": columns},
            },
            "file": {"relative_path": format!("{id}.parquet"), "checksum_md5": checksum},
            "fmu": {"case": {"uuid": "case-1"}, "iteration": {"name": "iter-0"}},
            "_sumo": {"parent_object": "case-1"},
        });
        if let Some(id) = realization {
            source["fmu"]["realization"] =
                json!({"id": id, "name": format!("realization-{id}"), "parameters": {"MULT": id}});
        }
        SearchHit {
            id: ObjectId::from(id),
            source,
        }
    }

    #[test]
    fn splits_hits_into_handles_and_stub() {
        let split = split_hits(vec![
            hit("b", Some(1), &["DATE", "FOPT"], "x1"),
            hit("a", Some(0), &["DATE", "FWPT", "REAL"], "x0"),
            hit("dup", Some(0), &["DATE"], "x9"),
            hit("nope", None, &["DATE"], "x8"),
        ])
        .unwrap();

        assert_eq!(split.parent_id, ObjectId::from("case-1"));
        assert_eq!(split.realization_ids(), vec![0, 1]);
        assert_eq!(split.handles[0].object_id, ObjectId::from("a"));
        assert_eq!(split.table_index, vec!["DATE".to_string()]);
        assert_eq!(
            split.required_columns.iter().cloned().collect::<Vec<_>>(),
            vec!["DATE", "FOPT", "FWPT"]
        );
        assert!(!split.identical_checksums());

        let aggregation = split.stub.aggregation().unwrap();
        assert_eq!(aggregation.realization_ids, vec![0, 1]);
        let params = aggregation.parameters.as_ref().unwrap();
        assert_eq!(params.pointer("/MULT/1"), Some(&Value::from(1)));
    }

    #[test]
    fn identical_checksums_are_detected() {
        let split = split_hits(vec![
            hit("a", Some(0), &["DATE", "FOPT"], "same"),
            hit("b", Some(1), &["DATE", "FOPT"], "same"),
        ])
        .unwrap();
        assert!(split.identical_checksums());
    }

    #[test]
    fn no_usable_hits_is_not_found() {
        let err = split_hits(vec![hit("x", None, &[], "c")]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{err}");
    }

    #[test]
    fn filter_excludes_aggregations() {
        let filter = TableQuery::new("case-1", "summary", "", "iter-0").filter();
        assert!(filter.exclude_aggregations);
        assert_eq!(filter.tagname, None);
        assert_eq!(filter.iteration.as_deref(), Some("iter-0"));
    }
}
