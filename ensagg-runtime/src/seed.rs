//! Registering synthetic ensembles, for local runs and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use ensagg_codec::write_parquet_to_memory;
use ensagg_metadata::checksum_md5;
use ensagg_result::{Result, StoreError, is_success_status};
use ensagg_storage::{ObjectId, ObjectStore, uuid_from_string};
use serde_json::{Value, json};

use crate::query::TableQuery;

/// Name, tag, iteration, content and index columns of a logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentity {
    pub name: String,
    pub tagname: String,
    pub iteration: String,
    pub content: String,
    pub table_index: Vec<String>,
}

impl Default for TableIdentity {
    fn default() -> Self {
        Self {
            name: "summary".to_string(),
            tagname: "eclipse".to_string(),
            iteration: "iter-0".to_string(),
            content: "timeseries".to_string(),
            table_index: vec!["DATE".to_string()],
        }
    }
}

/// A registered case object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseHandle {
    pub id: ObjectId,
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct EnsembleSeed {
    pub case_name: String,
    pub table: TableIdentity,
    pub realizations: Vec<i32>,
    pub dates: Vec<String>,
    pub vectors: Vec<String>,
}

impl EnsembleSeed {
    /// `realizations` members, four monthly dates, three summary vectors.
    pub fn new(case_name: impl Into<String>, realizations: usize) -> Self {
        Self {
            case_name: case_name.into(),
            table: TableIdentity::default(),
            realizations: (0..realizations as i32).collect(),
            dates: ["2020-01-01", "2020-02-01", "2020-03-01", "2020-04-01"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            vectors: ["FGPT", "FOPT", "FWPT"].iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn with_vectors(mut self, vectors: &[&str]) -> Self {
        self.vectors = vectors.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_dates(mut self, dates: &[&str]) -> Self {
        self.dates = dates.iter().map(|d| d.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone)]
pub struct SeededEnsemble {
    pub case: CaseHandle,
    pub table: TableIdentity,
    /// Object id of each realization's table.
    pub realizations: BTreeMap<i32, ObjectId>,
}

impl SeededEnsemble {
    pub fn query(&self) -> TableQuery {
        TableQuery::new(
            &self.case.uuid,
            &self.table.name,
            &self.table.tagname,
            &self.table.iteration,
        )
    }
}

/// `[DATE, vectors...]` with values that depend on realization, vector and date.
///
/// Vector `k` at date `d` of realization `r` is `100 * (k + 1) + 10 * d + r`.
pub fn synthetic_table(realization_id: i32, dates: &[String], vectors: &[String]) -> Result<RecordBatch> {
    let mut fields = vec![Field::new("DATE", DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from_iter_values(dates))];
    for (k, vector) in vectors.iter().enumerate() {
        fields.push(Field::new(vector, DataType::Float64, true));
        let values = (0..dates.len())
            .map(|d| 100.0 * (k as f64 + 1.0) + 10.0 * d as f64 + f64::from(realization_id));
        columns.push(Arc::new(Float64Array::from_iter_values(values)));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Register a root case object.
pub async fn register_case(store: &dyn ObjectStore, case_name: &str) -> Result<CaseHandle> {
    let uuid = uuid_from_string(case_name).to_string();
    let metadata = json!({
        "class": "case",
        "fmu": {"case": {"uuid": uuid, "name": case_name}},
        "file": {"relative_path": ""},
    });
    let id = register(store, &ObjectId::default(), &metadata, None).await?;
    tracing::debug!(case = case_name, id = %id, "registered case");
    Ok(CaseHandle {
        id,
        uuid,
        name: case_name.to_string(),
    })
}

/// Store `table` as the Parquet copy of `identity` for one realization.
pub async fn upload_realization_table(
    store: &dyn ObjectStore,
    case: &CaseHandle,
    identity: &TableIdentity,
    realization_id: i32,
    table: &RecordBatch,
) -> Result<ObjectId> {
    let bytes = write_parquet_to_memory(table)?;
    let columns: Vec<String> = table
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let metadata = json!({
        "class": "table",
        "data": {
            "name": identity.name,
            "tagname": identity.tagname,
            "content": identity.content,
            "format": "parquet",
            "table_index": identity.table_index,
            "spec": {
                "columns": columns,
                "num_rows": table.num_rows(),
                "num_columns": table.num_columns(),
            },
        },
        "file": {
            "relative_path": format!(
                "realization-{realization_id}/{}/share/results/tables/{}--{}.parquet",
                identity.iteration, identity.name, identity.tagname
            ),
            "checksum_md5": checksum_md5(&bytes),
            "size_bytes": bytes.len(),
        },
        "fmu": {
            "case": {"uuid": case.uuid, "name": case.name},
            "iteration": {"name": identity.iteration},
            "realization": {
                "id": realization_id,
                "name": format!("realization-{realization_id}"),
                "parameters": {
                    "MULTFLT": 1.0 + 0.1 * f64::from(realization_id),
                    "SEED": realization_id,
                },
            },
        },
    });
    register(store, &case.id, &metadata, Some(bytes)).await
}

/// Register a case plus one synthetic table per realization.
pub async fn seed_ensemble(store: &dyn ObjectStore, seed: &EnsembleSeed) -> Result<SeededEnsemble> {
    let case = register_case(store, &seed.case_name).await?;
    let mut realizations = BTreeMap::new();
    for &realization_id in &seed.realizations {
        let table = synthetic_table(realization_id, &seed.dates, &seed.vectors)?;
        let id = upload_realization_table(store, &case, &seed.table, realization_id, &table).await?;
        realizations.insert(realization_id, id);
    }
    tracing::info!(
        case = %case.uuid,
        realizations = realizations.len(),
        vectors = seed.vectors.len(),
        "seeded ensemble"
    );
    Ok(SeededEnsemble {
        case,
        table: seed.table.clone(),
        realizations,
    })
}

async fn register(
    store: &dyn ObjectStore,
    parent_id: &ObjectId,
    metadata: &Value,
    blob: Option<Bytes>,
) -> Result<ObjectId> {
    let registration = store.post_metadata(parent_id, metadata).await?;
    if !is_success_status(registration.status) {
        return Err(StoreError::status(registration.status, "metadata registration rejected").into());
    }
    let id = registration
        .object_id
        .ok_or_else(|| StoreError::status(registration.status, "registration returned no object id"))?;
    if let Some(bytes) = blob {
        let url = registration
            .blob_url
            .ok_or_else(|| StoreError::status(registration.status, "registration returned no blob url"))?;
        let status = store.put_blob(&url, bytes).await?;
        if !is_success_status(status) {
            return Err(StoreError::status(status, "blob upload rejected").into());
        }
    }
    Ok(id)
}
