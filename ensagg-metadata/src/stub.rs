use std::collections::BTreeMap;

use ensagg_result::Result;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::artifact::Operation;
use crate::document::{AggregationBlock, Metadata, TableSpec};

/// Grouping columns used when a table's metadata names none.
pub const DEFAULT_TABLE_INDEX: &[&str] = &["DATE"];

/// Realization parameters collated across an ensemble.
///
/// Serializes as `{parameter_name: {realization_id: value}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, BTreeMap<i32, Value>>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_realization(&mut self, realization_id: i32, parameters: &Map<String, Value>) {
        for (name, value) in parameters {
            self.0
                .entry(name.clone())
                .or_default()
                .insert(realization_id, value.clone());
        }
    }

    pub fn get(&self, name: &str, realization_id: i32) -> Option<&Value> {
        self.0.get(name)?.get(&realization_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Aggregation metadata shared by every artifact of one run.
///
/// Built once from a representative realization document: the realization block and the
/// store bookkeeping are removed, an aggregation block is added, the column list and the
/// file paths are cleared. Artifacts clone and patch it; the stub itself is never
/// mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataStub {
    metadata: Metadata,
    table_index: Vec<String>,
}

impl MetadataStub {
    pub fn from_realization(
        representative: &Metadata,
        realization_ids: &[i32],
        parameters: &ParameterSet,
    ) -> Result<Self> {
        let table_index = match representative.table_index() {
            Some(index) => index.to_vec(),
            None => DEFAULT_TABLE_INDEX.iter().map(|c| c.to_string()).collect(),
        };

        let mut metadata = representative.clone();
        metadata.fmu.realization = None;
        metadata.service = None;

        let mut ids = realization_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut aggregation = metadata.fmu.aggregation.take().unwrap_or_default();
        aggregation.operation = Operation::Collection.as_str().to_string();
        aggregation.realization_ids = ids;
        aggregation.id = None;
        aggregation.parameters = if parameters.is_empty() {
            None
        } else {
            Some(parameters.to_value()?)
        };
        metadata.fmu.aggregation = Some(aggregation);

        metadata.file.relative_path = Some(String::new());
        metadata.file.absolute_path = Some(String::new());
        metadata.file.checksum_md5 = None;
        metadata.file.size_bytes = None;

        let spec = metadata.data.spec.get_or_insert_with(TableSpec::default);
        spec.columns.clear();
        spec.num_rows = None;
        spec.num_columns = None;
        metadata.data.table_index = Some(table_index.clone());

        Ok(Self {
            metadata,
            table_index,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn table_index(&self) -> &[String] {
        &self.table_index
    }

    pub fn aggregation(&self) -> Option<&AggregationBlock> {
        self.metadata.fmu.aggregation.as_ref()
    }

    pub fn realization_ids(&self) -> &[i32] {
        self.aggregation()
            .map(|a| a.realization_ids.as_slice())
            .unwrap_or_default()
    }

    /// Replace the realization list, e.g. with the realizations that actually contributed.
    pub fn with_realization_ids(mut self, realization_ids: &[i32]) -> Self {
        let mut ids = realization_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if let Some(aggregation) = self.metadata.fmu.aggregation.as_mut() {
            aggregation.realization_ids = ids;
        }
        self
    }
}
