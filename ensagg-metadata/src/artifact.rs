use std::fmt;
use std::str::FromStr;

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use ensagg_codec::encode_ipc_file;
use ensagg_result::{Error, Result};
use ensagg_storage::uuid_from_string;
use md5::{Digest, Md5};

use crate::document::{DisplayBlock, Metadata, TableSpec};
use crate::stub::MetadataStub;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    /// One vector across every contributing realization.
    Collection,
    Mean,
    Min,
    Max,
    /// High case: the 90th percentile of the values.
    P10,
    /// Low case: the 10th percentile of the values.
    P90,
    /// One index column across every contributing realization.
    Index,
}

impl Operation {
    pub const STATISTICS: [Operation; 5] = [
        Operation::Mean,
        Operation::Min,
        Operation::Max,
        Operation::P10,
        Operation::P90,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Collection => "collection",
            Operation::Mean => "mean",
            Operation::Min => "min",
            Operation::Max => "max",
            Operation::P10 => "p10",
            Operation::P90 => "p90",
            Operation::Index => "index",
        }
    }

    pub fn is_statistic(&self) -> bool {
        Self::STATISTICS.contains(self)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collection" => Ok(Operation::Collection),
            "mean" => Ok(Operation::Mean),
            "min" => Ok(Operation::Min),
            "max" => Ok(Operation::Max),
            "p10" => Ok(Operation::P10),
            "p90" => Ok(Operation::P90),
            "index" => Ok(Operation::Index),
            other => Err(Error::InvalidArgumentError(format!(
                "unknown aggregation operation '{other}'"
            ))),
        }
    }
}

/// Encoded payload plus the metadata it is registered with.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub operation: Operation,
    pub bytes: Bytes,
    pub metadata: Metadata,
}

impl Artifact {
    pub fn checksum(&self) -> &str {
        self.metadata
            .file
            .checksum_md5
            .as_deref()
            .unwrap_or_default()
    }

    pub fn aggregation_id(&self) -> Option<&str> {
        self.metadata.fmu.aggregation.as_ref()?.id.as_deref()
    }

    pub fn relative_path(&self) -> &str {
        self.metadata
            .file
            .relative_path
            .as_deref()
            .unwrap_or_default()
    }
}

/// Hex MD5 of `bytes`.
pub fn checksum_md5(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// `{data.name}--{artifact}--{tagname}--{operation}--{iteration}`
pub fn relative_path(metadata: &Metadata, artifact_name: &str, operation: Operation) -> String {
    format!(
        "{}--{}--{}--{}--{}",
        metadata.data.name,
        artifact_name,
        metadata.tagname(),
        operation,
        metadata.iteration_name()
    )
}

/// Encode `table` and derive its metadata from `stub`.
///
/// The aggregation id depends on the payload checksum only, so rebuilding an unchanged
/// table yields the same id on every run.
pub fn build_artifact(
    stub: &MetadataStub,
    table: &RecordBatch,
    name: &str,
    operation: Operation,
) -> Result<Artifact> {
    let bytes = encode_ipc_file(table)?;
    let checksum = checksum_md5(&bytes);

    let mut metadata = stub.metadata().clone();
    let aggregation = metadata
        .fmu
        .aggregation
        .as_mut()
        .ok_or_else(|| Error::Internal("metadata stub has no aggregation block".into()))?;
    aggregation.operation = operation.as_str().to_string();
    aggregation.id = Some(uuid_from_string(&checksum).to_string());

    let spec = metadata.data.spec.get_or_insert_with(TableSpec::default);
    spec.columns = table
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    spec.num_rows = Some(table.num_rows() as u64);
    spec.num_columns = Some(table.num_columns() as u64);

    metadata
        .display
        .get_or_insert_with(DisplayBlock::default)
        .name = Some(name.to_string());
    metadata.file.relative_path = Some(relative_path(&metadata, name, operation));
    metadata.file.absolute_path = Some(String::new());
    metadata.file.checksum_md5 = Some(checksum);
    metadata.file.size_bytes = Some(bytes.len() as u64);

    tracing::debug!(
        artifact = name,
        operation = %operation,
        bytes = bytes.len(),
        "built artifact"
    );

    Ok(Artifact {
        name: name.to_string(),
        operation,
        bytes,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::ParameterSet;
    use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use serde_json::json;
    use std::sync::Arc;

    fn stub() -> MetadataStub {
        let rep = Metadata::from_value(json!({
            "class": "table",
            "data": {"name": "summary", "tagname": "eclipse"},
            "fmu": {
                "case": {"uuid": "8f3e"},
                "iteration": {"name": "iter-0"},
                "realization": {"id": 0},
            },
        }))
        .unwrap();
        MetadataStub::from_realization(&rep, &[0, 1], &ParameterSet::new()).unwrap()
    }

    fn table(values: Vec<f64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("DATE", DataType::Utf8, false),
            Field::new("REAL", DataType::Int32, false),
            Field::new("FOPT", DataType::Float64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["2020-01-01", "2020-01-01"])),
            Arc::new(Int32Array::from(vec![0, 1])),
            Arc::new(Float64Array::from(values)),
        ];
        RecordBatch::try_new(schema, columns).unwrap()
    }

    #[test]
    fn identity_is_stable_for_identical_tables() {
        let stub = stub();
        let a = build_artifact(&stub, &table(vec![1.0, 2.0]), "FOPT", Operation::Collection)
            .unwrap();
        let b = build_artifact(&stub, &table(vec![1.0, 2.0]), "FOPT", Operation::Collection)
            .unwrap();
        let c = build_artifact(&stub, &table(vec![1.0, 2.5]), "FOPT", Operation::Collection)
            .unwrap();

        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.aggregation_id(), b.aggregation_id());
        assert_ne!(a.checksum(), c.checksum());
        assert_ne!(a.aggregation_id(), c.aggregation_id());
        assert_eq!(a.checksum(), checksum_md5(&a.bytes));
        assert_eq!(
            a.aggregation_id(),
            Some(uuid_from_string(a.checksum()).to_string().as_str())
        );
    }

    #[test]
    fn metadata_is_patched_per_artifact() {
        let art = build_artifact(&stub(), &table(vec![1.0, 2.0]), "FOPT", Operation::P10).unwrap();
        assert_eq!(art.relative_path(), "summary--FOPT--eclipse--p10--iter-0");
        let meta = &art.metadata;
        assert_eq!(meta.display.as_ref().unwrap().name.as_deref(), Some("FOPT"));
        assert_eq!(meta.columns().to_vec(), vec!["DATE", "REAL", "FOPT"]);
        assert_eq!(meta.data.spec.as_ref().unwrap().num_rows, Some(2));
        assert_eq!(meta.file.size_bytes, Some(art.bytes.len() as u64));
        assert_eq!(meta.fmu.aggregation.as_ref().unwrap().operation, "p10");
        assert_eq!(meta.fmu.aggregation.as_ref().unwrap().realization_ids, vec![0, 1]);
    }

    #[test]
    fn operations_parse_and_print() {
        for op in Operation::STATISTICS {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            assert!(op.is_statistic());
        }
        assert!(!Operation::Index.is_statistic());
        assert!("median".parse::<Operation>().is_err());
    }
}
