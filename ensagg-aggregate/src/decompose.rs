use std::collections::BTreeMap;

use arrow::record_batch::RecordBatch;
use ensagg_result::Error;

use crate::AggregateResult;
use crate::reconcile::REAL_COLUMN;

/// Bookkeeping columns that never become artifacts of their own.
pub const EXCLUDED_COLUMNS: &[&str] = &["YEARS", "SECONDS", "ENSEMBLE"];

/// Per-column views of a unified table.
#[derive(Debug, Clone, Default)]
pub struct Decomposition {
    /// `vector -> [table_index..., REAL, vector]`
    pub collections: BTreeMap<String, RecordBatch>,
    /// `index column -> [REAL, index column]`
    pub indexes: BTreeMap<String, RecordBatch>,
}

impl Decomposition {
    pub fn len(&self) -> usize {
        self.collections.len() + self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split `unified` into one sub-table per vector and one per index column.
///
/// Fails with [`Error::InvalidArgumentError`] when `REAL` or an index column is missing.
pub fn decompose(unified: &RecordBatch, table_index: &[String]) -> AggregateResult<Decomposition> {
    let schema = unified.schema();
    let real_idx = schema.index_of(REAL_COLUMN).map_err(|_| {
        Error::InvalidArgumentError(format!("unified table has no {REAL_COLUMN} column"))
    })?;
    let index_idx = table_index
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|_| {
                Error::InvalidArgumentError(format!(
                    "table index column {name} is missing from the aggregated table"
                ))
            })
        })
        .collect::<AggregateResult<Vec<usize>>>()?;

    let mut out = Decomposition::default();
    for (idx, field) in schema.fields().iter().enumerate() {
        let name = field.name();
        if idx == real_idx
            || index_idx.contains(&idx)
            || EXCLUDED_COLUMNS.contains(&name.as_str())
        {
            continue;
        }
        let mut projection = index_idx.clone();
        projection.extend([real_idx, idx]);
        out.collections
            .insert(name.clone(), unified.project(&projection)?);
    }
    for (name, &idx) in table_index.iter().zip(&index_idx) {
        out.indexes
            .insert(name.clone(), unified.project(&[real_idx, idx])?);
    }

    tracing::debug!(
        vectors = out.collections.len(),
        indexes = out.indexes.len(),
        "decomposed unified table"
    );
    Ok(out)
}
