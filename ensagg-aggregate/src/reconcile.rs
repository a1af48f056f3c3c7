use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, NullArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::AggregateResult;

/// Realization id column added to every reconciled table.
pub const REAL_COLUMN: &str = "REAL";

/// Conform one realization's table to the run's required column set.
///
/// The result holds `REAL` (Int32, filled with `realization_id`) as column 0, followed by
/// every required column in lexicographic order. Required columns the source lacks are
/// added as all-null `Null` columns; source columns outside the set are dropped. A
/// `REAL` column already present in the source is replaced.
pub fn reconcile(
    table: &RecordBatch,
    realization_id: i32,
    required: &BTreeSet<String>,
) -> AggregateResult<RecordBatch> {
    let rows = table.num_rows();
    let source = table.schema();

    let mut fields = Vec::with_capacity(required.len() + 1);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(required.len() + 1);
    fields.push(Field::new(REAL_COLUMN, DataType::Int32, false));
    columns.push(Arc::new(Int32Array::from(vec![realization_id; rows])));

    let mut missing = Vec::new();
    for name in required.iter().filter(|n| n.as_str() != REAL_COLUMN) {
        match source.index_of(name) {
            Ok(idx) => {
                fields.push(source.field(idx).clone());
                columns.push(Arc::clone(table.column(idx)));
            }
            Err(_) => {
                fields.push(Field::new(name, DataType::Null, true));
                columns.push(Arc::new(NullArray::new(rows)));
                missing.push(name.as_str());
            }
        }
    }

    if !missing.is_empty() {
        tracing::debug!(
            realization = realization_id,
            ?missing,
            "null-filling columns absent from realization"
        );
    }
    let dropped: Vec<&str> = source
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .filter(|n| *n != REAL_COLUMN && !required.contains(*n))
        .collect();
    if !dropped.is_empty() {
        tracing::debug!(
            realization = realization_id,
            ?dropped,
            "dropping columns outside the required set"
        );
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Union of the column names of `tables`, excluding `REAL`.
///
/// Used as the required column set when metadata does not list the columns.
pub fn required_from_tables<'a>(
    tables: impl IntoIterator<Item = &'a RecordBatch>,
) -> BTreeSet<String> {
    tables
        .into_iter()
        .flat_map(|t| {
            t.schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect::<Vec<_>>()
        })
        .filter(|n| n != REAL_COLUMN)
        .collect()
}
