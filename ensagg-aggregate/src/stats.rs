//! Grouped reductions over one vector sub-table.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, UInt32Array};
use arrow::compute::{cast, take};
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, RowConverter, SortField};
use ensagg_metadata::Operation;
use ensagg_result::Error;

use crate::AggregateResult;

/// Whether `column` of `sub_table` can be reduced: numeric and not entirely null-typed.
pub fn is_aggregatable(sub_table: &RecordBatch, column: &str) -> bool {
    sub_table
        .column_by_name(column)
        .is_some_and(|c| c.data_type().is_numeric())
}

/// Percentile of already sorted values, linear interpolation between closest ranks.
///
/// `q` is a fraction in `[0, 1]`.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = q.clamp(0.0, 1.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Reduce the non-null values of one group. `None` for an empty group.
///
/// Percentile names follow the reservoir-engineering convention: `p10` is the high case
/// (90th percentile) and `p90` the low case (10th percentile).
pub fn reduce(op: Operation, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    match op {
        Operation::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
        Operation::Min => Some(values.iter().copied().fold(f64::INFINITY, f64::min)),
        Operation::Max => Some(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Operation::P10 | Operation::P90 => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let q = if op == Operation::P10 { 0.9 } else { 0.1 };
            percentile(&sorted, q)
        }
        Operation::Collection | Operation::Index => None,
    }
}

/// Values of one vector grouped by the table index, groups in ascending index order.
#[derive(Debug, Clone)]
pub struct GroupedValues {
    pub column: String,
    index_fields: Vec<FieldRef>,
    /// One row per group.
    keys: Vec<ArrayRef>,
    groups: Vec<Vec<f64>>,
}

impl GroupedValues {
    pub fn from_sub_table(
        sub_table: &RecordBatch,
        table_index: &[String],
        column: &str,
    ) -> AggregateResult<Self> {
        if table_index.is_empty() {
            return Err(Error::InvalidArgumentError(
                "grouped statistics need at least one index column".into(),
            ));
        }
        let schema = sub_table.schema();
        let mut index_fields = Vec::with_capacity(table_index.len());
        let mut index_columns = Vec::with_capacity(table_index.len());
        for name in table_index {
            let idx = schema.index_of(name).map_err(|_| {
                Error::InvalidArgumentError(format!("index column {name} missing from {column}"))
            })?;
            index_fields.push(Arc::clone(&schema.fields()[idx]));
            index_columns.push(Arc::clone(sub_table.column(idx)));
        }

        let values = sub_table.column_by_name(column).ok_or_else(|| {
            Error::InvalidArgumentError(format!("column {column} missing from its sub-table"))
        })?;
        if !values.data_type().is_numeric() {
            return Err(Error::InvalidArgumentError(format!(
                "column {column} is {}, not numeric",
                values.data_type()
            )));
        }
        let values = cast(values, &DataType::Float64)?;
        let values = values
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::Internal(format!("cast of {column} did not yield Float64")))?;

        let converter = RowConverter::new(
            index_columns
                .iter()
                .map(|c| SortField::new(c.data_type().clone()))
                .collect(),
        )?;
        let rows = converter.convert_columns(&index_columns)?;

        let mut grouped: BTreeMap<OwnedRow, (u32, Vec<f64>)> = BTreeMap::new();
        for row in 0..sub_table.num_rows() {
            let first = take_index(row)?;
            let entry = grouped
                .entry(rows.row(row).owned())
                .or_insert_with(|| (first, Vec::new()));
            if values.is_valid(row) {
                entry.1.push(values.value(row));
            }
        }

        let first_rows = UInt32Array::from_iter_values(grouped.values().map(|(first, _)| *first));
        let keys = index_columns
            .iter()
            .map(|c| take(c.as_ref(), &first_rows, None))
            .collect::<Result<Vec<_>, _>>()?;
        let groups = grouped.into_values().map(|(_, values)| values).collect();

        Ok(Self {
            column: column.to_string(),
            index_fields,
            keys,
            groups,
        })
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Table of index columns followed by the Float64 statistic named after the vector.
    pub fn reduce(&self, op: Operation) -> AggregateResult<RecordBatch> {
        if !op.is_statistic() {
            return Err(Error::InvalidArgumentError(format!(
                "{op} is not a statistic"
            )));
        }
        let stat: Float64Array = self.groups.iter().map(|g| reduce(op, g)).collect();

        let mut fields = self.index_fields.clone();
        fields.push(Arc::new(Field::new(&self.column, DataType::Float64, true)));
        let mut columns = self.keys.clone();
        columns.push(Arc::new(stat));
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

/// Row position as a `take` index.
fn take_index(row: usize) -> AggregateResult<u32> {
    u32::try_from(row)
        .map_err(|_| Error::Internal(format!("row {row} exceeds the u32 take index range")))
}
