use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use ensagg_result::Error;

use crate::AggregateResult;

/// Concatenation result.
#[derive(Debug, Clone)]
pub struct Unified {
    pub table: RecordBatch,
    /// One entry per column whose realizations disagreed on a concrete type.
    pub mismatches: Vec<String>,
}

/// Fixed cast table for two conflicting concrete types.
fn promote(a: &DataType, b: &DataType) -> DataType {
    if a.is_numeric() && b.is_numeric() {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

/// Resolve one column's type across tables. `Null` defers to the first concrete type.
fn resolve_column(
    name: &str,
    fields: &[&Field],
    mismatches: &mut Vec<String>,
) -> Field {
    let mut resolved: Option<DataType> = None;
    let mut nullable = false;
    for field in fields {
        nullable |= field.is_nullable();
        let dt = field.data_type();
        if *dt == DataType::Null {
            nullable = true;
            continue;
        }
        resolved = match resolved {
            None => Some(dt.clone()),
            Some(current) if current == *dt => Some(current),
            Some(current) => {
                let promoted = promote(&current, dt);
                if promoted != current {
                    mismatches.push(format!("column {name}: {current} vs {dt}, using {promoted}"));
                }
                Some(promoted)
            }
        };
    }
    Field::new(name, resolved.unwrap_or(DataType::Null), nullable)
}

/// Concatenate reconciled tables into one, promoting column types where they differ.
///
/// All tables must carry the same column names in the same order, which [`crate::reconcile`]
/// guarantees for a shared required column set. Tables are concatenated in the given
/// order, so the first table with a concrete type for a column decides it unless a
/// later table forces a promotion.
pub fn concat_reconciled(tables: &[RecordBatch]) -> AggregateResult<Unified> {
    let Some(first) = tables.first() else {
        return Err(Error::Internal("no tables to concatenate".into()));
    };
    let first_schema = first.schema();
    for table in &tables[1..] {
        let schema = table.schema();
        let same_names = schema.fields().len() == first_schema.fields().len()
            && schema
                .fields()
                .iter()
                .zip(first_schema.fields().iter())
                .all(|(a, b)| a.name() == b.name());
        if !same_names {
            return Err(Error::Internal(
                "reconciled tables disagree on column layout".into(),
            ));
        }
    }

    let schemas: Vec<SchemaRef> = tables.iter().map(|t| t.schema()).collect();
    let mut mismatches = Vec::new();
    let fields: Vec<Field> = (0..first_schema.fields().len())
        .map(|idx| {
            let column_fields: Vec<&Field> = schemas.iter().map(|s| s.field(idx)).collect();
            resolve_column(first_schema.field(idx).name(), &column_fields, &mut mismatches)
        })
        .collect();
    for mismatch in &mismatches {
        tracing::warn!("{}", Error::SchemaMismatch(mismatch.clone()));
    }

    let schema = Arc::new(Schema::new(fields));
    let mut conformed = Vec::with_capacity(tables.len());
    for table in tables {
        let columns = table
            .columns()
            .iter()
            .zip(schema.fields().iter())
            .map(|(column, field)| {
                if column.data_type() == field.data_type() {
                    Ok(Arc::clone(column))
                } else {
                    cast(column, field.data_type())
                }
            })
            .collect::<Result<Vec<ArrayRef>, _>>()?;
        conformed.push(RecordBatch::try_new(Arc::clone(&schema), columns)?);
    }

    let table = concat_batches(&schema, &conformed)?;
    Ok(Unified { table, mismatches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile;
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};
    use ensagg_test_utils::{dense_dated_table, f64_column};
    use std::collections::BTreeSet;

    fn required(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn null_columns_take_the_concrete_type() {
        let req = required(&["DATE", "FOPR", "FOPT"]);
        let a = reconcile(
            &dense_dated_table(&["d1"], &[("FOPT", vec![1.0])]),
            0,
            &req,
        )
        .unwrap();
        let b = reconcile(
            &dense_dated_table(&["d1"], &[("FOPT", vec![2.0]), ("FOPR", vec![5.0])]),
            1,
            &req,
        )
        .unwrap();

        let unified = concat_reconciled(&[a, b]).unwrap();
        assert!(unified.mismatches.is_empty());
        let table = unified.table;
        assert_eq!(table.num_rows(), 2);
        let fopr = table.schema().field_with_name("FOPR").unwrap().clone();
        assert_eq!(fopr.data_type(), &DataType::Float64);
        assert!(fopr.is_nullable());
        assert_eq!(f64_column(&table, "FOPR"), vec![None, Some(5.0)]);
        assert_eq!(f64_column(&table, "FOPT"), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn conflicting_types_follow_the_cast_table() {
        let req = required(&["DATE", "V", "W"]);
        let ints = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("DATE", DataType::Utf8, false),
                Field::new("V", DataType::Int64, false),
                Field::new("W", DataType::Int64, false),
            ])),
            vec![
                Arc::new(StringArray::from(vec!["d1"])),
                Arc::new(Int64Array::from(vec![3])),
                Arc::new(Int64Array::from(vec![4])),
            ],
        )
        .unwrap();
        let mixed = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("DATE", DataType::Utf8, false),
                Field::new("V", DataType::Float64, false),
                Field::new("W", DataType::Utf8, false),
            ])),
            vec![
                Arc::new(StringArray::from(vec!["d1"])),
                Arc::new(Float64Array::from(vec![0.5])),
                Arc::new(StringArray::from(vec!["high"])),
            ],
        )
        .unwrap();

        let unified = concat_reconciled(&[
            reconcile(&ints, 0, &req).unwrap(),
            reconcile(&mixed, 1, &req).unwrap(),
        ])
        .unwrap();
        assert_eq!(unified.mismatches.len(), 2);

        let schema = unified.table.schema();
        assert_eq!(schema.field_with_name("V").unwrap().data_type(), &DataType::Float64);
        assert_eq!(schema.field_with_name("W").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(f64_column(&unified.table, "V"), vec![Some(3.0), Some(0.5)]);
        let w = unified
            .table
            .column_by_name("W")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .clone();
        assert_eq!(w.value(0), "4");
        assert_eq!(w.value(1), "high");
        assert_eq!(w.null_count(), 0);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(concat_reconciled(&[]).is_err());
    }
}
