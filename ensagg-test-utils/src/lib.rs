use std::sync::{Arc, Once};

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

static INIT: Once = Once::new();

/// Initialize tracing for test binaries. Safe to call multiple times.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let env = std::env::var("RUST_LOG").ok();
        let filter = match env {
            Some(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            None => EnvFilter::new("info"),
        };
        // Another harness may already own the global subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Realization-shaped table: a Utf8 `DATE` column followed by Float64 vectors.
///
/// Panics when a vector's length differs from `dates`; intended for tests only.
pub fn dated_table(dates: &[&str], vectors: &[(&str, Vec<Option<f64>>)]) -> RecordBatch {
    let mut fields = vec![Field::new("DATE", DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(dates.to_vec()))];
    for (name, values) in vectors {
        assert_eq!(values.len(), dates.len(), "vector {name} has wrong length");
        fields.push(Field::new(*name, DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(values.clone())));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .expect("valid test table")
}

/// Like [`dated_table`] without missing values.
pub fn dense_dated_table(dates: &[&str], vectors: &[(&str, Vec<f64>)]) -> RecordBatch {
    let vectors: Vec<(&str, Vec<Option<f64>>)> = vectors
        .iter()
        .map(|(name, values)| (*name, values.iter().copied().map(Some).collect()))
        .collect();
    dated_table(dates, &vectors)
}

/// Values of a Float64 column by name, for assertions.
pub fn f64_column(batch: &RecordBatch, name: &str) -> Vec<Option<f64>> {
    let column = batch
        .column_by_name(name)
        .unwrap_or_else(|| panic!("missing column {name}"));
    let values = column
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap_or_else(|| panic!("column {name} is {:?}, not Float64", column.data_type()));
    values.iter().collect()
}
