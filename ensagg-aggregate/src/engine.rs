use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use ensagg_metadata::Operation;
use ensagg_result::Error;
use rayon::prelude::*;

use crate::AggregateResult;
use crate::stats::{GroupedValues, is_aggregatable};

/// Statistics produced for one batch of vectors.
#[derive(Debug, Default)]
pub struct StatisticsReport {
    /// `vector -> operation -> [table_index..., vector]`
    pub tables: BTreeMap<String, BTreeMap<Operation, RecordBatch>>,
    /// Vectors that are not numeric (or entirely null-typed).
    pub skipped: Vec<String>,
    /// `(vector, operation, reason)` for every unit of work that failed.
    pub failures: Vec<(String, Operation, String)>,
}

impl StatisticsReport {
    pub fn table_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }
}

/// Runs grouped statistics on a dedicated rayon pool.
///
/// The pool is separate from the async runtime's workers; callers on an async runtime
/// enter [`StatisticsEngine::compute`] through `spawn_blocking`.
pub struct StatisticsEngine {
    pool: rayon::ThreadPool,
}

impl StatisticsEngine {
    /// `threads == 0` sizes the pool to the available cores.
    pub fn new(threads: usize) -> AggregateResult<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ensagg-stats-{i}"))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build statistics pool: {e}")))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Compute every `op` for every aggregatable vector.
    ///
    /// Each `(vector, op)` pair is an independent unit of work; a failing unit is recorded
    /// in the report and does not affect the others.
    pub fn compute(
        &self,
        collections: &BTreeMap<String, RecordBatch>,
        table_index: &[String],
        ops: &[Operation],
    ) -> StatisticsReport {
        let mut report = StatisticsReport::default();

        let mut vectors = Vec::new();
        for (name, sub_table) in collections {
            if is_aggregatable(sub_table, name) {
                vectors.push((name, sub_table));
            } else {
                tracing::debug!(vector = %name, "skipping statistics for non-numeric vector");
                report.skipped.push(name.clone());
            }
        }

        let ops: Vec<Operation> = ops.iter().copied().filter(Operation::is_statistic).collect();
        let results = self.pool.install(|| {
            let grouped: Vec<(&String, AggregateResult<Arc<GroupedValues>>)> = vectors
                .par_iter()
                .map(|(name, sub_table)| {
                    let grouped = GroupedValues::from_sub_table(sub_table, table_index, name)
                        .map(Arc::new);
                    if let Ok(g) = &grouped {
                        tracing::trace!(
                            vector = %name,
                            groups = g.num_groups(),
                            "grouped vector"
                        );
                    }
                    (*name, grouped)
                })
                .collect();

            let units: Vec<(&String, Operation, AggregateResult<Arc<GroupedValues>>)> = grouped
                .into_iter()
                .flat_map(|(name, grouped)| {
                    ops.iter().map(move |op| {
                        let grouped = match &grouped {
                            Ok(g) => Ok(Arc::clone(g)),
                            Err(e) => Err(Error::Internal(e.to_string())),
                        };
                        (name, *op, grouped)
                    })
                })
                .collect();

            units
                .into_par_iter()
                .map(|(name, op, grouped)| {
                    let table = grouped.and_then(|g| g.reduce(op));
                    (name, op, table)
                })
                .collect::<Vec<_>>()
        });

        for (name, op, table) in results {
            match table {
                Ok(table) => {
                    report
                        .tables
                        .entry(name.clone())
                        .or_default()
                        .insert(op, table);
                }
                Err(err) => {
                    tracing::warn!(vector = %name, operation = %op, error = %err, "statistic failed");
                    report.failures.push((name.clone(), op, err.to_string()));
                }
            }
        }

        tracing::debug!(
            tables = report.table_count(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "statistics computed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose;
    use crate::reconcile::reconcile;
    use crate::unify::concat_reconciled;
    use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use ensagg_test_utils::{dense_dated_table, f64_column};
    use std::collections::BTreeSet;

    #[test]
    fn every_numeric_vector_gets_every_statistic() {
        let required: BTreeSet<String> = ["DATE", "FOPT", "FWPT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let tables: Vec<RecordBatch> = (0..3)
            .map(|real| {
                let base = f64::from(real);
                let table = dense_dated_table(
                    &["2020-01-01", "2020-02-01"],
                    &[("FOPT", vec![base, base + 10.0]), ("FWPT", vec![1.0, 2.0])],
                );
                reconcile(&table, real, &required).unwrap()
            })
            .collect();
        let unified = concat_reconciled(&tables).unwrap().table;
        let index = vec!["DATE".to_string()];
        let parts = decompose(&unified, &index).unwrap();

        let engine = StatisticsEngine::new(2).unwrap();
        assert_eq!(engine.threads(), 2);
        let report = engine.compute(&parts.collections, &index, &Operation::STATISTICS);

        assert!(report.failures.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(report.table_count(), 10);
        let mean = &report.tables["FOPT"][&Operation::Mean];
        assert_eq!(f64_column(mean, "FOPT"), vec![Some(1.0), Some(11.0)]);
    }

    #[test]
    fn multi_column_index_keys_every_statistic() {
        let required: BTreeSet<String> = ["ZONE", "REGION", "STOIIP", "GIIP"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let tables: Vec<RecordBatch> = [[2.0, 3.0, 5.0], [4.0, 5.0, 5.0]]
            .iter()
            .enumerate()
            .map(|(real, stoiip)| {
                let schema = Arc::new(Schema::new(vec![
                    Field::new("ZONE", DataType::Utf8, false),
                    Field::new("REGION", DataType::Int32, false),
                    Field::new("STOIIP", DataType::Float64, true),
                    Field::new("GIIP", DataType::Float64, true),
                ]));
                let columns: Vec<ArrayRef> = vec![
                    Arc::new(StringArray::from(vec!["A", "A", "B"])),
                    Arc::new(Int32Array::from(vec![1, 2, 1])),
                    Arc::new(Float64Array::from(stoiip.to_vec())),
                    Arc::new(Float64Array::from(vec![10.0, 20.0, 30.0])),
                ];
                let table = RecordBatch::try_new(schema, columns).unwrap();
                reconcile(&table, real as i32, &required).unwrap()
            })
            .collect();
        let unified = concat_reconciled(&tables).unwrap().table;
        let index = vec!["ZONE".to_string(), "REGION".to_string()];
        let parts = decompose(&unified, &index).unwrap();
        assert_eq!(
            parts.collections.keys().collect::<Vec<_>>(),
            vec!["GIIP", "STOIIP"]
        );

        let engine = StatisticsEngine::new(2).unwrap();
        let report = engine.compute(&parts.collections, &index, &Operation::STATISTICS);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.table_count(), 10);

        let mean = &report.tables["STOIIP"][&Operation::Mean];
        assert_eq!(mean.num_rows(), 3);
        assert_eq!(mean.schema().field(0).name(), "ZONE");
        assert_eq!(mean.schema().field(1).name(), "REGION");
        assert_eq!(
            f64_column(mean, "STOIIP"),
            vec![Some(3.0), Some(4.0), Some(5.0)]
        );
        let giip = &report.tables["GIIP"][&Operation::Min];
        assert_eq!(
            f64_column(giip, "GIIP"),
            vec![Some(10.0), Some(20.0), Some(30.0)]
        );
    }

    #[test]
    fn string_vectors_are_skipped() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("DATE", DataType::Utf8, false),
            Field::new("REAL", DataType::Int32, false),
            Field::new("WELL", DataType::Utf8, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["d1"])),
            Arc::new(Int32Array::from(vec![0])),
            Arc::new(StringArray::from(vec!["OP_1"])),
        ];
        let sub = RecordBatch::try_new(schema, columns).unwrap();
        let mut collections = BTreeMap::new();
        collections.insert("WELL".to_string(), sub);

        let engine = StatisticsEngine::new(1).unwrap();
        let report = engine.compute(&collections, &["DATE".to_string()], &Operation::STATISTICS);
        assert_eq!(report.skipped, vec!["WELL".to_string()]);
        assert_eq!(report.table_count(), 0);
    }
}
