use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ensagg_codec::{IpcFileDecoder, TableDecoder};
use ensagg_result::Error;
use ensagg_runtime::{
    AggregationRunner, EnsembleSeed, RunOptions, RuntimeConfig, SeededEnsemble, TableIdentity,
    TableQuery, register_case, seed_ensemble, synthetic_table, upload_realization_table,
};
use ensagg_storage::{DirObjectStore, Fault, MemObjectStore, ObjectId, ObjectStore, StoredObject};
use ensagg_test_utils::{f64_column, init_tracing_for_tests};
use serde_json::Value;

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(4),
        stats_threads: 2,
        ..RuntimeConfig::default()
    }
}

fn runner(store: &Arc<MemObjectStore>, config: RuntimeConfig) -> AggregationRunner {
    let store: Arc<dyn ObjectStore> = Arc::clone(store) as Arc<dyn ObjectStore>;
    AggregationRunner::new(store, config).unwrap()
}

async fn seed(store: &MemObjectStore, realizations: usize, vectors: &[&str]) -> SeededEnsemble {
    seed_ensemble(store, &EnsembleSeed::new("drogon", realizations).with_vectors(vectors))
        .await
        .unwrap()
}

/// Aggregated objects below the case, keyed by relative path.
fn aggregated(store: &MemObjectStore, case_id: &ObjectId) -> BTreeMap<String, (ObjectId, StoredObject)> {
    store
        .children_of(case_id)
        .into_iter()
        .filter(|(_, obj)| obj.metadata.pointer("/fmu/aggregation").is_some())
        .map(|(id, obj)| {
            let path = obj
                .metadata
                .pointer("/file/relative_path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (path, (id, obj))
        })
        .collect()
}

#[tokio::test]
async fn three_realizations_produce_seven_artifacts() {
    init_tracing_for_tests();
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 3, &["FOPT"]).await;

    let report = runner(&store, fast_config())
        .run(&seeded.query(), &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.realizations, vec![0, 1, 2]);
    assert!(report.failed_realizations.is_empty());
    assert_eq!(report.artifacts_built, 7);
    assert_eq!(report.uploaded, 7);
    assert!(report.upload_failures.is_empty());

    let objects = aggregated(&store, &seeded.case.id);
    let paths: Vec<&str> = objects.keys().map(String::as_str).collect();
    assert_eq!(
        paths,
        vec![
            "summary--DATE--eclipse--index--iter-0",
            "summary--FOPT--eclipse--collection--iter-0",
            "summary--FOPT--eclipse--max--iter-0",
            "summary--FOPT--eclipse--mean--iter-0",
            "summary--FOPT--eclipse--min--iter-0",
            "summary--FOPT--eclipse--p10--iter-0",
            "summary--FOPT--eclipse--p90--iter-0",
        ]
    );

    let (_, mean) = &objects["summary--FOPT--eclipse--mean--iter-0"];
    assert_eq!(
        mean.metadata.pointer("/fmu/aggregation/operation"),
        Some(&Value::from("mean"))
    );
    assert_eq!(
        mean.metadata.pointer("/fmu/aggregation/realization_ids"),
        Some(&serde_json::json!([0, 1, 2]))
    );
    assert_eq!(
        mean.metadata.pointer("/data/spec/columns"),
        Some(&serde_json::json!(["DATE", "FOPT"]))
    );
    assert!(mean.metadata.pointer("/fmu/realization").is_none());
    assert_eq!(
        mean.metadata.pointer("/fmu/aggregation/parameters/SEED/2"),
        Some(&Value::from(2))
    );

    let table = IpcFileDecoder.decode(mean.blob.as_ref().unwrap()).unwrap();
    assert_eq!(
        f64_column(&table, "FOPT"),
        vec![Some(101.0), Some(111.0), Some(121.0), Some(131.0)]
    );

    let (_, p10) = &objects["summary--FOPT--eclipse--p10--iter-0"];
    let table = IpcFileDecoder.decode(p10.blob.as_ref().unwrap()).unwrap();
    let high = f64_column(&table, "FOPT")[0].unwrap();
    assert!((high - 101.8).abs() < 1e-9, "p10 = {high}");

    let (_, collection) = &objects["summary--FOPT--eclipse--collection--iter-0"];
    let table = IpcFileDecoder.decode(collection.blob.as_ref().unwrap()).unwrap();
    assert_eq!(table.num_rows(), 12);
}

#[tokio::test]
async fn rerunning_reproduces_the_same_objects() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 3, &["FOPT", "FWPT"]).await;
    let runner = runner(&store, fast_config());

    runner.run(&seeded.query(), &RunOptions::default()).await.unwrap();
    let first = aggregated(&store, &seeded.case.id);
    runner.run(&seeded.query(), &RunOptions::default()).await.unwrap();
    let second = aggregated(&store, &seeded.case.id);

    assert_eq!(first.len(), 13);
    assert_eq!(first.len(), second.len());
    for (path, (id, obj)) in &first {
        let (id2, obj2) = &second[path];
        assert_eq!(id, id2, "{path}");
        assert_eq!(
            obj.metadata.pointer("/fmu/aggregation/id"),
            obj2.metadata.pointer("/fmu/aggregation/id"),
            "{path}"
        );
        assert_eq!(obj.blob, obj2.blob, "{path}");
    }
}

#[tokio::test]
async fn transient_upload_failures_are_retried() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 2, &["FOPT"]).await;
    store.inject_post_faults([Fault::Status(503), Fault::Transport("reset".into()), Fault::Status(429)]);
    store.inject_put_faults([Fault::Status(500), Fault::Transport("broken pipe".into())]);

    let report = runner(&store, fast_config())
        .run(&seeded.query(), &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.uploaded, 7);
    assert!(report.upload_failures.is_empty());
    assert_eq!(aggregated(&store, &seeded.case.id).len(), 7);
}

#[tokio::test]
async fn permanent_upload_failures_are_reported() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 2, &["FOPT"]).await;
    store.inject_post_faults([Fault::Status(413)]);

    let report = runner(&store, fast_config())
        .run(&seeded.query(), &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.artifacts_built, 7);
    assert_eq!(report.uploaded, 6);
    assert_eq!(report.upload_failures.len(), 1);
    assert!(report.upload_failures[0].contains("413"), "{:?}", report.upload_failures);
}

#[tokio::test]
async fn bounded_upload_attempts_give_up() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 2, &["FOPT"]).await;
    store.inject_post_faults(std::iter::repeat_n(Fault::Status(503), 14));

    let config = RuntimeConfig {
        upload_attempts: Some(2),
        ..fast_config()
    };
    let err = runner(&store, config)
        .run(&seeded.query(), &RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NothingUploaded { attempted: 7 }), "{err}");
}

#[tokio::test]
async fn missing_realizations_shrink_the_realization_list() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 3, &["FOPT"]).await;
    store.inject_get_faults(&seeded.realizations[&1], [Fault::Status(404)]);

    let report = runner(&store, fast_config())
        .run(&seeded.query(), &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.realizations, vec![0, 2]);
    assert_eq!(report.failed_realizations.len(), 1);
    assert_eq!(report.failed_realizations[0].0, 1);

    let objects = aggregated(&store, &seeded.case.id);
    let (_, mean) = &objects["summary--FOPT--eclipse--mean--iter-0"];
    assert_eq!(
        mean.metadata.pointer("/fmu/aggregation/realization_ids"),
        Some(&serde_json::json!([0, 2]))
    );
}

#[tokio::test]
async fn every_fetch_failing_uploads_nothing() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 2, &["FOPT"]).await;
    for id in seeded.realizations.values() {
        store.inject_get_faults(id, [Fault::Status(403)]);
    }

    let err = runner(&store, fast_config())
        .run(&seeded.query(), &RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyAggregation { attempted: 2 }), "{err}");
    assert!(aggregated(&store, &seeded.case.id).is_empty());
}

#[tokio::test]
async fn grand_aggregation_and_column_subsets() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 2, &["FGPT", "FOPT", "FWPT"]).await;

    let config = RuntimeConfig {
        keep_grand_aggregation: true,
        ..fast_config()
    };
    let report = runner(&store, config)
        .run(&seeded.query(), &RunOptions::with_columns(["FWPT"]))
        .await
        .unwrap();
    // FWPT collection + 5 statistics + DATE index + the whole table.
    assert_eq!(report.uploaded, 8);

    let objects = aggregated(&store, &seeded.case.id);
    assert!(objects.contains_key("summary--FWPT--eclipse--p90--iter-0"));
    assert!(!objects.contains_key("summary--FOPT--eclipse--collection--iter-0"));
    let (_, grand) = &objects["summary--aggregated--eclipse--collection--iter-0"];
    assert_eq!(
        grand.metadata.pointer("/data/spec/columns"),
        Some(&serde_json::json!(["REAL", "DATE", "FWPT"]))
    );
}

#[tokio::test]
async fn identical_payloads_aggregate_one_representative() {
    let store = Arc::new(MemObjectStore::new());
    let case = register_case(store.as_ref(), "cloned").await.unwrap();
    let identity = TableIdentity::default();
    let dates = vec!["2020-01-01".to_string()];
    let table = synthetic_table(0, &dates, &["FOPT".to_string()]).unwrap();
    for real in 0..3 {
        upload_realization_table(store.as_ref(), &case, &identity, real, &table)
            .await
            .unwrap();
    }

    let query = TableQuery::new(&case.uuid, "summary", "eclipse", "iter-0");
    let report = runner(&store, fast_config())
        .run(&query, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.realizations, vec![0]);
    assert_eq!(report.uploaded, 7);
}

/// `[ZONE, REGION, STOIIP]` for one realization, rows in the given order.
fn volumes_table(rows: &[(&str, i64, f64)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("ZONE", DataType::Utf8, false),
        Field::new("REGION", DataType::Int64, false),
        Field::new("STOIIP", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.2))),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn volumes_are_grouped_on_every_index_column() {
    let store = Arc::new(MemObjectStore::new());
    let case = register_case(store.as_ref(), "volumetrics").await.unwrap();
    let identity = TableIdentity {
        name: "geogrid".into(),
        tagname: "vol".into(),
        content: "volumes".into(),
        table_index: vec!["ZONE".into(), "REGION".into()],
        ..TableIdentity::default()
    };
    let realizations = [
        volumes_table(&[("B", 1, 5.0), ("A", 2, 3.0), ("A", 1, 2.0)]),
        volumes_table(&[("A", 1, 4.0), ("A", 2, 5.0), ("B", 1, 5.0)]),
    ];
    for (real, table) in realizations.iter().enumerate() {
        upload_realization_table(store.as_ref(), &case, &identity, real as i32, table)
            .await
            .unwrap();
    }

    let query = TableQuery::new(&case.uuid, "geogrid", "vol", "iter-0");
    let report = runner(&store, fast_config())
        .run(&query, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.realizations, vec![0, 1]);
    // STOIIP collection + 5 statistics + one index per index column.
    assert_eq!(report.uploaded, 8);

    let objects = aggregated(&store, &case.id);
    assert!(objects.contains_key("geogrid--ZONE--vol--index--iter-0"));
    assert!(objects.contains_key("geogrid--REGION--vol--index--iter-0"));

    let (_, mean) = &objects["geogrid--STOIIP--vol--mean--iter-0"];
    let table = IpcFileDecoder.decode(mean.blob.as_ref().unwrap()).unwrap();
    let names: Vec<_> = table
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, vec!["ZONE", "REGION", "STOIIP"]);
    let zones = table
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    let regions = table
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    let keys: Vec<_> = (0..table.num_rows())
        .map(|i| (zones.value(i), regions.value(i)))
        .collect();
    assert_eq!(keys, vec![("A", 1), ("A", 2), ("B", 1)]);
    assert_eq!(
        f64_column(&table, "STOIIP"),
        vec![Some(3.0), Some(4.0), Some(5.0)]
    );
}

#[tokio::test]
async fn unknown_table_is_not_found() {
    let store = Arc::new(MemObjectStore::new());
    let seeded = seed(&store, 1, &["FOPT"]).await;
    let mut query = seeded.query();
    query.name = "volumes".into();

    let err = runner(&store, fast_config())
        .run(&query, &RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[tokio::test]
async fn directory_store_persists_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let seeded = {
        let store = DirObjectStore::open(dir.path()).unwrap();
        seed_ensemble(&store, &EnsembleSeed::new("on-disk", 2).with_vectors(&["FOPT"]))
            .await
            .unwrap()
    };

    let store: Arc<dyn ObjectStore> = Arc::new(DirObjectStore::open(dir.path()).unwrap());
    let report = AggregationRunner::new(store, fast_config())
        .unwrap()
        .run(&seeded.query(), &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.uploaded, 7);

    let reopened = DirObjectStore::open(dir.path()).unwrap();
    let objects = aggregated(reopened.index(), &seeded.case.id);
    assert_eq!(objects.len(), 7);
    assert!(objects.values().all(|(_, obj)| obj.blob.is_some()));
}
