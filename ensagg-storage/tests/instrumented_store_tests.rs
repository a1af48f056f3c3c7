use std::sync::Arc;

use bytes::Bytes;
use ensagg_storage::{
    Fault, InstrumentedStore, MemObjectStore, ObjectId, ObjectStore, SearchFilter, SearchRequest,
};
use serde_json::json;

#[tokio::test]
async fn counts_calls_bytes_and_failures() {
    let (store, stats) = InstrumentedStore::new(MemObjectStore::new());
    let store: Arc<dyn ObjectStore> = Arc::new(store);

    let case = json!({"class": "case", "fmu": {"case": {"uuid": "c"}}});
    store.post_metadata(&ObjectId::default(), &case).await.unwrap();
    let reg = store
        .post_metadata(
            &ObjectId::from("c"),
            &json!({"class": "table", "fmu": {"case": {"uuid": "c"}}, "file": {"relative_path": "t"}}),
        )
        .await
        .unwrap();
    store
        .put_blob(reg.blob_url.as_deref().unwrap(), Bytes::from(vec![0u8; 2048]))
        .await
        .unwrap();

    let before = stats.snapshot();
    let id = reg.object_id.unwrap();
    store.get_blob(&id).await.unwrap();
    store.get_blob(&ObjectId::from("missing")).await.unwrap_err();
    let page = store
        .search(&SearchRequest::new(SearchFilter::case_tables("c"), 10))
        .await
        .unwrap();
    assert_eq!(page.total, 1);

    let delta = stats.snapshot().delta_since(&before);
    assert_eq!(delta.blob_gets, 2);
    assert_eq!(delta.get_bytes, 2048);
    assert_eq!(delta.failed_calls, 1);
    assert_eq!(delta.searches, 1);
    assert_eq!(delta.metadata_posts, 0);
    assert_eq!(before.put_bytes, 2048);
    assert!(stats.snapshot().summary().contains("gets=2"));
}

#[tokio::test]
async fn injected_post_status_is_reported_not_raised() {
    let mem = MemObjectStore::new();
    mem.inject_post_faults([Fault::Status(503), Fault::Transport("reset".into())]);
    let (store, stats) = InstrumentedStore::new(mem);

    let case = json!({"fmu": {"case": {"uuid": "c"}}});
    let first = store.post_metadata(&ObjectId::default(), &case).await.unwrap();
    assert_eq!(first.status, 503);
    assert!(store.post_metadata(&ObjectId::default(), &case).await.is_err());
    let third = store.post_metadata(&ObjectId::default(), &case).await.unwrap();
    assert_eq!(third.status, 200);

    let snap = stats.snapshot();
    assert_eq!(snap.metadata_posts, 3);
    assert_eq!(snap.failed_calls, 1);
    assert_eq!(store.inner().len(), 1);
}
