use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use ensagg_codec::{DecoderChain, describe_failures};
use ensagg_result::FetchError;
use ensagg_storage::{ObjectId, ObjectStore};

use crate::config::RuntimeConfig;
use crate::retry::Backoff;

/// Retrieves and decodes one realization table.
///
/// Cheap to clone; clones share the store handle and the decoder chain.
#[derive(Clone)]
pub struct BlobFetcher {
    store: Arc<dyn ObjectStore>,
    decoders: Arc<DecoderChain>,
    attempts: u32,
    backoff: Backoff,
}

impl BlobFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, config: &RuntimeConfig) -> Self {
        Self {
            store,
            decoders: Arc::new(DecoderChain::default()),
            attempts: config.fetch_attempts.max(1),
            backoff: config.backoff(),
        }
    }

    pub fn with_decoders(mut self, decoders: DecoderChain) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Fetch the blob of `object_id` and decode it.
    ///
    /// Transient store failures are retried with backoff; once the attempts are used up
    /// the result is [`FetchError::Failed`]. Missing objects, rejected requests and
    /// payloads no decoder accepts fail with [`FetchError::Permanent`] right away.
    pub async fn fetch(&self, object_id: &ObjectId) -> Result<RecordBatch, FetchError> {
        let mut attempt = 1;
        loop {
            match self.store.get_blob(object_id).await {
                Ok(bytes) => {
                    return match self.decoders.decode(&bytes) {
                        Ok(decoded) => {
                            tracing::debug!(
                                object_id = %object_id,
                                format = decoded.format,
                                rows = decoded.batch.num_rows(),
                                attempt,
                                "fetched realization table"
                            );
                            Ok(decoded.batch)
                        }
                        Err(failures) => Err(FetchError::Permanent {
                            object_id: object_id.to_string(),
                            reason: format!(
                                "no decoder accepted {} bytes: {}",
                                bytes.len(),
                                describe_failures(&failures)
                            ),
                        }),
                    };
                }
                Err(err) if !err.is_transient() => {
                    return Err(FetchError::Permanent {
                        object_id: object_id.to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(err) if attempt >= self.attempts => {
                    return Err(FetchError::Failed {
                        object_id: object_id.to_string(),
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.backoff.delay(object_id.as_str(), attempt);
                    let failure = FetchError::Transient {
                        object_id: object_id.to_string(),
                        source: err,
                    };
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "retrying blob fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ensagg_codec::{CsvDecoder, write_parquet_to_memory};
    use ensagg_storage::{Fault, MemObjectStore};
    use ensagg_test_utils::dense_dated_table;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            ..RuntimeConfig::default()
        }
    }

    fn store_with(id: &str, blob: Bytes) -> Arc<MemObjectStore> {
        let store = Arc::new(MemObjectStore::new());
        store.insert_object(ObjectId::from(id), json!({"class": "table"}), Some(blob));
        store
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let table = dense_dated_table(&["d1"], &[("FOPT", vec![1.0])]);
        let store = store_with("r0", write_parquet_to_memory(&table).unwrap());
        let id = ObjectId::from("r0");
        store.inject_get_faults(&id, [Fault::Status(503), Fault::Transport("reset".into())]);

        let fetcher = BlobFetcher::new(store, &config());
        let batch = fetcher.fetch(&id).await.unwrap();
        assert_eq!(batch.num_rows(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_failed() {
        let table = dense_dated_table(&["d1"], &[("FOPT", vec![1.0])]);
        let store = store_with("r0", write_parquet_to_memory(&table).unwrap());
        let id = ObjectId::from("r0");
        store.inject_get_faults(&id, std::iter::repeat_n(Fault::Status(429), 5));

        let fetcher = BlobFetcher::new(store, &config());
        let err = fetcher.fetch(&id).await.unwrap_err();
        assert!(
            matches!(err, FetchError::Failed { attempts: 3, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn missing_and_garbage_blobs_fail_permanently() {
        let store = store_with("junk", Bytes::from_static(&[0xff, 0x00, 0x13, 0x37]));
        let fetcher = BlobFetcher::new(store, &config());

        let err = fetcher.fetch(&ObjectId::from("missing")).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent { .. }), "{err}");

        let err = fetcher.fetch(&ObjectId::from("junk")).await.unwrap_err();
        match err {
            FetchError::Permanent { reason, .. } => {
                assert!(reason.contains("parquet"), "{reason}");
                assert!(reason.contains("csv"), "{reason}");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn custom_decoder_chain_limits_accepted_formats() {
        let table = dense_dated_table(&["d1", "d2"], &[("FOPT", vec![1.0, 2.0])]);
        let store = store_with("parquet", write_parquet_to_memory(&table).unwrap());
        store.insert_object(
            ObjectId::from("csv"),
            json!({"class": "table"}),
            Some(Bytes::from_static(b"DATE,FOPT\nd1,1.0\nd2,2.0\n")),
        );

        let fetcher = BlobFetcher::new(store, &config())
            .with_decoders(DecoderChain::new(vec![Box::new(CsvDecoder::default())]));
        let batch = fetcher.fetch(&ObjectId::from("csv")).await.unwrap();
        assert_eq!(batch.num_rows(), 2);

        let err = fetcher.fetch(&ObjectId::from("parquet")).await.unwrap_err();
        match err {
            FetchError::Permanent { reason, .. } => {
                assert!(reason.contains("csv"), "{reason}");
                assert!(!reason.contains("parquet:"), "{reason}");
            }
            other => panic!("unexpected {other}"),
        }
    }
}
