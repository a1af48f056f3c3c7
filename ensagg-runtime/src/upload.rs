use std::sync::Arc;

use ensagg_metadata::Artifact;
use ensagg_result::{Error, Result, StoreError, UploadError, is_success_status, is_transient_status};
use ensagg_storage::{ObjectId, ObjectStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::RuntimeConfig;
use crate::retry::Backoff;

/// Outcome of uploading a set of artifacts.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// `(relative_path, object_id)` of every artifact that reached the store.
    pub uploaded: Vec<(String, ObjectId)>,
    pub failures: Vec<UploadError>,
}

impl UploadReport {
    pub fn attempted(&self) -> usize {
        self.uploaded.len() + self.failures.len()
    }
}

enum Step {
    Done(ObjectId),
    Retry(String),
    Abandon(Option<u16>, String),
}

/// Registers artifacts and writes their blobs, retrying transient failures.
#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    concurrency: usize,
    attempts: Option<u32>,
    backoff: Backoff,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, config: &RuntimeConfig) -> Self {
        Self {
            store,
            concurrency: config.upload_concurrency.max(1),
            attempts: config.upload_attempts,
            backoff: config.backoff(),
        }
    }

    /// Register `artifact` under `parent_id`, then write its blob.
    ///
    /// The whole POST + PUT sequence is repeated on a transient failure of either step;
    /// both are idempotent because the object id is derived from parent and path.
    pub async fn upload(
        &self,
        parent_id: &ObjectId,
        artifact: &Artifact,
    ) -> std::result::Result<ObjectId, UploadError> {
        let path = artifact.relative_path().to_string();
        let metadata = artifact.metadata.to_value().map_err(|e| UploadError::Permanent {
            path: path.clone(),
            status: None,
            detail: e.to_string(),
        })?;

        let mut attempt = 1u32;
        loop {
            let step = self.try_once(parent_id, &metadata, artifact).await;
            match step {
                Step::Done(object_id) => {
                    tracing::debug!(path = %path, object_id = %object_id, attempt, "uploaded artifact");
                    return Ok(object_id);
                }
                Step::Abandon(status, detail) => {
                    return Err(UploadError::Permanent {
                        path,
                        status,
                        detail,
                    });
                }
                Step::Retry(detail) => {
                    if self.attempts.is_some_and(|max| attempt >= max) {
                        return Err(UploadError::Transient {
                            path,
                            attempts: attempt,
                            detail,
                        });
                    }
                    let delay = self.backoff.delay(&path, attempt);
                    tracing::debug!(
                        path = %path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        detail = %detail,
                        "retrying upload"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn try_once(
        &self,
        parent_id: &ObjectId,
        metadata: &serde_json::Value,
        artifact: &Artifact,
    ) -> Step {
        let registration = match self.store.post_metadata(parent_id, metadata).await {
            Ok(registration) => registration,
            Err(err) => return classify("metadata registration", &err),
        };
        if !is_success_status(registration.status) {
            return classify_status("metadata registration", registration.status);
        }
        let Some(blob_url) = registration.blob_url else {
            return Step::Abandon(
                Some(registration.status),
                "registration returned no blob url".into(),
            );
        };

        match self.store.put_blob(&blob_url, artifact.bytes.clone()).await {
            Ok(status) if is_success_status(status) => match registration.object_id {
                Some(object_id) => Step::Done(object_id),
                None => Step::Abandon(Some(status), "registration returned no object id".into()),
            },
            Ok(status) => classify_status("blob upload", status),
            Err(err) => classify("blob upload", &err),
        }
    }

    /// Upload every artifact, at most `upload_concurrency` at a time.
    ///
    /// Individual failures are logged and collected; the call itself only fails when a
    /// task could not be joined.
    pub async fn upload_all(
        &self,
        parent_id: &ObjectId,
        artifacts: Vec<Artifact>,
    ) -> Result<UploadReport> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let parent_id = Arc::new(parent_id.clone());
        let mut tasks = JoinSet::new();

        for artifact in artifacts {
            let coordinator = self.clone();
            let permits = Arc::clone(&permits);
            let parent_id = Arc::clone(&parent_id);
            tasks.spawn(async move {
                let path = artifact.relative_path().to_string();
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => coordinator.upload(&parent_id, &artifact).await,
                    Err(_) => Err(UploadError::Permanent {
                        path: path.clone(),
                        status: None,
                        detail: "upload pool closed".into(),
                    }),
                };
                (path, outcome)
            });
        }

        let mut report = UploadReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (path, outcome) =
                joined.map_err(|e| Error::Internal(format!("upload task panicked: {e}")))?;
            match outcome {
                Ok(object_id) => report.uploaded.push((path, object_id)),
                Err(err) => {
                    tracing::error!(path = %err.path(), error = %err, "artifact upload failed");
                    report.failures.push(err);
                }
            }
        }
        report.uploaded.sort();
        tracing::info!(
            uploaded = report.uploaded.len(),
            failed = report.failures.len(),
            "upload phase complete"
        );
        Ok(report)
    }
}

fn classify(step: &str, err: &StoreError) -> Step {
    if err.is_transient() {
        Step::Retry(format!("{step}: {err}"))
    } else {
        Step::Abandon(err.code(), format!("{step}: {err}"))
    }
}

fn classify_status(step: &str, status: u16) -> Step {
    if is_transient_status(status) {
        Step::Retry(format!("{step}: status {status}"))
    } else {
        Step::Abandon(Some(status), format!("{step}: status {status}"))
    }
}
