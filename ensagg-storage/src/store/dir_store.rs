use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use ensagg_result::{Result, StoreError, is_success_status};

use super::mem_store::MemObjectStore;
use super::{ObjectStore, StoreResult};
use crate::types::{ObjectId, Registration, SearchPage, SearchRequest, derive_object_id};

const OBJECTS_DIR: &str = "objects";

/// Object store persisted under a local directory.
///
/// Layout: `<root>/objects/<id>.json` holds the metadata document as registered (with the
/// `_sumo` block added by the store), `<root>/objects/<id>.blob` holds the blob bytes.
/// Searches run against an in-memory index loaded at [`DirObjectStore::open`] and kept in
/// sync by every write.
pub struct DirObjectStore {
    root: PathBuf,
    index: MemObjectStore,
}

impl DirObjectStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let objects_dir = root.join(OBJECTS_DIR);
        fs::create_dir_all(&objects_dir)?;

        let index = MemObjectStore::new();
        let mut loaded = 0usize;
        for entry in fs::read_dir(&objects_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let doc: Value = serde_json::from_slice(&fs::read(&path)?)?;
            let blob = match fs::read(path.with_extension("blob")) {
                Ok(bytes) => Some(Bytes::from(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            index.insert_object(ObjectId::from(stem), doc, blob);
            loaded += 1;
        }
        tracing::debug!(root = %root.display(), objects = loaded, "opened directory store");
        Ok(Self { root, index })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// In-memory view of the store contents.
    pub fn index(&self) -> &MemObjectStore {
        &self.index
    }

    fn object_path(&self, id: &ObjectId, extension: &str) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(format!("{id}.{extension}"))
    }

    async fn persist_metadata(&self, id: &ObjectId) -> StoreResult<()> {
        let Some(obj) = self.index.object(id) else {
            return Err(StoreError::not_found(format!("no object {id}")));
        };
        let encoded = serde_json::to_vec_pretty(&obj.metadata)
            .map_err(|e| StoreError::Transport(format!("encoding metadata of {id}: {e}")))?;
        write_file(&self.object_path(id, "json"), &encoded).await?;
        remove_file(&self.object_path(id, "blob")).await
    }
}

fn is_safe_file_stem(id: &ObjectId) -> bool {
    let id = id.as_str();
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn write_file(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StoreError::Transport(format!("writing {}: {e}", path.display())))
}

async fn remove_file(path: &Path) -> StoreResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Transport(format!(
            "removing {}: {e}",
            path.display()
        ))),
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn search(&self, request: &SearchRequest) -> StoreResult<SearchPage> {
        self.index.search(request).await
    }

    async fn open_point_in_time(&self, keep_alive: Duration) -> StoreResult<String> {
        self.index.open_point_in_time(keep_alive).await
    }

    async fn close_point_in_time(&self, pit: &str) -> StoreResult<()> {
        self.index.close_point_in_time(pit).await
    }

    async fn get_blob(&self, object_id: &ObjectId) -> StoreResult<Bytes> {
        self.index.get_blob(object_id).await
    }

    async fn post_metadata(
        &self,
        parent_id: &ObjectId,
        metadata: &Value,
    ) -> StoreResult<Registration> {
        if !is_safe_file_stem(&derive_object_id(parent_id, metadata)) {
            return Ok(Registration::rejected(400));
        }
        let registration = self.index.post_metadata(parent_id, metadata).await?;
        if let (true, Some(id)) = (
            is_success_status(registration.status),
            &registration.object_id,
        ) {
            self.persist_metadata(id).await?;
        }
        Ok(registration)
    }

    async fn put_blob(&self, blob_url: &str, bytes: Bytes) -> StoreResult<u16> {
        let status = self.index.put_blob(blob_url, bytes.clone()).await?;
        if is_success_status(status)
            && let Some(id) = blob_url.strip_prefix(super::mem_store::MEM_BLOB_SCHEME)
        {
            write_file(&self.object_path(&ObjectId::from(id), "blob"), &bytes).await?;
        }
        Ok(status)
    }

    async fn delete(&self, object_id: &ObjectId) -> StoreResult<()> {
        let removed = self.index.remove_tree(object_id);
        if removed.is_empty() {
            return Err(StoreError::not_found(format!("no object {object_id}")));
        }
        for id in &removed {
            remove_file(&self.object_path(id, "json")).await?;
            remove_file(&self.object_path(id, "blob")).await?;
        }
        Ok(())
    }
}
