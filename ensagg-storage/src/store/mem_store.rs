use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use ensagg_result::StoreError;

use super::{ObjectStore, StoreResult};
use crate::types::{ObjectId, Registration, SearchHit, SearchPage, SearchRequest, derive_object_id};

/// Scheme of the blob URLs handed out by [`MemObjectStore`].
pub const MEM_BLOB_SCHEME: &str = "mem://";

/// Scripted failure returned by a [`MemObjectStore`] call instead of its normal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transport(String),
    Status(u16),
}

impl Fault {
    fn into_error(self, context: &str) -> StoreError {
        match self {
            Fault::Transport(msg) => StoreError::Transport(msg),
            Fault::Status(code) => StoreError::status(code, format!("injected failure: {context}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub metadata: Value,
    pub blob: Option<Bytes>,
}

#[derive(Default)]
struct FaultPlan {
    gets: FxHashMap<ObjectId, VecDeque<Fault>>,
    posts: VecDeque<Fault>,
    puts: VecDeque<Fault>,
}

struct PointInTime {
    ids: BTreeSet<ObjectId>,
    expires_at: Instant,
}

/// In-memory object store used for tests and local runs.
///
/// Faults queued with the `inject_*` methods are consumed one per matching call, in
/// order, before the store falls back to normal behavior.
#[allow(clippy::module_name_repetitions)]
pub struct MemObjectStore {
    objects: RwLock<BTreeMap<ObjectId, StoredObject>>,
    pits: Mutex<FxHashMap<String, PointInTime>>,
    next_pit: AtomicU64,
    faults: Mutex<FaultPlan>,
}

impl Default for MemObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            pits: Mutex::new(FxHashMap::default()),
            next_pit: AtomicU64::new(1),
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Store an object directly, bypassing registration.
    pub fn insert_object(&self, id: ObjectId, metadata: Value, blob: Option<Bytes>) {
        self.objects
            .write()
            .expect("MemObjectStore objects write lock poisoned")
            .insert(id, StoredObject { metadata, blob });
    }

    pub fn object(&self, id: &ObjectId) -> Option<StoredObject> {
        self.objects
            .read()
            .expect("MemObjectStore objects read lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .expect("MemObjectStore objects read lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Objects registered directly below `parent_id`, ordered by id.
    pub fn children_of(&self, parent_id: &ObjectId) -> Vec<(ObjectId, StoredObject)> {
        let objects = self
            .objects
            .read()
            .expect("MemObjectStore objects read lock poisoned");
        objects
            .iter()
            .filter(|(_, obj)| parent_of(&obj.metadata) == Some(parent_id.as_str()))
            .map(|(id, obj)| (id.clone(), obj.clone()))
            .collect()
    }

    pub fn inject_get_faults(&self, id: &ObjectId, faults: impl IntoIterator<Item = Fault>) {
        let mut plan = self.faults.lock().expect("MemObjectStore faults lock poisoned");
        plan.gets.entry(id.clone()).or_default().extend(faults);
    }

    pub fn inject_post_faults(&self, faults: impl IntoIterator<Item = Fault>) {
        let mut plan = self.faults.lock().expect("MemObjectStore faults lock poisoned");
        plan.posts.extend(faults);
    }

    pub fn inject_put_faults(&self, faults: impl IntoIterator<Item = Fault>) {
        let mut plan = self.faults.lock().expect("MemObjectStore faults lock poisoned");
        plan.puts.extend(faults);
    }

    /// Remove `id` and everything registered below it. Returns the removed ids.
    pub(crate) fn remove_tree(&self, id: &ObjectId) -> Vec<ObjectId> {
        let mut objects = self
            .objects
            .write()
            .expect("MemObjectStore objects write lock poisoned");
        if !objects.contains_key(id) {
            return Vec::new();
        }
        let mut removed = Vec::new();
        let mut pending = vec![id.clone()];
        while let Some(current) = pending.pop() {
            let children: Vec<ObjectId> = objects
                .iter()
                .filter(|(_, obj)| parent_of(&obj.metadata) == Some(current.as_str()))
                .map(|(child, _)| child.clone())
                .collect();
            objects.remove(&current);
            removed.push(current);
            pending.extend(children);
        }
        removed
    }

    fn take_get_fault(&self, id: &ObjectId) -> Option<Fault> {
        let mut plan = self.faults.lock().expect("MemObjectStore faults lock poisoned");
        plan.gets.get_mut(id).and_then(VecDeque::pop_front)
    }

    fn take_post_fault(&self) -> Option<Fault> {
        let mut plan = self.faults.lock().expect("MemObjectStore faults lock poisoned");
        plan.posts.pop_front()
    }

    fn take_put_fault(&self) -> Option<Fault> {
        let mut plan = self.faults.lock().expect("MemObjectStore faults lock poisoned");
        plan.puts.pop_front()
    }

    fn pit_snapshot(&self, pit: &str) -> StoreResult<BTreeSet<ObjectId>> {
        let pits = self.pits.lock().expect("MemObjectStore pits lock poisoned");
        match pits.get(pit) {
            Some(snapshot) if snapshot.expires_at > Instant::now() => Ok(snapshot.ids.clone()),
            Some(_) => Err(StoreError::not_found(format!("point in time {pit} expired"))),
            None => Err(StoreError::not_found(format!("unknown point in time {pit}"))),
        }
    }
}

fn parent_of(metadata: &Value) -> Option<&str> {
    metadata
        .pointer("/_sumo/parent_object")
        .and_then(Value::as_str)
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn search(&self, request: &SearchRequest) -> StoreResult<SearchPage> {
        let visible = match &request.pit {
            Some(pit) => Some(self.pit_snapshot(pit)?),
            None => None,
        };
        let objects = self
            .objects
            .read()
            .expect("MemObjectStore objects read lock poisoned");

        let mut total = 0u64;
        let mut hits = Vec::new();
        for (id, obj) in objects.iter() {
            if visible.as_ref().is_some_and(|ids| !ids.contains(id)) {
                continue;
            }
            if !request.filter.matches(&obj.metadata) {
                continue;
            }
            total += 1;
            if request.search_after.as_ref().is_some_and(|after| id <= after) {
                continue;
            }
            if hits.len() < request.size {
                hits.push(SearchHit {
                    id: id.clone(),
                    source: obj.metadata.clone(),
                });
            }
        }
        Ok(SearchPage { total, hits })
    }

    async fn open_point_in_time(&self, keep_alive: Duration) -> StoreResult<String> {
        let ids = self
            .objects
            .read()
            .expect("MemObjectStore objects read lock poisoned")
            .keys()
            .cloned()
            .collect();
        let pit = format!("pit-{}", self.next_pit.fetch_add(1, Ordering::Relaxed));
        self.pits
            .lock()
            .expect("MemObjectStore pits lock poisoned")
            .insert(
                pit.clone(),
                PointInTime {
                    ids,
                    expires_at: Instant::now() + keep_alive,
                },
            );
        Ok(pit)
    }

    async fn close_point_in_time(&self, pit: &str) -> StoreResult<()> {
        self.pits
            .lock()
            .expect("MemObjectStore pits lock poisoned")
            .remove(pit);
        Ok(())
    }

    async fn get_blob(&self, object_id: &ObjectId) -> StoreResult<Bytes> {
        if let Some(fault) = self.take_get_fault(object_id) {
            return Err(fault.into_error(object_id.as_str()));
        }
        let objects = self
            .objects
            .read()
            .expect("MemObjectStore objects read lock poisoned");
        match objects.get(object_id) {
            Some(StoredObject {
                blob: Some(bytes), ..
            }) => Ok(bytes.clone()),
            Some(_) => Err(StoreError::not_found(format!("object {object_id} has no blob"))),
            None => Err(StoreError::not_found(format!("no object {object_id}"))),
        }
    }

    async fn post_metadata(
        &self,
        parent_id: &ObjectId,
        metadata: &Value,
    ) -> StoreResult<Registration> {
        match self.take_post_fault() {
            Some(Fault::Transport(msg)) => return Err(StoreError::Transport(msg)),
            Some(Fault::Status(code)) => return Ok(Registration::rejected(code)),
            None => {}
        }
        if !metadata.is_object() {
            return Ok(Registration::rejected(400));
        }

        let mut objects = self
            .objects
            .write()
            .expect("MemObjectStore objects write lock poisoned");
        if !parent_id.is_empty() && !objects.contains_key(parent_id) {
            return Ok(Registration::rejected(404));
        }

        let id = derive_object_id(parent_id, metadata);
        let mut doc = metadata.clone();
        if !parent_id.is_empty() {
            doc["_sumo"] = json!({ "parent_object": parent_id.as_str() });
        }
        objects.insert(
            id.clone(),
            StoredObject {
                metadata: doc,
                blob: None,
            },
        );
        Ok(Registration {
            status: 200,
            blob_url: Some(format!("{MEM_BLOB_SCHEME}{id}")),
            object_id: Some(id),
        })
    }

    async fn put_blob(&self, blob_url: &str, bytes: Bytes) -> StoreResult<u16> {
        match self.take_put_fault() {
            Some(Fault::Transport(msg)) => return Err(StoreError::Transport(msg)),
            Some(Fault::Status(code)) => return Ok(code),
            None => {}
        }
        let Some(id) = blob_url.strip_prefix(MEM_BLOB_SCHEME) else {
            return Ok(400);
        };
        let mut objects = self
            .objects
            .write()
            .expect("MemObjectStore objects write lock poisoned");
        match objects.get_mut(&ObjectId::from(id)) {
            Some(obj) => {
                obj.blob = Some(bytes);
                Ok(201)
            }
            None => Ok(404),
        }
    }

    async fn delete(&self, object_id: &ObjectId) -> StoreResult<()> {
        if self.remove_tree(object_id).is_empty() {
            return Err(StoreError::not_found(format!("no object {object_id}")));
        }
        Ok(())
    }
}
